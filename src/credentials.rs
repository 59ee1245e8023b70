//! Loading the client certificate and private key.
//!
//! Both files are read concurrently and the load only succeeds once both
//! have arrived. The first failure is returned and the other read is
//! abandoned.

use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use tracing::{debug, info};

use crate::{config::Identity, error::BootstrapError};

/// Parsed client identity presented during the TLS handshake.
#[derive(Debug)]
pub struct Credentials {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Credentials {
    /// Read and parse the certificate chain and key named by `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Read`] if either file cannot be read, or a
    /// parse error if the PEM content is unusable.
    pub async fn load(identity: &Identity) -> Result<Self, BootstrapError> {
        let (cert_pem, key_pem) = tokio::try_join!(
            read_file(&identity.cert_path),
            read_file(&identity.key_path)
        )?;
        let credentials = Self::from_pem(&cert_pem, &key_pem)?;
        info!(
            cert = %identity.cert_path.display(),
            chain_len = credentials.cert_chain.len(),
            "client credentials loaded"
        );
        Ok(credentials)
    }

    /// Parse PEM encoded certificate chain and key material.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Certificate`] when no certificate is found
    /// and [`BootstrapError::PrivateKey`] when the key cannot be parsed.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, BootstrapError> {
        let cert_chain = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BootstrapError::Certificate(e.to_string()))?;
        if cert_chain.is_empty() {
            return Err(BootstrapError::Certificate(
                "no certificates found".to_owned(),
            ));
        }
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| BootstrapError::PrivateKey(e.to_string()))?;
        Ok(Self { cert_chain, key })
    }

    pub(crate) fn into_parts(self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.cert_chain, self.key)
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| BootstrapError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), len = bytes.len(), "identity file read");
    Ok(bytes)
}
