//! Secure stream establishment.
//!
//! Connections obtain their byte streams through [`SecureTransport`], which
//! hides TCP connect, TLS handshake and client authentication. The production
//! implementation is [`TlsTransport`]; tests substitute in-memory streams.

use std::{future::pending, io, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tracing::debug;

use crate::{config::Endpoint, credentials::Credentials, error::BootstrapError};

/// Stream types usable as a connection's secure channel.
pub trait SecureStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> SecureStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens authenticated streams to a remote endpoint.
#[async_trait]
pub trait SecureTransport: Send + Sync + 'static {
    /// Stream produced by a successful connect.
    type Stream: SecureStream;

    /// Connect to `endpoint` and complete the secure handshake.
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Stream>;
}

/// A connect in progress, owned by a connection task.
pub(crate) type Connecting<S> = BoxFuture<'static, io::Result<S>>;

/// Resolve the connect in progress, or never if there is none.
///
/// The future is only cleared once it completes, so dropping this call from
/// a `select!` leaves the connect running.
pub(crate) async fn poll_connecting<S>(connecting: &mut Option<Connecting<S>>) -> io::Result<S> {
    match connecting.as_mut() {
        Some(future) => {
            let result = future.await;
            *connecting = None;
            result
        }
        None => pending().await,
    }
}

/// TLS over TCP with client certificate authentication.
#[derive(Clone)]
pub struct TlsTransport {
    connector: TlsConnector,
}

impl TlsTransport {
    /// Build a transport presenting `credentials` and trusting the web PKI
    /// roots.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Tls`] if the certificate and key do not form
    /// a usable client identity.
    pub fn new(credentials: Credentials) -> Result<Self, BootstrapError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let (cert_chain, key) = credentials.into_parts();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| BootstrapError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(cert_chain, key)
            .map_err(|e| BootstrapError::Tls(e.to_string()))?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl SecureTransport for TlsTransport {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Stream> {
        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        tcp.set_nodelay(true)?;
        debug!(
            host = %endpoint.host,
            port = endpoint.port,
            "tcp connected, starting tls handshake"
        );
        self.connector.connect(server_name, tcp).await
    }
}
