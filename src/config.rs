//! Connection configuration.
//!
//! Both configuration structs deserialise from any serde format with every
//! field optional, falling back to the production gateway defaults. Callback
//! handlers are not part of the serialisable surface and are installed on the
//! connection builders instead.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::frame::FrameFormat;

/// Default production push gateway host.
pub const DEFAULT_GATEWAY_HOST: &str = "gateway.push.apple.com";
/// Default production push gateway port.
pub const DEFAULT_GATEWAY_PORT: u16 = 2195;
/// Default production feedback host.
pub const DEFAULT_FEEDBACK_HOST: &str = "feedback.push.apple.com";
/// Default production feedback port.
pub const DEFAULT_FEEDBACK_PORT: u16 = 2196;
/// Default number of notifications retained for error recovery.
pub const DEFAULT_CACHE_LENGTH: usize = 5;
/// Default feedback poll period in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: i64 = 3600;

/// Remote host and port.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// DNS name, also used for TLS server name verification.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Locations of the PEM encoded client certificate and private key.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Identity {
    /// Certificate chain file.
    pub cert_path: PathBuf,
    /// Private key file.
    pub key_path: PathBuf,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
        }
    }
}

/// Settings for a [`PushConnection`](crate::PushConnection).
///
/// # Examples
///
/// ```
/// use apnwire::{FrameFormat, PushConfig};
///
/// let config = PushConfig::default().with_cache_length(100);
/// assert_eq!(config.cache_length, 100);
/// assert_eq!(config.frame_format(), FrameFormat::Enhanced);
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// Client certificate and key.
    #[serde(flatten)]
    pub identity: Identity,
    /// Push gateway address.
    pub gateway: Endpoint,
    /// Send enhanced frames. Error recovery requires this.
    pub use_enhanced_format: bool,
    /// Number of sent notifications retained for error recovery.
    pub cache_length: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            gateway: Endpoint::new(DEFAULT_GATEWAY_HOST, DEFAULT_GATEWAY_PORT),
            use_enhanced_format: true,
            cache_length: DEFAULT_CACHE_LENGTH,
        }
    }
}

impl PushConfig {
    /// Replace the certificate and key locations.
    #[must_use]
    pub fn with_identity(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.identity = Identity {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        };
        self
    }

    /// Replace the gateway address.
    #[must_use]
    pub fn with_gateway(mut self, host: impl Into<String>, port: u16) -> Self {
        self.gateway = Endpoint::new(host, port);
        self
    }

    /// Select the frame layout.
    #[must_use]
    pub fn with_enhanced_format(mut self, enabled: bool) -> Self {
        self.use_enhanced_format = enabled;
        self
    }

    /// Set the recovery cache bound.
    #[must_use]
    pub fn with_cache_length(mut self, length: usize) -> Self {
        self.cache_length = length;
        self
    }

    /// Frame layout selected by [`PushConfig::use_enhanced_format`].
    #[must_use]
    pub fn frame_format(&self) -> FrameFormat {
        if self.use_enhanced_format {
            FrameFormat::Enhanced
        } else {
            FrameFormat::Simple
        }
    }
}

/// Settings for a [`FeedbackConnection`](crate::FeedbackConnection).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Client certificate and key.
    #[serde(flatten)]
    pub identity: Identity,
    /// Feedback service address.
    pub feedback: Endpoint,
    /// Seconds between polls. Zero or negative disables polling.
    pub poll_interval_seconds: i64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            feedback: Endpoint::new(DEFAULT_FEEDBACK_HOST, DEFAULT_FEEDBACK_PORT),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl FeedbackConfig {
    /// Replace the certificate and key locations.
    #[must_use]
    pub fn with_identity(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.identity = Identity {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        };
        self
    }

    /// Replace the feedback service address.
    #[must_use]
    pub fn with_feedback(mut self, host: impl Into<String>, port: u16) -> Self {
        self.feedback = Endpoint::new(host, port);
        self
    }

    /// Set the poll period in seconds.
    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: i64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    /// Poll period, or `None` when polling is disabled.
    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        u64::try_from(self.poll_interval_seconds)
            .ok()
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}
