//! Error types surfaced to callers.
//!
//! Errors fall into three groups:
//!
//! - [`SendError`]: a notification was refused before reaching the wire. Nothing about the
//!   connection changes.
//! - [`BootstrapError`]: the secure identity could not be loaded. No connection can ever be
//!   established, so construction fails.
//! - Gateway rejections, which arrive asynchronously as
//!   [`GatewayStatus`](crate::frame::GatewayStatus) values through the
//!   connection's error handler.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::frame::GatewayStatus;

/// Reasons a notification is refused by [`PushConnection::send`](crate::PushConnection::send).
#[derive(Debug, Error)]
pub enum SendError {
    /// The notification has no target device.
    #[error("notification has no device token")]
    MissingDeviceToken,
    /// The device token does not fit the frame's 16-bit length field.
    #[error("device token of {size} bytes is too large")]
    InvalidTokenSize {
        /// Token size in bytes.
        size: usize,
    },
    /// The serialised payload exceeds the gateway limit.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    InvalidPayloadSize {
        /// Serialised payload size in bytes.
        size: usize,
        /// Maximum accepted payload size.
        max: usize,
    },
    /// The payload could not be rendered as JSON.
    #[error("failed to serialise payload")]
    Serialize(#[source] serde_json::Error),
    /// The frame could not be encoded.
    #[error("failed to encode frame")]
    Encode(#[source] io::Error),
    /// The connection task has stopped.
    #[error("push connection closed")]
    Closed,
}

impl SendError {
    /// Matching gateway status for caller-input errors.
    ///
    /// Returns `None` for failures that have no gateway equivalent.
    #[must_use]
    pub fn status(&self) -> Option<GatewayStatus> {
        match self {
            Self::MissingDeviceToken => Some(GatewayStatus::MissingDeviceToken),
            Self::InvalidTokenSize { .. } => Some(GatewayStatus::InvalidTokenSize),
            Self::InvalidPayloadSize { .. } => Some(GatewayStatus::InvalidPayloadSize),
            Self::Serialize(_) | Self::Encode(_) | Self::Closed => None,
        }
    }

    /// Numeric status code for caller-input errors.
    #[must_use]
    pub fn code(&self) -> Option<u8> { self.status().map(GatewayStatus::code) }
}

/// Failures loading or installing the secure identity.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A certificate or key file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Path of the file that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The certificate file held no usable certificate.
    #[error("invalid certificate: {0}")]
    Certificate(String),
    /// The key file held no usable private key.
    #[error("invalid private key: {0}")]
    PrivateKey(String),
    /// The TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}
