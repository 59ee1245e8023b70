//! Lifecycle states shared by push and feedback connections.

use std::fmt;

/// Where a connection is in its lifecycle.
///
/// `Bootstrapping` lasts until both the certificate and the private key have
/// loaded. From then on the connection moves between `Disconnected`,
/// `Connecting` and `Open`; it never reconnects on its own after the peer
/// closes the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Credentials are still loading.
    #[default]
    Bootstrapping,
    /// Credentials are loaded and no stream exists.
    Disconnected,
    /// TCP connect and TLS handshake are in progress.
    Connecting,
    /// The secure stream is established.
    Open,
}

impl ConnectionState {
    /// Whether the secure stream is usable.
    #[must_use]
    pub const fn is_open(self) -> bool { matches!(self, Self::Open) }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bootstrapping => "bootstrapping",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        })
    }
}
