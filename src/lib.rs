#![doc(html_root_url = "https://docs.rs/apnwire/latest")]
//! Client for the legacy binary push notification protocol.
//!
//! The crate has two connection types:
//!
//! - [`PushConnection`] writes notification frames to the push gateway and
//!   recovers from the gateway's asynchronous error reports by replaying
//!   every notification sent after the rejected one.
//! - [`FeedbackConnection`] periodically drains the feedback service, which
//!   lists device tokens that should no longer be targeted.
//!
//! Both run as background Tokio tasks reached through a handle. The wire
//! formats are exposed in [`frame`] and [`feedback::decoder`] for use without
//! the connection machinery.
//!
//! ```no_run
//! use apnwire::{DeviceToken, FrameFormat, Notification, PushConfig, PushConnection};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PushConfig::default()
//!     .with_identity("certs/cert.pem", "certs/key.pem")
//!     .with_cache_length(100);
//! assert_eq!(config.frame_format(), FrameFormat::Enhanced);
//!
//! let push = PushConnection::builder(config).bootstrap().await?;
//! let token = DeviceToken::from_hex(
//!     "740f4707bebcf74f9b7c25d48e3358945f6aa01da5ddb387462c7eaf61bb78ad",
//! )?;
//! let id = push
//!     .send(Notification::new(token).with_alert("You have mail").with_badge(3))
//!     .await?;
//! println!("queued as {id}");
//! push.close().await;
//! # Ok(())
//! # }
//! ```

pub mod byte_order;
pub mod config;
pub mod credentials;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod metrics;
pub mod notification;
pub mod push;
pub mod state;
pub mod token;
pub mod transport;

pub use config::{Endpoint, FeedbackConfig, Identity, PushConfig};
pub use credentials::Credentials;
pub use error::{BootstrapError, SendError};
pub use feedback::{
    FeedbackConnection,
    FeedbackConnectionBuilder,
    FeedbackDecoder,
    FeedbackError,
    FeedbackHandler,
    FeedbackRecord,
};
pub use frame::{ErrorFrame, FrameFormat, GatewayStatus, PushFrame, PushFrameCodec};
pub use notification::{Alert, MAX_PAYLOAD_SIZE, Notification};
pub use push::{GatewayErrorHandler, PushConnection, PushConnectionBuilder, SendCache};
pub use state::ConnectionState;
pub use token::{DEVICE_TOKEN_LENGTH, DeviceToken, TokenError};
pub use transport::{SecureStream, SecureTransport, TlsTransport};
