//! In-memory doubles for exercising `apnwire` connections in tests.
//!
//! [`MockTransport`] stands in for the TLS transport. Each connect creates a
//! `tokio::io::duplex` pair, returns one half to the connection under test
//! and hands the other to the test through [`MockServer`]. The test then
//! plays the gateway or feedback service on that half.
//!
//! ```rust
//! use apnwire::{DeviceToken, Notification, PushConfig, PushConnection};
//! use apnwire_testing::{GatewayPeer, MockTransport};
//!
//! # async fn demo() {
//! let (transport, mut server) = MockTransport::new();
//! let push = PushConnection::builder(PushConfig::default()).build_with_transport(transport);
//! push.send(Notification::new(DeviceToken::new(vec![1; 32]))).await.unwrap();
//!
//! let mut gateway = GatewayPeer::enhanced(server.accept().await);
//! assert_eq!(gateway.next_frame().await.sequence_id, 0);
//! # }
//! ```

pub mod metrics;
pub mod peer;
pub mod records;
pub mod transport;

pub use metrics::{counter_value, debugging_recorder};
pub use peer::{GatewayPeer, payload_json};
pub use records::{error_frame, feedback_record};
pub use transport::{MockServer, MockTransport};
