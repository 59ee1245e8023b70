//! Notification delivery to the push gateway.
//!
//! A [`PushConnection`] is a handle to a background task that owns the secure
//! stream, the sequence counter and the [`SendCache`]. Every state change
//! happens on that task, in response to a command from the handle or an I/O
//! completion, so no locking is involved.
//!
//! When the gateway rejects a notification it writes an error frame naming
//! the notification's sequence identifier and closes the stream. The task
//! then reports the rejected notification through the
//! [`GatewayErrorHandler`] and replays every cached notification sent after
//! it, in order, over a fresh connection.

mod actor;
pub mod cache;

use std::sync::Arc;

pub use cache::{Recovery, SendCache};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span, warn};

use self::actor::{Command, PushActor};
use crate::{
    config::PushConfig,
    credentials::Credentials,
    error::{BootstrapError, SendError},
    frame::GatewayStatus,
    notification::Notification,
    state::ConnectionState,
    transport::{SecureTransport, TlsTransport},
};

/// Handler invoked when the gateway rejects a notification.
///
/// Receives the gateway status and the rejected notification, or `None` if it
/// had already left the recovery cache.
pub type GatewayErrorHandler = Arc<dyn Fn(GatewayStatus, Option<Notification>) + Send + Sync>;

/// Builder for [`PushConnection`].
///
/// # Examples
///
/// ```no_run
/// use apnwire::{DeviceToken, Notification, PushConfig, PushConnection};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let push = PushConnection::builder(PushConfig::default())
///     .on_gateway_error(|status, note| eprintln!("rejected {note:?}: {status}"))
///     .bootstrap()
///     .await?;
/// let token: DeviceToken = "a1b2c3d4".parse()?;
/// push.send(Notification::new(token).with_alert("Hello")).await?;
/// # Ok(())
/// # }
/// ```
pub struct PushConnectionBuilder {
    config: PushConfig,
    on_error: Option<GatewayErrorHandler>,
}

impl PushConnectionBuilder {
    /// Install the gateway error handler.
    #[must_use]
    pub fn on_gateway_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(GatewayStatus, Option<Notification>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Load the client identity and start the connection task.
    ///
    /// The certificate and key are read concurrently; the connection leaves
    /// the bootstrapping state only when both have loaded. No stream is
    /// opened until the first send or an explicit
    /// [`PushConnection::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if either file fails to load or the TLS
    /// identity is unusable.
    pub async fn bootstrap(self) -> Result<PushConnection, BootstrapError> {
        let credentials = Credentials::load(&self.config.identity).await?;
        let transport = TlsTransport::new(credentials)?;
        Ok(self.build_with_transport(transport))
    }

    /// Start the connection task over a caller-supplied transport.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn build_with_transport<T: SecureTransport>(self, transport: T) -> PushConnection {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Bootstrapping);
        let shutdown = CancellationToken::new();
        let actor = PushActor::new(
            Arc::new(transport),
            &self.config,
            self.on_error,
            command_rx,
            state_tx,
            shutdown.clone(),
        );
        let span = info_span!("push_connection", host = %self.config.gateway.host);
        let task = tokio::spawn(actor.run().instrument(span));
        PushConnection {
            commands: command_tx,
            state: state_rx,
            shutdown,
            task,
        }
    }
}

/// Handle to a running push connection task.
///
/// Dropping the handle stops the task once queued commands are processed.
pub struct PushConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PushConnection {
    /// Start configuring a connection.
    #[must_use]
    pub fn builder(config: PushConfig) -> PushConnectionBuilder {
        PushConnectionBuilder {
            config,
            on_error: None,
        }
    }

    /// Submit a notification and return its sequence identifier.
    ///
    /// The frame is written immediately if the stream is open. Otherwise it
    /// is queued and written once the next connection opens; a connect is
    /// started if none is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::MissingDeviceToken`] or
    /// [`SendError::InvalidPayloadSize`] for invalid input, in which case no
    /// sequence identifier is consumed, or [`SendError::Closed`] if the
    /// connection task has stopped.
    pub async fn send(&self, notification: Notification) -> Result<u32, SendError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send {
                notification,
                reply,
            })
            .map_err(|_| SendError::Closed)?;
        response.await.map_err(|_| SendError::Closed)?
    }

    /// Open a connection now if none exists or is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection task has stopped.
    pub fn connect(&self) -> Result<(), SendError> {
        self.commands
            .send(Command::Connect)
            .map_err(|_| SendError::Closed)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { *self.state.borrow() }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.state.clone() }

    /// Stop the connection task and close the stream.
    ///
    /// Queued but unwritten notifications are discarded.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            warn!(%error, "push connection task failed");
        }
    }
}
