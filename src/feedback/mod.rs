//! Polling of the feedback service.
//!
//! The feedback service reports device tokens that no longer accept
//! notifications. A [`FeedbackConnection`] connects as soon as its identity
//! has loaded and again on every poll interval, handing each decoded record
//! to the caller's [`FeedbackHandler`]. The service closes the stream after
//! sending its backlog; the connection then waits for the next poll.

mod actor;
pub mod decoder;

use std::sync::Arc;

pub use decoder::{
    FEEDBACK_HEADER_LEN,
    FEEDBACK_RECORD_LEN,
    FeedbackDecoder,
    FeedbackError,
    FeedbackRecord,
    Records,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span, warn};

use self::actor::{Command, FeedbackActor};
use crate::{
    config::FeedbackConfig,
    credentials::Credentials,
    error::BootstrapError,
    state::ConnectionState,
    token::DeviceToken,
    transport::{SecureTransport, TlsTransport},
};

/// Handler invoked with the timestamp and token of each feedback record.
pub type FeedbackHandler = Arc<dyn Fn(u32, DeviceToken) + Send + Sync>;

/// Builder for [`FeedbackConnection`].
pub struct FeedbackConnectionBuilder {
    config: FeedbackConfig,
    handler: FeedbackHandler,
}

impl FeedbackConnectionBuilder {
    /// Load the client identity, start the connection task and open the
    /// first connection.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if either file fails to load or the TLS
    /// identity is unusable.
    pub async fn bootstrap(self) -> Result<FeedbackConnection, BootstrapError> {
        let credentials = Credentials::load(&self.config.identity).await?;
        let transport = TlsTransport::new(credentials)?;
        Ok(self.build_with_transport(transport))
    }

    /// Start the connection task over a caller-supplied transport.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn build_with_transport<T: SecureTransport>(self, transport: T) -> FeedbackConnection {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Bootstrapping);
        let shutdown = CancellationToken::new();
        let actor = FeedbackActor::new(
            Arc::new(transport),
            self.config.feedback.clone(),
            self.config.poll_interval(),
            self.handler,
            command_rx,
            state_tx,
            shutdown.clone(),
        );
        let span = info_span!("feedback_connection", host = %self.config.feedback.host);
        let task = tokio::spawn(actor.run().instrument(span));
        FeedbackConnection {
            commands: command_tx,
            state: state_rx,
            shutdown,
            task,
        }
    }
}

/// Handle to a running feedback connection task.
///
/// # Examples
///
/// ```no_run
/// use apnwire::{FeedbackConfig, FeedbackConnection};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let feedback = FeedbackConnection::builder(
///     FeedbackConfig::default().with_poll_interval_seconds(600),
///     |timestamp, token| println!("{token} gone since {timestamp}"),
/// )
/// .bootstrap()
/// .await?;
/// feedback.cancel();
/// # Ok(())
/// # }
/// ```
pub struct FeedbackConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl FeedbackConnection {
    /// Start configuring a connection that reports records to `handler`.
    #[must_use]
    pub fn builder<F>(config: FeedbackConfig, handler: F) -> FeedbackConnectionBuilder
    where
        F: Fn(u32, DeviceToken) + Send + Sync + 'static,
    {
        FeedbackConnectionBuilder {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Connect now if no connection exists or is in progress.
    ///
    /// Ignored in any other state; the request is not queued.
    pub fn request(&self) { self.command(Command::Request); }

    /// Stop the poll timer.
    ///
    /// A connection already open keeps reading until the service closes it,
    /// and [`FeedbackConnection::request`] still works.
    pub fn cancel(&self) { self.command(Command::StopPolling); }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { *self.state.borrow() }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.state.clone() }

    /// Stop the connection task and close any open stream.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            warn!(%error, "feedback connection task failed");
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("feedback connection task has stopped");
        }
    }
}
