//! Task owning the push gateway stream and recovery state.

use std::{collections::HashSet, future::pending, io, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, oneshot, watch},
    time::timeout,
};
use tokio_util::{
    codec::{Encoder, FramedRead},
    sync::CancellationToken,
};
use tracing::{debug, error, info, warn};

use super::{GatewayErrorHandler, SendCache};
use crate::{
    config::{Endpoint, PushConfig},
    error::SendError,
    frame::{ErrorFrame, ErrorFrameDecoder, FrameFormat, PushFrame, PushFrameCodec},
    metrics::{self, Channel},
    notification::{MAX_PAYLOAD_SIZE, Notification},
    state::ConnectionState,
    transport::{Connecting, SecureTransport, poll_connecting},
};

/// How long a stream whose write failed is read for a pending error frame.
const REJECTION_GRACE: Duration = Duration::from_secs(1);

pub(crate) enum Command {
    Send {
        notification: Notification,
        reply: oneshot::Sender<Result<u32, SendError>>,
    },
    Connect,
}

enum Event<S> {
    Shutdown,
    Command(Option<Command>),
    Connected(io::Result<S>),
    Inbound(Option<io::Result<ErrorFrame>>),
}

/// An encoded frame waiting for a stream.
struct Queued {
    sequence_id: u32,
    frame: Bytes,
}

pub(crate) struct PushActor<T: SecureTransport> {
    transport: Arc<T>,
    endpoint: Endpoint,
    codec: PushFrameCodec,
    cache: SendCache,
    next_id: u32,
    on_error: Option<GatewayErrorHandler>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    connecting: Option<Connecting<T::Stream>>,
    reader: Option<FramedRead<ReadHalf<T::Stream>, ErrorFrameDecoder>>,
    writer: Option<WriteHalf<T::Stream>>,
    /// Frames accepted while no stream was open, in submission order.
    pending: Vec<Queued>,
    /// Error frame read from a stream after a failed write, not yet handled.
    rejected: Option<ErrorFrame>,
}

impl<T: SecureTransport> PushActor<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        config: &PushConfig,
        on_error: Option<GatewayErrorHandler>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            endpoint: config.gateway.clone(),
            codec: PushFrameCodec::new(config.frame_format()),
            cache: SendCache::new(config.cache_length),
            next_id: 0,
            on_error,
            commands,
            state,
            shutdown,
            connecting: None,
            reader: None,
            writer: None,
            pending: Vec::new(),
            rejected: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.set_state(ConnectionState::Disconnected);
        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Event::Shutdown,
                connected = poll_connecting(&mut self.connecting) => Event::Connected(connected),
                inbound = poll_inbound(&mut self.reader) => Event::Inbound(inbound),
                command = self.commands.recv() => Event::Command(command),
            };
            match event {
                Event::Shutdown | Event::Command(None) => break,
                Event::Command(Some(command)) => self.handle_command(command).await,
                Event::Connected(result) => self.on_connected(result).await,
                Event::Inbound(Some(Ok(frame))) => self.on_error_frame(frame).await,
                Event::Inbound(Some(Err(error))) => {
                    warn!(%error, "gateway stream read failed");
                    self.disconnect().await;
                }
                Event::Inbound(None) => {
                    info!(pending = self.pending.len(), "gateway closed the connection");
                    self.disconnect().await;
                }
            }
            while let Some(frame) = self.rejected.take() {
                self.on_error_frame(frame).await;
            }
        }
        self.disconnect().await;
        debug!(discarded = self.pending.len(), "push connection task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                notification,
                reply,
            } => {
                let result = self.submit(notification).await;
                // The caller may have stopped waiting.
                let _ = reply.send(result);
            }
            Command::Connect => self.start_connect(),
        }
    }

    /// Validate, number, cache and transmit a notification.
    async fn submit(&mut self, mut notification: Notification) -> Result<u32, SendError> {
        let frame = self.encode(&notification)?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        notification.assign_sequence_id(id);
        let frame = Queued {
            sequence_id: id,
            frame: self.finish_frame(frame, id)?,
        };

        if self.codec.format() == FrameFormat::Enhanced
            && let Some(evicted) = self.cache.push(notification)
        {
            debug!(
                evicted = ?evicted.sequence_id(),
                "notification left the recovery window"
            );
        }

        if self.writer.is_some() {
            self.write_frames(vec![frame]).await;
        } else {
            self.pending.push(frame);
            self.start_connect();
        }
        Ok(id)
    }

    /// Check a notification and build its frame without an identifier.
    fn encode(&self, notification: &Notification) -> Result<PushFrame, SendError> {
        let token = notification.device().ok_or(SendError::MissingDeviceToken)?;
        if u16::try_from(token.len()).is_err() {
            return Err(SendError::InvalidTokenSize { size: token.len() });
        }
        let payload = notification.serialize().map_err(SendError::Serialize)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::InvalidPayloadSize {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(PushFrame {
            sequence_id: 0,
            expiry: notification.expiry,
            token: Bytes::copy_from_slice(token.as_bytes()),
            payload: Bytes::from(payload),
        })
    }

    fn finish_frame(&mut self, mut frame: PushFrame, id: u32) -> Result<Bytes, SendError> {
        frame.sequence_id = id;
        let mut dst = BytesMut::new();
        self.codec.encode(frame, &mut dst).map_err(SendError::Encode)?;
        Ok(dst.freeze())
    }

    fn start_connect(&mut self) {
        if self.connecting.is_some() || self.writer.is_some() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        info!(host = %endpoint.host, port = endpoint.port, "connecting to gateway");
        self.connecting = Some(Box::pin(
            async move { transport.connect(&endpoint).await },
        ));
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_connected(&mut self, result: io::Result<T::Stream>) {
        match result {
            Ok(stream) => {
                let (read, write) = tokio::io::split(stream);
                self.reader = Some(FramedRead::new(read, ErrorFrameDecoder));
                self.writer = Some(write);
                self.set_state(ConnectionState::Open);
                metrics::inc_connections(Channel::Push);
                info!(queued = self.pending.len(), "gateway connection open");
                let queued = std::mem::take(&mut self.pending);
                self.write_frames(queued).await;
            }
            Err(error) => {
                error!(%error, queued = self.pending.len(), "gateway connect failed");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Write frames in order. On failure the unwritten frames are queued for
    /// the next connection.
    async fn write_frames(&mut self, frames: Vec<Queued>) {
        let Some(writer) = self.writer.as_mut() else {
            self.pending.extend(frames);
            return;
        };
        let mut frames = frames.into_iter();
        while let Some(queued) = frames.next() {
            if let Err(error) = writer.write_all(&queued.frame).await {
                warn!(%error, "gateway write failed");
                self.pending.push(queued);
                self.pending.extend(frames);
                self.abandon_stream().await;
                return;
            }
            metrics::inc_sent();
        }
        if let Err(error) = writer.flush().await {
            warn!(%error, "gateway flush failed");
            self.abandon_stream().await;
        }
    }

    /// Tear down a stream that failed to accept writes.
    ///
    /// The gateway writes its error frame before closing, so the read half is
    /// drained first. A frame found there is handled once the current event
    /// completes.
    async fn abandon_stream(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            let drained = timeout(REJECTION_GRACE, async {
                match reader.next().await {
                    Some(Ok(frame)) => Some(frame),
                    Some(Err(error)) => {
                        debug!(%error, "gateway stream read failed while draining");
                        None
                    }
                    None => None,
                }
            })
            .await;
            match drained {
                Ok(frame) => self.rejected = frame,
                Err(_) => debug!("no error frame before the drain deadline"),
            }
        }
        self.disconnect().await;
    }

    async fn on_error_frame(&mut self, frame: ErrorFrame) {
        warn!(
            status = %frame.status,
            sequence_id = frame.sequence_id,
            "gateway rejected notification"
        );
        metrics::inc_gateway_errors(frame.status);
        self.disconnect().await;

        let recovery = self.cache.take().recover(frame.sequence_id);
        // Queued frames the replay re-encodes would otherwise go out twice.
        let replayed: HashSet<u32> = recovery
            .failed
            .iter()
            .chain(&recovery.resend)
            .filter_map(Notification::sequence_id)
            .collect();
        self.pending.retain(|queued| !replayed.contains(&queued.sequence_id));
        if recovery.failed.is_none() {
            warn!(
                sequence_id = frame.sequence_id,
                "rejected notification is no longer cached"
            );
        }
        if let Some(handler) = &self.on_error {
            handler(frame.status, recovery.failed);
        }

        let count = recovery.resend.len();
        for notification in recovery.resend {
            if let Err(error) = self.submit(notification).await {
                warn!(%error, "cached notification could not be resent");
            }
        }
        metrics::add_resent(count as u64);
        debug!(count, "resent notifications after gateway error");
    }

    /// Drop the stream, keeping queued frames for the next connection.
    async fn disconnect(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            if let Err(error) = writer.shutdown().await {
                debug!(%error, "gateway stream shutdown failed");
            }
            metrics::dec_connections(Channel::Push);
        }
        if self.connecting.is_none() {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "push connection state changed");
        }
    }
}

async fn poll_inbound<R>(
    reader: &mut Option<FramedRead<R, ErrorFrameDecoder>>,
) -> Option<io::Result<ErrorFrame>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.next().await,
        None => pending().await,
    }
}
