//! Task owning the feedback stream, poll timer and reassembly buffer.

use std::{future::pending, io, sync::Arc, time::Duration};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tokio_util::{
    codec::{BytesCodec, FramedRead},
    sync::CancellationToken,
};
use tracing::{debug, error, info, warn};

use super::{FeedbackDecoder, FeedbackHandler};
use crate::{
    config::Endpoint,
    metrics::{self, Channel},
    state::ConnectionState,
    transport::{Connecting, SecureTransport, poll_connecting},
};

pub(crate) enum Command {
    Request,
    StopPolling,
}

enum Event<S> {
    Shutdown,
    Command(Option<Command>),
    Tick,
    Connected(io::Result<S>),
    Inbound(Option<io::Result<BytesMut>>),
}

pub(crate) struct FeedbackActor<T: SecureTransport> {
    transport: Arc<T>,
    endpoint: Endpoint,
    handler: FeedbackHandler,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    timer: Option<Interval>,
    connecting: Option<Connecting<T::Stream>>,
    reader: Option<FramedRead<T::Stream, BytesCodec>>,
    decoder: FeedbackDecoder,
}

impl<T: SecureTransport> FeedbackActor<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        endpoint: Endpoint,
        poll_interval: Option<Duration>,
        handler: FeedbackHandler,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        let timer = poll_interval.map(|period| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        Self {
            transport,
            endpoint,
            handler,
            commands,
            state,
            shutdown,
            timer,
            connecting: None,
            reader: None,
            decoder: FeedbackDecoder::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.set_state(ConnectionState::Disconnected);
        self.request();
        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Event::Shutdown,
                connected = poll_connecting(&mut self.connecting) => Event::Connected(connected),
                inbound = poll_inbound(&mut self.reader) => Event::Inbound(inbound),
                command = self.commands.recv() => Event::Command(command),
                () = poll_timer(&mut self.timer) => Event::Tick,
            };
            match event {
                Event::Shutdown | Event::Command(None) => break,
                Event::Command(Some(Command::Request)) | Event::Tick => self.request(),
                Event::Command(Some(Command::StopPolling)) => {
                    if self.timer.take().is_some() {
                        debug!("feedback polling stopped");
                    }
                }
                Event::Connected(result) => self.on_connected(result),
                Event::Inbound(Some(Ok(chunk))) => self.on_data(&chunk),
                Event::Inbound(Some(Err(error))) => {
                    warn!(%error, "feedback stream read failed");
                    self.disconnect();
                }
                Event::Inbound(None) => {
                    debug!("feedback service closed the connection");
                    self.disconnect();
                }
            }
        }
        self.disconnect();
    }

    /// Start a connection if none exists or is in progress.
    fn request(&mut self) {
        let state = *self.state.borrow();
        if state != ConnectionState::Disconnected {
            debug!(%state, "feedback request ignored");
            return;
        }
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        info!(host = %endpoint.host, port = endpoint.port, "connecting to feedback service");
        self.connecting = Some(Box::pin(
            async move { transport.connect(&endpoint).await },
        ));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_connected(&mut self, result: io::Result<T::Stream>) {
        match result {
            Ok(stream) => {
                self.decoder = FeedbackDecoder::new();
                self.reader = Some(FramedRead::new(stream, BytesCodec::new()));
                self.set_state(ConnectionState::Open);
                metrics::inc_connections(Channel::Feedback);
            }
            Err(error) => {
                error!(%error, "feedback connect failed");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn on_data(&mut self, chunk: &[u8]) {
        let mut count = 0_usize;
        for record in self.decoder.push(chunk) {
            match record {
                Ok(record) => {
                    count += 1;
                    metrics::inc_feedback_records();
                    (self.handler)(record.timestamp, record.token);
                }
                Err(error) => warn!(%error, "malformed feedback record skipped"),
            }
        }
        if count > 0 {
            debug!(count, buffered = self.decoder.buffered(), "feedback records decoded");
        }
    }

    fn disconnect(&mut self) {
        if self.reader.take().is_some() {
            let buffered = self.decoder.buffered();
            if buffered > 0 {
                warn!(buffered, "feedback stream ended inside a record; dropping partial bytes");
            }
            self.decoder.reset();
            metrics::dec_connections(Channel::Feedback);
        }
        if self.connecting.is_none() {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "feedback connection state changed");
        }
    }
}

async fn poll_inbound<S>(
    reader: &mut Option<FramedRead<S, BytesCodec>>,
) -> Option<io::Result<BytesMut>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.next().await,
        None => pending().await,
    }
}

async fn poll_timer(timer: &mut Option<Interval>) {
    match timer.as_mut() {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}
