//! Scriptable in-memory transport.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use apnwire::{Endpoint, SecureTransport};
use async_trait::async_trait;
use tokio::{
    io::{DuplexStream, duplex},
    sync::{Semaphore, mpsc},
    time::timeout,
};

const CAPACITY: usize = 64 * 1024;
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(2);

struct Inner {
    accepted: mpsc::UnboundedSender<DuplexStream>,
    connects: AtomicUsize,
    failures: AtomicUsize,
    held: AtomicBool,
    gate: Semaphore,
}

/// [`SecureTransport`] backed by duplex streams.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    /// Create a transport and the server side that receives its streams.
    #[must_use]
    pub fn new() -> (Self, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(Inner {
                accepted: tx,
                connects: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                held: AtomicBool::new(false),
                gate: Semaphore::new(0),
            }),
        };
        (transport, MockServer { accepted: rx })
    }

    /// Number of connect attempts so far, including failed and held ones.
    #[must_use]
    pub fn connects(&self) -> usize { self.inner.connects.load(Ordering::SeqCst) }

    /// Make the next `count` connects fail with `ConnectionRefused`.
    pub fn fail_next(&self, count: usize) { self.inner.failures.store(count, Ordering::SeqCst); }

    /// Block connects until [`MockTransport::release`] is called.
    pub fn hold(&self) { self.inner.held.store(true, Ordering::SeqCst); }

    /// Let `count` held connects complete and stop holding new ones.
    pub fn release(&self, count: usize) {
        self.inner.held.store(false, Ordering::SeqCst);
        self.inner.gate.add_permits(count);
    }
}

#[async_trait]
impl SecureTransport for MockTransport {
    type Stream = DuplexStream;

    async fn connect(&self, _endpoint: &Endpoint) -> io::Result<Self::Stream> {
        let inner = &self.inner;
        inner.connects.fetch_add(1, Ordering::SeqCst);
        if inner.held.load(Ordering::SeqCst) {
            inner
                .gate
                .acquire()
                .await
                .map_err(|e| io::Error::other(e.to_string()))?
                .forget();
        }
        let failing = inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted failure"));
        }
        let (client, server) = duplex(CAPACITY);
        inner
            .accepted
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "server dropped"))?;
        Ok(client)
    }
}

/// Receives the server half of every stream the transport opens.
pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MockServer {
    /// Wait for the next connection.
    ///
    /// # Panics
    ///
    /// Panics if no connection arrives within two seconds.
    pub async fn accept(&mut self) -> DuplexStream {
        timeout(ACCEPT_TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }

    /// Whether a connection is waiting to be accepted.
    pub fn has_pending(&self) -> bool { !self.accepted.is_empty() }
}
