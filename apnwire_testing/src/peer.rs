//! Gateway side of a push connection.

use std::time::Duration;

use apnwire::{ErrorFrame, FrameFormat, GatewayStatus, PushFrame, PushFrameCodec};
use futures::StreamExt;
use serde_json::Value;
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    time::timeout,
};
use tokio_util::codec::FramedRead;

const FRAME_TIMEOUT: Duration = Duration::from_secs(2);
const IDLE_WINDOW: Duration = Duration::from_millis(50);

/// Reads push frames written by the connection under test and answers with
/// error frames.
pub struct GatewayPeer {
    frames: FramedRead<DuplexStream, PushFrameCodec>,
}

impl GatewayPeer {
    /// Wrap a server stream carrying frames in `format`.
    #[must_use]
    pub fn new(stream: DuplexStream, format: FrameFormat) -> Self {
        Self {
            frames: FramedRead::new(stream, PushFrameCodec::new(format)),
        }
    }

    /// Wrap a server stream carrying enhanced frames.
    #[must_use]
    pub fn enhanced(stream: DuplexStream) -> Self { Self::new(stream, FrameFormat::Enhanced) }

    /// Next frame from the client.
    ///
    /// # Panics
    ///
    /// Panics on timeout, end of stream or a malformed frame.
    pub async fn next_frame(&mut self) -> PushFrame {
        timeout(FRAME_TIMEOUT, self.frames.next())
            .await
            .expect("timed out waiting for a push frame")
            .expect("client closed the stream")
            .expect("malformed push frame")
    }

    /// The next `count` frames from the client.
    pub async fn frames(&mut self, count: usize) -> Vec<PushFrame> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.next_frame().await);
        }
        out
    }

    /// Sequence identifiers of the next `count` frames.
    pub async fn sequence_ids(&mut self, count: usize) -> Vec<u32> {
        self.frames(count)
            .await
            .into_iter()
            .map(|frame| frame.sequence_id)
            .collect()
    }

    /// Assert the client writes nothing for a short while.
    ///
    /// # Panics
    ///
    /// Panics if a frame arrives.
    pub async fn assert_idle(&mut self) {
        if let Ok(Some(frame)) = timeout(IDLE_WINDOW, self.frames.next()).await {
            panic!("unexpected frame from client: {frame:?}");
        }
    }

    /// Assert the client closes the stream without writing another frame.
    ///
    /// # Panics
    ///
    /// Panics if a frame arrives or the stream stays open.
    pub async fn assert_closed(&mut self) {
        let next = timeout(FRAME_TIMEOUT, self.frames.next())
            .await
            .expect("timed out waiting for the client to close");
        assert!(next.is_none(), "expected end of stream, got {next:?}");
    }

    /// Report `sequence_id` as failed with `status` and close the stream.
    ///
    /// # Panics
    ///
    /// Panics if the error frame cannot be written.
    pub async fn reject(self, status: GatewayStatus, sequence_id: u32) {
        let mut stream = self.frames.into_inner();
        let frame = ErrorFrame {
            status,
            sequence_id,
        };
        stream
            .write_all(&frame.to_bytes())
            .await
            .expect("write error frame");
        stream.shutdown().await.expect("shutdown gateway stream");
    }

    /// Close the stream without reporting an error.
    pub async fn close(self) {
        let mut stream = self.frames.into_inner();
        let _ = stream.shutdown().await;
    }
}

/// Parse a frame's payload as JSON.
///
/// # Panics
///
/// Panics if the payload is not valid JSON.
#[must_use]
pub fn payload_json(frame: &PushFrame) -> Value {
    serde_json::from_slice(&frame.payload).expect("payload is JSON")
}
