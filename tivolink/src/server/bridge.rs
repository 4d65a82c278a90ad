//! Blocking-to-async response bridge.
//!
//! Handlers run on a blocking worker and write through a [`TransferSink`].
//! [`BridgeSink`] forwards the head over a oneshot channel and the body
//! through an in-memory duplex pipe whose read half becomes the HTTP body:
//!
//! ```text
//! spawn_blocking                              async handler
//! ──────────────                              ─────────────
//! sink.start(head) ──── oneshot ────────────► await head, build Response
//! sink.write_all() ──── duplex (bounded) ───► ReaderStream ──► Body
//! sink.finish()    ──── drop writer ────────► end of stream
//! ```
//!
//! The pipe is bounded, so a slow client applies back-pressure to the
//! encoder instead of buffering the whole transfer.

use std::io::{self, Write};

use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tokio_util::io::SyncIoBridge;

use crate::transfer::{StreamHead, TransferSink};

/// Capacity of the duplex pipe between worker and connection.
pub const PIPE_CAPACITY: usize = 256 * 1024;

/// [`TransferSink`] feeding an async response body.
pub struct BridgeSink {
    head: Option<oneshot::Sender<StreamHead>>,
    body: Option<SyncIoBridge<DuplexStream>>,
    started: bool,
}

impl BridgeSink {
    /// Create the sink.
    ///
    /// Must be called from within a tokio runtime; the sink itself is then
    /// used from a blocking worker.
    pub fn new(head: oneshot::Sender<StreamHead>, body: DuplexStream) -> Self {
        Self {
            head: Some(head),
            body: Some(SyncIoBridge::new(body)),
            started: false,
        }
    }

    fn body(&mut self) -> io::Result<&mut SyncIoBridge<DuplexStream>> {
        if !self.started {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "body written before response head",
            ));
        }
        self.body
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "response already finished"))
    }
}

impl Write for BridgeSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.body()?.flush()
    }
}

impl TransferSink for BridgeSink {
    fn start(&mut self, head: StreamHead) -> io::Result<()> {
        let sender = self
            .head
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "response head already sent"))?;
        sender
            .send(head)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        self.started = true;
        Ok(())
    }

    fn started(&self) -> bool {
        self.started
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(mut body) = self.body.take() {
            body.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_head_then_body() {
        let (head_tx, head_rx) = oneshot::channel();
        let (writer, mut reader) = tokio::io::duplex(64);
        let mut sink = BridgeSink::new(head_tx, writer);

        let worker = tokio::task::spawn_blocking(move || {
            assert!(sink.write_all(b"early").is_err());
            sink.start(StreamHead::fixed("text/plain", 11)).unwrap();
            assert!(sink.started());
            sink.write_all(b"hello world").unwrap();
            sink.finish().unwrap();
            assert!(sink.write_all(b"late").is_err());
        });

        let head = head_rx.await.unwrap();
        assert_eq!(head.content_length(), Some(11));
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello world");
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_receiver_fails_start() {
        let (head_tx, head_rx) = oneshot::channel();
        let (writer, _reader) = tokio::io::duplex(64);
        let mut sink = BridgeSink::new(head_tx, writer);
        drop(head_rx);

        let result = tokio::task::spawn_blocking(move || sink.start(StreamHead::chunked("video/mpeg")))
            .await
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_reader_surfaces_as_write_error() {
        let (head_tx, _head_rx) = oneshot::channel();
        let (writer, reader) = tokio::io::duplex(16);
        let mut sink = BridgeSink::new(head_tx, writer);
        drop(reader);

        let result = tokio::task::spawn_blocking(move || {
            sink.start(StreamHead::chunked("video/mpeg"))?;
            sink.write_all(&[0u8; 64])
        })
        .await
        .unwrap();
        assert!(result.is_err());
    }
}
