//! Response sinks for streamed bodies.
//!
//! Handlers write bodies synchronously on a blocking worker. A
//! [`TransferSink`] is the `Write` end of a response: the status line and
//! framing are announced once with [`TransferSink::start`] before any body
//! byte, and [`TransferSink::finish`] ends the body (for chunked framing,
//! this is the terminator).
//!
//! ```text
//! handler ──start(head)──► sink ──► HTTP status + headers
//!         ──write_all()──►      ──► body bytes
//!         ──finish()─────►      ──► end of body
//! ```

use std::io::{self, Write};

/// How the response body is delimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Known length, optionally with a `Content-Range` value.
    Fixed {
        length: u64,
        content_range: Option<String>,
    },
    /// Length unknown up front.
    Chunked,
}

/// Status and framing of a response, sent before its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    pub status: u16,
    pub content_type: String,
    pub framing: Framing,
}

impl StreamHead {
    /// `200 OK` with a known body length.
    pub fn fixed(content_type: impl Into<String>, length: u64) -> Self {
        Self {
            status: 200,
            content_type: content_type.into(),
            framing: Framing::Fixed {
                length,
                content_range: None,
            },
        }
    }

    /// `206 Partial Content` with chunked framing.
    pub fn chunked(content_type: impl Into<String>) -> Self {
        Self {
            status: 206,
            content_type: content_type.into(),
            framing: Framing::Chunked,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_range(mut self, range: impl Into<String>) -> Self {
        if let Framing::Fixed { content_range, .. } = &mut self.framing {
            *content_range = Some(range.into());
        }
        self
    }

    /// Declared body length, if fixed.
    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            Framing::Fixed { length, .. } => Some(length),
            Framing::Chunked => None,
        }
    }
}

/// Blocking destination for one response.
pub trait TransferSink: Write + Send {
    /// Announce status and framing. Must be called once, before writing.
    fn start(&mut self, head: StreamHead) -> io::Result<()>;

    /// Whether [`start`](Self::start) has been called.
    fn started(&self) -> bool;

    /// End the body.
    fn finish(&mut self) -> io::Result<()>;
}

/// Counts bytes written through it.
pub struct CountingWriter<'a, W: Write + ?Sized> {
    inner: &'a mut W,
    written: u64,
}

impl<'a, W: Write + ?Sized> CountingWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl<W: Write + ?Sized> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// In-memory sink that records the head and body.
///
/// Used to exercise handlers without HTTP.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub head: Option<StreamHead>,
    pub body: Vec<u8>,
    pub finished: bool,
    /// Fail writes once the body reaches this many bytes.
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a client that disconnects after `limit` body bytes.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            fail_after: Some(limit),
            ..Self::default()
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.head.as_ref().map(|h| h.status)
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.head.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "body written before response head",
            ));
        }
        let allowed = match self.fail_after {
            Some(limit) if self.body.len() >= limit => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
            }
            Some(limit) => buf.len().min(limit - self.body.len()),
            None => buf.len(),
        };
        self.body.extend_from_slice(&buf[..allowed]);
        Ok(allowed)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransferSink for RecordingSink {
    fn start(&mut self, head: StreamHead) -> io::Result<()> {
        if self.head.is_some() {
            return Err(io::Error::new(io::ErrorKind::Other, "response already started"));
        }
        self.head = Some(head);
        Ok(())
    }

    fn started(&self) -> bool {
        self.head.is_some()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}
