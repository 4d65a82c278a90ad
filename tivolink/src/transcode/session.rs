//! Resumable transcode sessions.
//!
//! A session owns a running encoder and keeps the last few output blocks.
//! When a client drops the connection and comes back with `Range:
//! bytes=N-`, the session replays from N (if N is still inside the
//! retained window) and then keeps pulling fresh output.
//!
//! ```text
//!            window_start                     produced
//!                 │                              │
//!   ... dropped   ▼ [blk][blk][blk][blk]         ▼  ◄── encoder stdout
//!                  └──── retained (replayable) ──┘
//! ```
//!
//! Offsets are absolute positions in the response body, header included.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::TranscodeError;

/// Size of one output block.
pub const BLOCK_SIZE: usize = 512 * 1024;

/// Number of blocks kept for replay.
pub const RETAINED_BLOCKS: usize = 4;

/// Sessions untouched for this long are killed.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a resume check waits for a session that is still streaming.
const LOCK_WAIT: Duration = Duration::from_secs(2);

/// One encoder run and its replay window.
pub struct Session {
    child: Option<Child>,
    source: Box<dyn Read + Send>,
    blocks: VecDeque<Bytes>,
    window_start: u64,
    produced: u64,
    finished: bool,
    last_active: Instant,
}

impl Session {
    /// Wrap an output stream. `child`, when given, is killed on drop.
    pub fn new(source: Box<dyn Read + Send>, child: Option<Child>) -> Self {
        Self {
            child,
            source,
            blocks: VecDeque::with_capacity(RETAINED_BLOCKS + 1),
            window_start: 0,
            produced: 0,
            finished: false,
            last_active: Instant::now(),
        }
    }

    /// Record bytes that precede the encoder output (the compatibility
    /// header), so they take part in replay like any other block.
    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        if !prefix.is_empty() {
            self.retain(Bytes::copy_from_slice(prefix));
        }
        self
    }

    /// Whether a stream from `offset` can be produced.
    pub fn can_resume(&self, offset: u64) -> bool {
        offset >= self.window_start && (!self.finished || offset <= self.produced)
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    /// Bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Write everything from `offset` on: first the retained blocks, then
    /// fresh encoder output until it ends.
    ///
    /// # Errors
    ///
    /// Write errors are returned as-is; the session stays usable so the
    /// client can resume.
    pub fn stream_from(&mut self, out: &mut dyn Write, offset: u64) -> io::Result<()> {
        if !self.can_resume(offset) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {} is outside the retained window", offset),
            ));
        }
        self.last_active = Instant::now();

        let mut position = self.window_start;
        for block in &self.blocks {
            write_from(out, block, position, offset)?;
            position += block.len() as u64;
        }

        let mut buf = vec![0u8; BLOCK_SIZE];
        while !self.finished {
            let n = fill_block(&mut self.source, &mut buf)?;
            if n == 0 {
                self.finished = true;
                self.reap_child();
                break;
            }
            let block = Bytes::copy_from_slice(&buf[..n]);
            let start = self.produced;
            self.retain(block.clone());
            self.last_active = Instant::now();
            write_from(out, &block, start, offset)?;
        }
        out.flush()
    }

    fn retain(&mut self, block: Bytes) {
        self.produced += block.len() as u64;
        self.blocks.push_back(block);
        while self.blocks.len() > RETAINED_BLOCKS {
            if let Some(dropped) = self.blocks.pop_front() {
                self.window_start += dropped.len() as u64;
            }
        }
    }

    fn reap_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::warn!(status = %status, "Encoder exited with failure");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Could not reap encoder"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // Fails harmlessly when the encoder already exited
            if let Err(e) = child.kill() {
                tracing::trace!(error = %e, "Encoder already stopped");
            }
            if let Err(e) = child.wait() {
                tracing::debug!(error = %e, "Could not reap encoder");
            }
        }
    }
}

/// Write the part of `block` (which starts at `start`) at or after `offset`.
fn write_from(out: &mut dyn Write, block: &[u8], start: u64, offset: u64) -> io::Result<()> {
    let end = start + block.len() as u64;
    if end <= offset {
        return Ok(());
    }
    let skip = offset.saturating_sub(start) as usize;
    out.write_all(&block[skip..])
}

/// Read until `buf` is full or the source ends.
fn fill_block(source: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub type SharedSession = Arc<Mutex<Session>>;

/// A session reserved for one resumed transfer.
///
/// The claim owns its own handle to the session, so reaping or replacing
/// the registry entry after the claim was taken cannot stop the encoder
/// under it.
pub struct ResumeClaim {
    path: PathBuf,
    session: SharedSession,
    offset: u64,
}

impl ResumeClaim {
    pub fn new(path: impl Into<PathBuf>, session: SharedSession, offset: u64) -> Self {
        Self {
            path: path.into(),
            session,
            offset,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stream the session from the claimed offset into `out`.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::NotResumable`] if another transfer on the same
    /// session moved its window past the offset meanwhile; I/O errors from
    /// `out` or the encoder otherwise.
    pub fn stream(self, out: &mut dyn Write) -> Result<(), TranscodeError> {
        let mut session = self.session.lock();
        if !session.can_resume(self.offset) {
            return Err(TranscodeError::NotResumable(self.path.display().to_string()));
        }
        tracing::info!(path = %self.path.display(), offset = self.offset, "Resuming transcode");
        session.stream_from(out, self.offset)?;
        Ok(())
    }
}

/// Live sessions keyed by source path.
pub struct SessionRegistry {
    sessions: DashMap<PathBuf, SharedSession>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_idle_timeout(SESSION_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    /// Register a new session for `path`, replacing (and eventually
    /// killing) any previous one.
    pub fn start(&self, path: &Path, session: Session) -> SharedSession {
        self.reap_idle();
        let shared = Arc::new(Mutex::new(session));
        if self
            .sessions
            .insert(path.to_path_buf(), Arc::clone(&shared))
            .is_some()
        {
            tracing::debug!(path = %path.display(), "Replaced transcode session");
        }
        shared
    }

    pub fn get(&self, path: &Path) -> Option<SharedSession> {
        self.sessions.get(path).map(|s| Arc::clone(s.value()))
    }

    /// Reserve the session for `path` if it can stream from `offset`.
    pub fn claim(&self, path: &Path, offset: u64) -> Option<ResumeClaim> {
        self.reap_idle();
        let session = self.get(path)?;
        // The previous transfer may still hold the lock until its write fails.
        let resumable = session
            .try_lock_for(LOCK_WAIT)
            .is_some_and(|s| s.can_resume(offset));
        resumable.then(|| ResumeClaim::new(path, session, offset))
    }

    pub fn remove(&self, path: &Path) {
        self.sessions.remove(path);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle past the timeout. Busy sessions are kept.
    pub fn reap_idle(&self) {
        let idle_timeout = self.idle_timeout;
        self.sessions.retain(|path, session| {
            let keep = session
                .try_lock()
                .map_or(true, |s| s.idle_for() < idle_timeout);
            if !keep {
                tracing::debug!(path = %path.display(), "Reaping idle transcode session");
            }
            keep
        });
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
