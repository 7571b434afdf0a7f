//! Platform-abstract local IPC transport (spec.md §4.1).
//!
//! One concrete implementation per platform, selected at construction
//! time (spec.md §9 Design Notes: "Dynamic dispatch across transports").
//! The contract is identical across platforms; only endpoint construction
//! and a handful of OS calls differ, confined to `unix` / `windows`.

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

use std::fmt;
use std::io::{self, Read, Write};

use crate::petition::Petition;

/// Read + Write + Send bound satisfied by any platform's reply stream.
pub trait ReplyStream: Read + Write + Send {}
impl<T: Read + Write + Send> ReplyStream for T {}

/// Opaque per-petition reply endpoint handle.
///
/// Wraps whatever platform-specific stream type backs it (a second Unix
/// domain socket connection, or a Windows named pipe instance) behind a
/// single `Read + Write` surface so the dispatcher, worker, and registry
/// never need to know which platform they're on.
pub struct ReplyHandle {
    id: u64,
    stream: Box<dyn ReplyStream>,
}

impl ReplyHandle {
    pub fn new(id: u64, stream: Box<dyn ReplyStream>) -> Self {
        ReplyHandle { id, stream }
    }

    /// An in-memory handle for unit tests that don't exercise real I/O.
    #[cfg(test)]
    pub fn for_test(id: u64) -> Self {
        ReplyHandle {
            id,
            stream: Box::new(io::Cursor::new(Vec::new())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle").field("id", &self.id).finish()
    }
}

impl Read for ReplyHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for ReplyHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Result of one `wait_for_petition` cycle.
pub enum WaitOutcome<C> {
    /// A front-end connected to the rendezvous endpoint.
    Connected(C),
    /// `stop_waiting()` was called; the dispatcher should exit its loop.
    Stopped,
}

/// Platform-abstract local IPC transport (spec.md §4.1 operations).
///
/// `RendezvousConn` is the transport-specific type representing one
/// not-yet-classified connection to the rendezvous endpoint.
pub trait Transport: Send + Sync {
    type RendezvousConn;

    /// Bind/create the rendezvous endpoint. Fatal on failure (§7).
    fn init(&self) -> anyhow::Result<()>;

    /// Blocks until a new connection arrives or `stop_waiting()` is called.
    fn wait_for_petition(&self) -> io::Result<WaitOutcome<Self::RendezvousConn>>;

    /// Unblocks a concurrent `wait_for_petition()` call.
    fn stop_waiting(&self);

    /// Reads the command frame and allocates a fresh reply endpoint.
    /// On transient failure (peer reset, fd exhaustion) logs, triggers a
    /// registry sweep via `on_transient_error`, and returns an
    /// [`Petition::error_sentinel`] the dispatcher discards.
    fn accept_petition(&self, conn: Self::RendezvousConn) -> Petition;

    /// Writes the terminal reply frame and flushes.
    fn write_result(&self, petition: &mut Petition, code: crate::protocol::OutCode, body: &[u8]);

    /// Writes a `PARTIAL` frame. No-ops quietly if `petition.disconnected`.
    fn write_partial(&self, petition: &mut Petition, bytes: &[u8]);

    /// Writes a `REQCONFIRM` frame and blocks for the answer.
    fn request_confirm(
        &self,
        petition: &mut Petition,
        prompt: &str,
    ) -> io::Result<crate::protocol::Confirm>;

    /// Writes a `REQSTRING` frame and blocks for the answer.
    fn request_string(&self, petition: &mut Petition, prompt: &str) -> io::Result<String>;

    /// Writes a raw frame to a listener endpoint. `Err` iff the peer is
    /// gone (broken pipe / connection reset) — callers use this to drive
    /// eviction.
    fn inform_listener(&self, reply: &mut ReplyHandle, frame: &[u8]) -> io::Result<()>;

    /// Releases the reply endpoint after the final write.
    fn close_petition(&self, petition: Petition);
}
