//! Unix-domain-socket transport.
//!
//! The rendezvous endpoint is a single `UnixListener` at the path computed
//! by [`crate::paths`] (§6.3). Each accepted petition gets a *fresh*
//! reply endpoint: a second, per-petition `UnixListener` bound under the
//! same runtime directory, whose numeric id is sent back to the front-end
//! on the rendezvous connection before that connection is closed.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::petition::Petition;
use crate::protocol::{self, Confirm, OutCode};
use crate::registry::ListenerRegistry;
use crate::transport::{ReplyHandle, Transport, WaitOutcome};

/// Read buffer size for draining a petition's command line (spec.md §4.1:
/// "repeated reads until the peer closes its write side").
const READ_CHUNK: usize = 4096;

/// Reply-endpoint bind retries before the process aborts (spec.md §7).
const REPLY_BIND_ATTEMPTS: u32 = 10;

pub struct UnixTransport {
    socket_path: PathBuf,
    runtime_dir: PathBuf,
    listener: Mutex<Option<UnixListener>>,
    stopping: AtomicBool,
    next_reply_id: AtomicU64,
    /// Used by `accept_petition` to trigger a liveness sweep on EMFILE.
    registry: std::sync::Arc<ListenerRegistry>,
}

impl UnixTransport {
    pub fn new(socket_path: PathBuf, runtime_dir: PathBuf, registry: std::sync::Arc<ListenerRegistry>) -> Self {
        UnixTransport {
            socket_path,
            runtime_dir,
            listener: Mutex::new(None),
            stopping: AtomicBool::new(false),
            next_reply_id: AtomicU64::new(1),
            registry,
        }
    }

    fn reply_path(&self, id: u64) -> PathBuf {
        self.runtime_dir.join(format!("reply-{id}.sock"))
    }

    /// Binds a fresh per-petition reply listener, retrying with 200-500ms
    /// backoff on transient failure. Aborts the process (`LOG_fatal`
    /// equivalent) if all attempts are exhausted.
    fn create_reply_listener(&self) -> (u64, UnixListener) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let id = self.next_reply_id.fetch_add(1, Ordering::Relaxed);
            let path = self.reply_path(id);
            let _ = std::fs::remove_file(&path);
            match UnixListener::bind(&path) {
                Ok(listener) => return (id, listener),
                Err(e) => {
                    log::error!("Failed to bind reply endpoint {}: {e} (attempt {attempt})", path.display());
                    if attempt >= REPLY_BIND_ATTEMPTS {
                        log::error!("Giving up creating a reply endpoint after {REPLY_BIND_ATTEMPTS} attempts; aborting");
                        std::process::exit(1);
                    }
                    let backoff = 200 + (attempt as u64 * 30).min(300);
                    std::thread::sleep(Duration::from_millis(backoff));
                }
            }
        }
    }

    fn self_wake(&self) {
        if let Ok(mut stream) = UnixStream::connect(&self.socket_path) {
            // Zero-byte write + immediate close: accept_petition() reads
            // this as EOF with an empty command line, which the
            // dispatcher's classifier would map to `Intent::Normal` with
            // an empty string — so we special-case it at the transport
            // layer and never hand it to the dispatcher as a petition.
            let _ = stream.write_all(b"");
        }
    }
}

impl Transport for UnixTransport {
    type RendezvousConn = UnixStream;

    fn init(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.runtime_dir)
            .with_context(|| format!("creating runtime dir {}", self.runtime_dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))
                .with_context(|| format!("setting permissions on {}", self.runtime_dir.display()))?;
        }

        if self.socket_path.exists() {
            remove_stale_socket(&self.socket_path, &self.runtime_dir)?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("binding rendezvous socket at {}", self.socket_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o700))?;
        }

        *self.listener.lock().unwrap() = Some(listener);
        log::info!("Listening for petitions at {}", self.socket_path.display());
        Ok(())
    }

    fn wait_for_petition(&self) -> io::Result<WaitOutcome<UnixStream>> {
        // Must not hold `self.listener`'s mutex across the blocking
        // accept() call below: stop_waiting() needs that same mutex
        // (briefly) to reach the fd for shutdown(2), and a guard held
        // across a blocking syscall would deadlock it. try_clone() gives
        // us an independent handle to the same underlying socket, so
        // shutdown(2) on the original still unblocks accept() on the
        // clone.
        let listener = self
            .listener
            .lock()
            .unwrap()
            .as_ref()
            .expect("transport not initialized")
            .try_clone()?;
        match listener.accept() {
            Ok((stream, _addr)) => Ok(WaitOutcome::Connected(stream)),
            Err(e) => {
                if self.stopping.load(Ordering::SeqCst) {
                    Ok(WaitOutcome::Stopped)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn stop_waiting(&self) {
        use std::os::unix::io::AsRawFd;

        self.stopping.store(true, Ordering::SeqCst);
        let shutdown_ok = match self.listener.lock().unwrap().as_ref() {
            Some(l) => unsafe { libc::shutdown(l.as_raw_fd(), libc::SHUT_RDWR) == 0 },
            None => false,
        };
        if !shutdown_ok {
            log::debug!("shutdown(2) on rendezvous socket failed; self-waking instead");
        }
        // shutdown(2) on a *listening* socket does not reliably unblock a
        // thread already parked in accept() on every platform we target
        // (spec.md §9: "implementations unable to shut a blocked accept
        // down must instead connect to themselves as a self-wake"), so we
        // always also self-connect.
        self.self_wake();
    }

    fn accept_petition(&self, mut conn: UnixStream) -> Petition {
        let mut line = String::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    line.push_str(&String::from_utf8_lossy(&buf[..n]));
                }
                Err(e) => {
                    log::error!("Error reading petition: {e}");
                    return Petition::error_sentinel(discard_reply_handle(self));
                }
            }
        }

        if line.is_empty() {
            // Self-wake connection: zero bytes, no command.
            return Petition::error_sentinel(discard_reply_handle(self));
        }

        let (id, reply_listener) = self.create_reply_listener();

        if conn.write_all(&(id as u32).to_le_bytes()).is_err() {
            log::warn!("Rendezvous peer gone before reply id could be sent");
        }
        drop(conn);

        match reply_listener.accept() {
            Ok((stream, _)) => {
                let _ = std::fs::remove_file(self.reply_path(id));
                let mut petition = Petition::new(line, ReplyHandle::new(id, Box::new(stream)));
                petition.client_id = None;
                petition
            }
            Err(e) => {
                log::error!("Reply endpoint {id} never connected: {e}");
                Petition::error_sentinel(discard_reply_handle(self))
            }
        }
    }

    fn write_result(&self, petition: &mut Petition, code: OutCode, body: &[u8]) {
        if petition.disconnected {
            return;
        }
        if let Err(e) = protocol::write_terminal_frame(&mut petition.reply, code, body) {
            log::warn!("Failed writing terminal frame: {e}");
            petition.disconnected = true;
        }
    }

    fn write_partial(&self, petition: &mut Petition, bytes: &[u8]) {
        if petition.disconnected {
            return;
        }
        if let Err(e) = protocol::write_partial_frame(&mut petition.reply, bytes) {
            if e.kind() == io::ErrorKind::BrokenPipe || e.kind() == io::ErrorKind::ConnectionReset {
                petition.disconnected = true;
            } else {
                log::warn!("Failed writing partial frame: {e}");
            }
        }
    }

    fn request_confirm(&self, petition: &mut Petition, prompt: &str) -> io::Result<Confirm> {
        protocol::write_prompt_frame(&mut petition.reply, protocol::tag::REQCONFIRM, prompt.as_bytes())?;
        loop {
            let answer = protocol::read_confirm_answer(&mut petition.reply)?;
            if let Some(c) = Confirm::from_i32(answer) {
                return Ok(c);
            }
        }
    }

    fn request_string(&self, petition: &mut Petition, prompt: &str) -> io::Result<String> {
        protocol::write_prompt_frame(&mut petition.reply, protocol::tag::REQSTRING, prompt.as_bytes())?;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match petition.reply.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn inform_listener(&self, reply: &mut ReplyHandle, frame: &[u8]) -> io::Result<()> {
        reply.write_all(frame)
    }

    fn close_petition(&self, petition: Petition) {
        let _ = std::fs::remove_file(self.reply_path(petition.reply.id()));
    }
}

/// Builds a throwaway, already-broken reply handle for a discarded
/// "ERROR" petition (no real front-end will ever use it).
fn discard_reply_handle(t: &UnixTransport) -> ReplyHandle {
    let (id, listener) = t.create_reply_listener();
    let _ = std::fs::remove_file(t.reply_path(id));
    drop(listener);
    // A handle over a stream nobody will read/write: any later operation
    // on it simply fails, which is fine since the dispatcher discards the
    // petition this backs before issuing any writes.
    ReplyHandle::new(id, Box::new(io::Cursor::new(Vec::<u8>::new())))
}

/// Removes a stale socket file, but only after verifying it lives inside
/// the server's own runtime directory (never follow a symlink or path
/// pointing elsewhere).
fn remove_stale_socket(socket_path: &Path, runtime_dir: &Path) -> anyhow::Result<()> {
    let canonical_dir = runtime_dir
        .canonicalize()
        .unwrap_or_else(|_| runtime_dir.to_path_buf());
    let parent = socket_path.parent().unwrap_or(runtime_dir);
    let canonical_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
    if canonical_parent != canonical_dir {
        bail!(
            "refusing to remove stale socket outside runtime dir: {}",
            socket_path.display()
        );
    }
    std::fs::remove_file(socket_path).with_context(|| format!("removing stale socket {}", socket_path.display()))
}
