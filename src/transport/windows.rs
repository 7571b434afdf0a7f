//! Windows named-pipe transport.
//!
//! Mirrors [`super::unix::UnixTransport`]'s contract: a rendezvous pipe
//! instance accepts the command line, then a freshly created per-petition
//! pipe instance (named `\\.\pipe\megacmdpipe_<user>_reply_<id>`) becomes
//! the reply endpoint, whose suffix is sent back over the rendezvous
//! connection exactly as on Unix. Built directly on `windows-sys`'s
//! `Win32_System_Pipes` bindings (grounded in the original
//! `comunicationsmanagernamedpipes.cpp`'s `CreateNamedPipeW` /
//! `ConnectNamedPipe` / `ReadFile` / `WriteFile` sequence) rather than an
//! async runtime, to keep the same blocking-I/O scheduling model as the
//! Unix side (spec.md §5).

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::Pipes::{ConnectNamedPipe, CreateNamedPipeW, PIPE_ACCESS_DUPLEX, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT};

use crate::petition::Petition;
use crate::protocol::{self, Confirm, OutCode};
use crate::transport::{ReplyHandle, Transport, WaitOutcome};

const BUF_SIZE: u32 = 64 * 1024;
const REPLY_BIND_ATTEMPTS: u32 = 10;
/// `ERROR_PIPE_CONNECTED`: a client raced in between `CreateNamedPipeW`
/// and `ConnectNamedPipe` and is already connected.
const ERROR_PIPE_CONNECTED: u32 = 535;

fn wide(s: &str) -> Vec<u16> {
    OsString::from(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// A raw Win32 pipe handle, made `Send` because ownership never crosses
/// threads concurrently — only ever moved, like a `UnixStream`.
struct PipeHandle(HANDLE);
unsafe impl Send for PipeHandle {}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}

impl Read for PipeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0u32;
        let ok = unsafe { ReadFile(self.0, buf.as_mut_ptr() as *mut _, buf.len() as u32, &mut n, ptr::null_mut()) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for PipeHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut n = 0u32;
        let ok = unsafe { WriteFile(self.0, buf.as_ptr() as *const _, buf.len() as u32, &mut n, ptr::null_mut()) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn create_pipe_instance(name: &str) -> io::Result<PipeHandle> {
    let wide_name = wide(name);
    let handle = unsafe {
        CreateNamedPipeW(
            wide_name.as_ptr(),
            PIPE_ACCESS_DUPLEX,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
            PIPE_UNLIMITED_INSTANCES,
            BUF_SIZE,
            BUF_SIZE,
            0,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    Ok(PipeHandle(handle))
}

/// Blocks until a client connects to `pipe`.
fn connect_pipe(pipe: &PipeHandle) -> io::Result<()> {
    let ok = unsafe { ConnectNamedPipe(pipe.0, ptr::null_mut()) };
    if ok == 0 {
        let err = unsafe { GetLastError() };
        if err != ERROR_PIPE_CONNECTED {
            return Err(io::Error::from_raw_os_error(err as i32));
        }
    }
    Ok(())
}

pub struct WindowsPipeTransport {
    pipe_name: String,
    stopping: AtomicBool,
    next_reply_id: AtomicU64,
    rendezvous: Mutex<Option<PipeHandle>>,
}

impl WindowsPipeTransport {
    pub fn new(pipe_name: String) -> Self {
        WindowsPipeTransport {
            pipe_name,
            stopping: AtomicBool::new(false),
            next_reply_id: AtomicU64::new(1),
            rendezvous: Mutex::new(None),
        }
    }

    fn reply_pipe_name(&self, id: u64) -> String {
        format!("{}_reply_{id}", self.pipe_name)
    }

    fn create_reply_pipe(&self) -> (u64, PipeHandle) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let id = self.next_reply_id.fetch_add(1, Ordering::Relaxed);
            match create_pipe_instance(&self.reply_pipe_name(id)) {
                Ok(pipe) => return (id, pipe),
                Err(e) => {
                    log::error!("Failed to create reply pipe instance: {e} (attempt {attempt})");
                    if attempt >= REPLY_BIND_ATTEMPTS {
                        log::error!("Giving up creating a reply pipe after {REPLY_BIND_ATTEMPTS} attempts; aborting");
                        std::process::exit(1);
                    }
                    let backoff = 200 + (attempt as u64 * 30).min(300);
                    std::thread::sleep(Duration::from_millis(backoff));
                }
            }
        }
    }
}

impl Transport for WindowsPipeTransport {
    type RendezvousConn = PipeHandle;

    fn init(&self) -> anyhow::Result<()> {
        let pipe = create_pipe_instance(&self.pipe_name)
            .map_err(|e| anyhow::anyhow!("creating rendezvous pipe {}: {e}", self.pipe_name))?;
        *self.rendezvous.lock().unwrap() = Some(pipe);
        log::info!("Listening for petitions at {}", self.pipe_name);
        Ok(())
    }

    fn wait_for_petition(&self) -> io::Result<WaitOutcome<PipeHandle>> {
        let (id, fresh_instance) = self.create_reply_pipe_alias_as_rendezvous();
        let _ = id;
        connect_pipe(&fresh_instance)?;
        if self.stopping.load(Ordering::SeqCst) {
            return Ok(WaitOutcome::Stopped);
        }
        Ok(WaitOutcome::Connected(fresh_instance))
    }

    fn stop_waiting(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Named pipes have no `shutdown(2)` equivalent that unblocks a
        // pending `ConnectNamedPipe`; self-connect as a new client
        // instance instead (spec.md §9).
        if let Ok(mut client) = std::fs::OpenOptions::new().read(true).write(true).open(format!(
            "\\\\.\\pipe\\{}",
            self.pipe_name.trim_start_matches("\\\\.\\pipe\\")
        )) {
            let _ = client.write_all(b"");
        }
    }

    fn accept_petition(&self, mut conn: PipeHandle) -> Petition {
        let mut line = String::new();
        let mut buf = [0u8; 4096];
        loop {
            match conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => line.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(_) => break,
            }
        }

        if line.is_empty() {
            let (id, pipe) = self.create_reply_pipe();
            return Petition::error_sentinel(ReplyHandle::new(id, Box::new(pipe)));
        }

        let (id, reply_pipe) = self.create_reply_pipe();
        let _ = conn.write_all(&(id as u32).to_le_bytes());
        drop(conn);

        if connect_pipe(&reply_pipe).is_err() {
            return Petition::error_sentinel(ReplyHandle::new(id, Box::new(reply_pipe)));
        }

        Petition::new(line, ReplyHandle::new(id, Box::new(reply_pipe)))
    }

    fn write_result(&self, petition: &mut Petition, code: OutCode, body: &[u8]) {
        if petition.disconnected {
            return;
        }
        if protocol::write_terminal_frame(&mut petition.reply, code, body).is_err() {
            petition.disconnected = true;
        }
    }

    fn write_partial(&self, petition: &mut Petition, bytes: &[u8]) {
        if petition.disconnected {
            return;
        }
        if protocol::write_partial_frame(&mut petition.reply, bytes).is_err() {
            petition.disconnected = true;
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

    fn close_petition(&self, _petition: Petition) {
        // Dropping the Petition drops its ReplyHandle, which drops the
        // PipeHandle, which closes the handle (see PipeHandle::drop).
    }
}

impl WindowsPipeTransport {
    /// Each rendezvous "accept" on a named pipe is really: create a new
    /// pipe instance sharing the rendezvous name, then wait for a client
    /// to connect to *that* instance (Win32 named pipes support multiple
    /// instances of the same name; this is the standard multi-client
    /// accept-loop idiom).
    fn create_reply_pipe_alias_as_rendezvous(&self) -> (u64, PipeHandle) {
        let pipe = create_pipe_instance(&self.pipe_name).unwrap_or_else(|e| {
            log::error!("Failed to create rendezvous pipe instance: {e}");
            std::process::exit(1);
        });
        (0, pipe)
    }
}
