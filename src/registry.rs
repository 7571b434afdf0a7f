//! Listener Registry: bounded fan-out of server-pushed state frames
//! (spec.md §4.4).
//!
//! The original source guards an ordered list of listeners with a
//! reentrant lock plus a second lock serializing writes. Rather than
//! reaching for a reentrant mutex, this registry follows the same
//! "don't share state, share handles to state" shape the teacher uses in
//! `hub/handle_cache.rs`: a single `Mutex<Vec<Listener>>` around the
//! structural list, with broadcast/unicast holding that lock only for
//! the duration of the fan-out (never across a call back into this
//! module), which sidesteps the need for reentrancy entirely (spec.md
//! §9 Design Notes, "Cyclic ownership").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::petition::{Listener, Petition};
use crate::transport::Transport;

/// Unit separator terminating every state-frame token (spec.md §4.4).
pub const FRAME_TERMINATOR: u8 = 0x1F;

const DEFAULT_MAX_LISTENERS: usize = 200;
/// Fraction of `RLIMIT_NOFILE` reserved for listener sockets, leaving
/// headroom for reply endpoints and other file descriptors.
const RLIMIT_FRACTION: f64 = 0.80;

/// Appends the frame terminator to a state-frame token.
pub fn frame(token: &str) -> Vec<u8> {
    let mut bytes = token.as_bytes().to_vec();
    bytes.push(FRAME_TERMINATOR);
    bytes
}

pub struct ListenerRegistry {
    listeners: Mutex<Vec<Listener>>,
    next_client_id: AtomicU64,
    default_max: usize,
}

impl ListenerRegistry {
    /// `default_max` is used when the platform exposes no soft
    /// file-descriptor limit to derive a cap from.
    pub fn new(default_max: usize) -> Self {
        ListenerRegistry {
            listeners: Mutex::new(Vec::new()),
            next_client_id: AtomicU64::new(1),
            default_max,
        }
    }

    pub fn with_default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS)
    }

    /// Sampled fresh on every call, not cached, so a later `ulimit`
    /// change takes effect immediately (spec.md §5 concurrency notes).
    fn max_listeners(&self) -> usize {
        current_rlimit_cap(self.default_max)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a petition as a long-lived listener (spec.md §4.4
    /// `register`). On success returns the assigned client id and emits
    /// the current prompt plus an optional greeting to the new listener
    /// before returning. On bound rejection the petition's reply
    /// endpoint is closed with a negative acknowledgement and `None` is
    /// returned.
    pub fn register<T: Transport + ?Sized>(
        &self,
        transport: &T,
        mut petition: Petition,
        prompt: &str,
        greeting: Option<&str>,
    ) -> Option<u64> {
        self.sweep_dead(transport);

        let mut listeners = self.listeners.lock().unwrap();
        if listeners.len() >= self.max_listeners() {
            log::warn!("listener registry full ({} listeners); rejecting", listeners.len());
            drop(listeners);
            transport.write_result(
                &mut petition,
                crate::protocol::OutCode::Unexpected,
                b"too many listeners registered",
            );
            transport.close_petition(petition);
            return None;
        }

        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        petition.client_id = Some(client_id);
        let mut listener = Listener {
            client_id,
            reply: petition.reply,
            registered_at: std::time::Instant::now(),
        };

        let _ = transport.inform_listener(&mut listener.reply, &frame(&format!("clientID:{client_id}")));
        let _ = transport.inform_listener(&mut listener.reply, &frame(&format!("prompt:{prompt}")));
        if let Some(message) = greeting {
            let _ = transport.inform_listener(&mut listener.reply, &frame(&format!("message:{message}")));
        }

        listeners.push(listener);
        Some(client_id)
    }

    /// Sends `message` (without the terminator, which is appended here)
    /// to every registered listener, evicting any that fail. Returns the
    /// remaining listener count.
    pub fn broadcast<T: Transport + ?Sized>(&self, transport: &T, message: &str) -> usize {
        let bytes = frame(message);
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain_mut(|listener| transport.inform_listener(&mut listener.reply, &bytes).is_ok());
        listeners.len()
    }

    /// Sends `message` to the listener with the given client id only.
    /// Evicts it on failure. Returns `true` iff a matching listener was
    /// found (regardless of whether the write succeeded).
    pub fn unicast<T: Transport + ?Sized>(&self, transport: &T, client_id: u64, message: &str) -> bool {
        let bytes = frame(message);
        let mut listeners = self.listeners.lock().unwrap();
        let Some(idx) = listeners.iter().position(|l| l.client_id == client_id) else {
            return false;
        };
        if transport.inform_listener(&mut listeners[idx].reply, &bytes).is_err() {
            listeners.remove(idx);
        }
        true
    }

    /// Equivalent to `broadcast(transport, "ack")`: probes every
    /// listener's write surface, evicting dead ones. Triggered
    /// periodically by an incoming `sendack` petition and reactively on
    /// file-descriptor exhaustion in the transport (spec.md §4.4).
    pub fn sweep_dead<T: Transport + ?Sized>(&self, transport: &T) -> usize {
        self.broadcast(transport, "ack")
    }
}

#[cfg(unix)]
fn current_rlimit_cap(default: usize) -> usize {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
        return default;
    }
    ((limit.rlim_cur as f64) * RLIMIT_FRACTION) as usize
}

#[cfg(not(unix))]
fn current_rlimit_cap(default: usize) -> usize {
    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::petition::Petition;
    use crate::protocol::{Confirm, OutCode};
    use crate::transport::{ReplyHandle, WaitOutcome};
    use std::io;

    /// Minimal in-memory transport for exercising registry fan-out
    /// without any real sockets. `fail_ids` marks which listener ids
    /// should report a write failure, simulating a dead peer.
    struct StubTransport {
        fail_ids: Mutex<Vec<u64>>,
    }

    impl StubTransport {
        fn new() -> Self {
            StubTransport { fail_ids: Mutex::new(Vec::new()) }
        }

        fn kill(&self, id: u64) {
            self.fail_ids.lock().unwrap().push(id);
        }
    }

    impl Transport for StubTransport {
        type RendezvousConn = ();

        fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn wait_for_petition(&self) -> io::Result<WaitOutcome<()>> {
            Ok(WaitOutcome::Stopped)
        }

        fn stop_waiting(&self) {}

        fn accept_petition(&self, _conn: ()) -> Petition {
            Petition::error_sentinel(ReplyHandle::for_test(0))
        }

        fn write_result(&self, _petition: &mut Petition, _code: OutCode, _body: &[u8]) {}

        fn write_partial(&self, _petition: &mut Petition, _bytes: &[u8]) {}

        fn request_confirm(&self, _petition: &mut Petition, _prompt: &str) -> io::Result<Confirm> {
            Ok(Confirm::No)
        }

        fn request_string(&self, _petition: &mut Petition, _prompt: &str) -> io::Result<String> {
            Ok(String::new())
        }

        fn inform_listener(&self, reply: &mut ReplyHandle, frame: &[u8]) -> io::Result<()> {
            if self.fail_ids.lock().unwrap().contains(&reply.id()) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "dead peer"));
            }
            reply.write_all(frame)
        }

        fn close_petition(&self, _petition: Petition) {}
    }

    fn petition_with_id(id: u64) -> Petition {
        Petition::new("registerstatelistener".to_string(), ReplyHandle::for_test(id))
    }

    #[test]
    fn registers_listener_and_assigns_monotonic_client_ids() {
        let registry = ListenerRegistry::new(200);
        let transport = StubTransport::new();

        let first = registry.register(&transport, petition_with_id(0), "MEGA CMD> ", None).unwrap();
        let second = registry.register(&transport, petition_with_id(1), "MEGA CMD> ", None).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn broadcast_evicts_dead_listeners() {
        let registry = ListenerRegistry::new(200);
        let transport = StubTransport::new();

        registry.register(&transport, petition_with_id(0), "p", None).unwrap();
        let second_id = registry.register(&transport, petition_with_id(1), "p", None).unwrap();

        // Listener reply handles are keyed by the petition's reply id
        // (0 and 1 here), not the assigned client id, mirroring how the
        // transport's reply endpoint identity is independent of the
        // registry's own id space.
        transport.kill(1);
        let remaining = registry.broadcast(&transport, "prompt:P");

        assert_eq!(remaining, 1);
        assert_eq!(registry.len(), 1);
        let _ = second_id;
    }

    #[test]
    fn registration_beyond_bound_is_rejected() {
        let registry = ListenerRegistry::new(1);
        let transport = StubTransport::new();

        let first = registry.register(&transport, petition_with_id(0), "p", None);
        let second = registry.register(&transport, petition_with_id(1), "p", None);

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unicast_targets_only_the_matching_client_id() {
        let registry = ListenerRegistry::new(200);
        let transport = StubTransport::new();

        let a = registry.register(&transport, petition_with_id(0), "p", None).unwrap();
        let _b = registry.register(&transport, petition_with_id(1), "p", None).unwrap();

        assert!(registry.unicast(&transport, a, "progress:1:2"));
        assert!(!registry.unicast(&transport, 9999, "progress:1:2"));
    }

    #[test]
    fn sweep_dead_is_broadcast_of_ack() {
        let registry = ListenerRegistry::new(200);
        let transport = StubTransport::new();
        registry.register(&transport, petition_with_id(0), "p", None).unwrap();
        transport.kill(0);
        let remaining = registry.sweep_dead(&transport);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn frame_appends_unit_separator() {
        assert_eq!(frame("ack"), b"ack\x1F".to_vec());
    }
}
