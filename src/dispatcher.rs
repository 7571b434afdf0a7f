//! Petition Dispatcher: the single accept loop (spec.md §4.2).
//!
//! Grounded in the teacher's `hub/run.rs` main event loop shape — a
//! single thread blocking on one source of new work, reaping finished
//! background threads each iteration — generalized from a 60 FPS tick
//! loop over channels to a blocking accept loop over petitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::petition::{classify, Intent, Petition};
use crate::protocol::OutCode;
use crate::registry::ListenerRegistry;
use crate::transport::{Transport, WaitOutcome};
use crate::worker::{CommandTable, WorkerPool};

pub struct Dispatcher<T: Transport + 'static + ?Sized> {
    transport: Arc<T>,
    registry: Arc<ListenerRegistry>,
    workers: WorkerPool<T>,
    shutdown_requested: Arc<AtomicBool>,
    prompt: Mutex<String>,
}

impl<T: Transport + 'static + ?Sized> Dispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<ListenerRegistry>,
        commands: CommandTable<T>,
        max_workers: usize,
    ) -> Self {
        Dispatcher {
            workers: WorkerPool::new(Arc::clone(&transport), commands, max_workers),
            transport,
            registry,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            prompt: Mutex::new("MEGA CMD> ".to_string()),
        }
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        *self.prompt.lock().unwrap() = prompt.into();
    }

    fn prompt(&self) -> String {
        self.prompt.lock().unwrap().clone()
    }

    /// Runs the accept loop until a shutdown petition has been serviced
    /// by a worker, then drains remaining workers and returns.
    pub fn run(&self) {
        loop {
            match self.transport.wait_for_petition() {
                Err(e) => {
                    log::warn!("wait_for_petition failed: {e}; sweeping listener registry");
                    self.registry.sweep_dead(self.transport.as_ref());
                }
                Ok(WaitOutcome::Stopped) => {}
                Ok(WaitOutcome::Connected(conn)) => {
                    let petition = self.transport.accept_petition(conn);
                    self.workers.reap_finished();
                    self.route(petition);
                }
            }
            // A self-wake (spec.md §9) surfaces as either `Stopped` or as
            // a `Connected` carrying an empty, already-discarded petition
            // — check the flag unconditionally rather than only on the
            // `Stopped` arm, or the latter path spins back into another
            // blocking accept() with nothing left to wake it.
            if self.shutdown_requested.load(Ordering::SeqCst) {
                break;
            }
        }
        self.workers.join_all();
    }

    fn route(&self, petition: Petition) {
        if petition.is_error_sentinel() {
            return;
        }

        log::debug!("petition: {}", crate::redact::redact(&petition.line));

        match classify(&petition.line) {
            Intent::ListenerRegister => {
                self.registry.register(self.transport.as_ref(), petition, &self.prompt(), None);
            }
            Intent::LivenessAck => {
                self.registry.sweep_dead(self.transport.as_ref());
                self.finish_inline(petition, OutCode::Ok, b"");
            }
            Intent::RetryConnection | Intent::LoginStateQuery => {
                self.finish_inline(petition, OutCode::Ok, b"");
            }
            Intent::CompletionQuery => {
                let completions = self.complete(&petition.line);
                self.finish_inline(petition, OutCode::Ok, completions.as_bytes());
            }
            Intent::Normal | Intent::Shutdown => {
                let shutdown_requested = Arc::clone(&self.shutdown_requested);
                self.workers.spawn(petition, move |t: &T| {
                    shutdown_requested.store(true, Ordering::SeqCst);
                    t.stop_waiting();
                });
                return;
            }
        }
    }

    fn finish_inline(&self, mut petition: Petition, code: OutCode, body: &[u8]) {
        self.transport.write_result(&mut petition, code, body);
        self.transport.close_petition(petition);
    }

    /// Computes completions inline without spawning a worker (spec.md
    /// §4.2 step 6, §6.1): the word being completed is matched against
    /// the registered command vocabulary by prefix. Joined by a single
    /// space, per the "single space-delimited line" form in §6.1 — the
    /// `0x1F`-delimited list form is a front-end option this doesn't
    /// need to emit.
    fn complete(&self, line: &str) -> String {
        let words = crate::commands::tokenize(line, true);
        let prefix = words.get(1).map(String::as_str).unwrap_or("");
        let mut matches: Vec<&str> =
            self.workers.command_names().into_iter().filter(|name| name.starts_with(prefix)).collect();
        matches.sort_unstable();
        matches.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin::Version;
    use crate::protocol::Confirm;
    use crate::transport::ReplyHandle;
    use std::io;
    use std::sync::Mutex as StdMutex;

    enum ScriptedConn {
        Petition(String),
        Stop,
    }

    struct ScriptedTransport {
        queue: StdMutex<Vec<ScriptedConn>>,
        results: StdMutex<Vec<(i32, Vec<u8>)>>,
        listener_frames: StdMutex<Vec<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(lines: Vec<&str>) -> Self {
            let mut queue: Vec<ScriptedConn> =
                lines.into_iter().map(|l| ScriptedConn::Petition(l.to_string())).collect();
            queue.push(ScriptedConn::Stop);
            ScriptedTransport {
                queue: StdMutex::new(queue),
                results: StdMutex::new(Vec::new()),
                listener_frames: StdMutex::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        type RendezvousConn = String;

        fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn wait_for_petition(&self) -> io::Result<WaitOutcome<String>> {
            let mut queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                return Ok(WaitOutcome::Stopped);
            }
            match queue.remove(0) {
                ScriptedConn::Petition(line) => Ok(WaitOutcome::Connected(line)),
                ScriptedConn::Stop => Ok(WaitOutcome::Stopped),
            }
        }

        fn stop_waiting(&self) {
            self.queue.lock().unwrap().clear();
        }

        fn accept_petition(&self, conn: String) -> Petition {
            Petition::new(conn, ReplyHandle::for_test(0))
        }

        fn write_result(&self, _petition: &mut Petition, code: OutCode, body: &[u8]) {
            self.results.lock().unwrap().push((code.code(), body.to_vec()));
        }

        fn write_partial(&self, _petition: &mut Petition, _bytes: &[u8]) {}

        fn request_confirm(&self, _petition: &mut Petition, _prompt: &str) -> io::Result<Confirm> {
            Ok(Confirm::Yes)
        }

        fn request_string(&self, _petition: &mut Petition, _prompt: &str) -> io::Result<String> {
            Ok(String::new())
        }

        fn inform_listener(&self, _reply: &mut ReplyHandle, frame: &[u8]) -> io::Result<()> {
            self.listener_frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn close_petition(&self, _petition: Petition) {}
    }

    fn dispatcher_with(lines: Vec<&str>) -> (Dispatcher<ScriptedTransport>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(lines));
        let registry = Arc::new(ListenerRegistry::new(200));
        let mut commands = CommandTable::new();
        commands.register("version", Box::new(Version));
        commands.register("exit", Box::new(crate::commands::builtin::Exit));
        let dispatcher = Dispatcher::new(Arc::clone(&transport), registry, commands, 4);
        (dispatcher, transport)
    }

    #[test]
    fn normal_petition_runs_through_a_worker() {
        let (dispatcher, transport) = dispatcher_with(vec!["version"]);
        dispatcher.run();
        let results = transport.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, OutCode::Ok.code());
    }

    #[test]
    fn listener_register_seeds_prompt_and_client_id() {
        let (dispatcher, transport) = dispatcher_with(vec!["registerstatelistener"]);
        dispatcher.run();
        let frames = transport.listener_frames.lock().unwrap();
        let joined: Vec<String> = frames.iter().map(|f| String::from_utf8_lossy(f).to_string()).collect();
        assert!(joined.iter().any(|f| f.starts_with("clientID:")));
        assert!(joined.iter().any(|f| f.starts_with("prompt:")));
    }

    #[test]
    fn shutdown_petition_ends_the_run_loop() {
        let (dispatcher, transport) = dispatcher_with(vec!["exit"]);
        dispatcher.run();
        let results = transport.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, OutCode::Ok.code());
    }

    #[test]
    fn liveness_ack_sweeps_and_closes_without_a_worker() {
        let (dispatcher, transport) = dispatcher_with(vec!["sendack"]);
        dispatcher.run();
        let results = transport.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, OutCode::Ok.code());
    }
}
