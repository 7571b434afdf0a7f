//! Command Worker pool (spec.md §4.3).
//!
//! One OS thread per in-flight petition, bounded by `max_workers` via
//! [`crate::sync::CountingSemaphore`]. Mirrors the teacher's
//! `hub/workers.rs` shape — `thread::spawn` plus a shared shutdown flag
//! and a `Vec<JoinHandle<_>>` the owner reaps — generalized from one
//! fixed worker per concern to a pool sized at runtime. Listener
//! registration and fan-out are handled by the dispatcher before a
//! petition ever reaches a worker (spec.md §4.2), so the pool itself
//! only needs the transport and the command table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::commands::{parse_args, tokenize, CommandHandler, WorkerContext};
use crate::petition::{classify, Intent, Petition};
use crate::protocol::OutCode;
use crate::sync::CountingSemaphore;
use crate::transport::Transport;

/// Maps a command's leading word to its handler.
pub struct CommandTable<T: Transport + ?Sized> {
    handlers: HashMap<&'static str, Box<dyn CommandHandler<T>>>,
}

impl<T: Transport + ?Sized> CommandTable<T> {
    pub fn new() -> Self {
        CommandTable { handlers: HashMap::new() }
    }

    pub fn register(&mut self, name: &'static str, handler: Box<dyn CommandHandler<T>>) {
        self.handlers.insert(name, handler);
    }

    fn get(&self, name: &str) -> Option<&dyn CommandHandler<T>> {
        self.handlers.get(name).map(|b| b.as_ref())
    }

    /// Every registered command name, for completion (spec.md §4.2 step 6).
    pub fn command_names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

impl<T: Transport + ?Sized> Default for CommandTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkerPool<T: Transport + 'static + ?Sized> {
    transport: Arc<T>,
    commands: Arc<CommandTable<T>>,
    semaphore: Arc<CountingSemaphore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport + 'static + ?Sized> WorkerPool<T> {
    pub fn new(transport: Arc<T>, commands: CommandTable<T>, max_workers: usize) -> Self {
        WorkerPool {
            transport,
            commands: Arc::new(commands),
            semaphore: Arc::new(CountingSemaphore::new(max_workers)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Acquires a worker slot (blocking if the pool is saturated) and
    /// spawns a thread to run `petition` to completion.
    ///
    /// `on_shutdown` is invoked from the worker thread when the petition
    /// was a shutdown request, so the caller (the dispatcher) can
    /// unblock its own `wait_for_petition()` call.
    pub fn spawn(&self, petition: Petition, on_shutdown: impl Fn(&T) + Send + 'static) {
        self.semaphore.acquire();

        let transport = Arc::clone(&self.transport);
        let commands = Arc::clone(&self.commands);
        let semaphore = Arc::clone(&self.semaphore);

        let handle = thread::spawn(move || {
            run_worker(&transport, &commands, petition, &on_shutdown);
            semaphore.release();
        });

        self.handles.lock().unwrap().push(handle);
    }

    /// Joins and drops any worker threads that have already finished
    /// (spec.md §4.2 step 5).
    pub fn reap_finished(&self) {
        let mut handles = self.handles.lock().unwrap();
        let mut still_running = Vec::with_capacity(handles.len());
        for handle in handles.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                still_running.push(handle);
            }
        }
        *handles = still_running;
    }

    /// Blocks until every in-flight worker has finished, for a clean
    /// shutdown drain.
    pub fn join_all(&self) {
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Every registered command name, for completion (spec.md §4.2 step 6).
    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands.command_names()
    }
}

fn run_worker<T: Transport + ?Sized>(
    transport: &T,
    commands: &CommandTable<T>,
    mut petition: Petition,
    on_shutdown: &(impl Fn(&T) + Send + 'static),
) {
    let intent = classify(&petition.line);
    let words = tokenize(&petition.line, false);
    let Some(name) = words.first().cloned() else {
        transport.write_result(&mut petition, OutCode::EArgs, b"");
        transport.close_petition(petition);
        return;
    };

    let handler = commands.get(&name);
    let mut ctx = WorkerContext::new(transport, &mut petition);

    let out_code = match handler {
        None => {
            ctx.emit(&format!("{name}: command not found\n"));
            OutCode::EArgs
        }
        Some(handler) => match parse_args(handler.spec(), &words[1..]) {
            Err(usage) => {
                ctx.emit(&usage);
                ctx.emit("\n");
                OutCode::EArgs
            }
            Ok(args) => handler.run(&mut ctx, args),
        },
    };

    let body = ctx.into_body();
    transport.write_result(&mut petition, out_code, &body);
    transport.close_petition(petition);

    if intent == Intent::Shutdown {
        on_shutdown(transport);
    }
}
