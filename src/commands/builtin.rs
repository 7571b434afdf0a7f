//! Representative built-in commands.
//!
//! The SDK these would normally drive (remote storage, sync engine,
//! transfer queue) is an explicit Non-goal; what's here is just enough
//! to exercise the worker pool, confirmation/string prompts, and
//! listener fan-out end-to-end: `version`, `ls`, `rm`, `help`, and
//! `exit`/`quit`. They operate against an in-memory stub node tree
//! rather than any real storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::protocol::{Confirm, OutCode};
use crate::transport::Transport;

use super::{CommandHandler, CommandSpec, ParsedArgs, WorkerContext};

/// A toy remote filesystem: paths map to their direct children.
pub struct StubTree {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl StubTree {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), vec!["Documents".to_string(), "Photos".to_string()]);
        entries.insert("/Documents".to_string(), vec!["notes.txt".to_string()]);
        entries.insert("/Photos".to_string(), Vec::new());
        StubTree { entries: Mutex::new(entries) }
    }

    pub fn list(&self, path: &str) -> Option<Vec<String>> {
        self.entries.lock().unwrap().get(path).cloned()
    }

    pub fn remove(&self, path: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some((parent, name)) = path.rsplit_once('/') else {
            return false;
        };
        let parent = if parent.is_empty() { "/" } else { parent };
        let removed = entries.get_mut(parent).is_some_and(|children| {
            let before = children.len();
            children.retain(|c| c != name);
            children.len() != before
        });
        if removed {
            entries.remove(path);
        }
        removed
    }
}

impl Default for StubTree {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Version;

impl<T: Transport + ?Sized> CommandHandler<T> for Version {
    fn spec(&self) -> &CommandSpec {
        const SPEC: CommandSpec = CommandSpec { name: "version", flags: &[], options: &[] };
        &SPEC
    }

    fn run(&self, ctx: &mut WorkerContext<T>, _args: ParsedArgs) -> OutCode {
        ctx.emit(concat!("MEGAcmd/", env!("CARGO_PKG_VERSION"), "\n"));
        OutCode::Ok
    }
}

pub struct Ls {
    pub tree: Arc<StubTree>,
}

impl<T: Transport + ?Sized> CommandHandler<T> for Ls {
    fn spec(&self) -> &CommandSpec {
        const SPEC: CommandSpec = CommandSpec { name: "ls", flags: &["R", "r", "l", "use-pcre"], options: &[] };
        &SPEC
    }

    fn run(&self, ctx: &mut WorkerContext<T>, args: ParsedArgs) -> OutCode {
        let path = args.positional.first().map(String::as_str).unwrap_or("/");
        match self.tree.list(path) {
            Some(children) => {
                for child in children {
                    ctx.emit(&child);
                    ctx.emit("\n");
                }
                OutCode::Ok
            }
            None => {
                ctx.emit(&format!("ls: {path}: no such folder\n"));
                OutCode::NotFound
            }
        }
    }
}

pub struct Rm {
    pub tree: Arc<StubTree>,
}

impl<T: Transport + ?Sized> CommandHandler<T> for Rm {
    fn spec(&self) -> &CommandSpec {
        const SPEC: CommandSpec = CommandSpec { name: "rm", flags: &["r", "f", "use-pcre"], options: &[] };
        &SPEC
    }

    fn run(&self, ctx: &mut WorkerContext<T>, args: ParsedArgs) -> OutCode {
        let Some(path) = args.positional.first() else {
            ctx.emit("rm: missing argument\n");
            return OutCode::EArgs;
        };

        if !args.flag("f") {
            match ctx.request_confirm(&format!("Remove {path}?")) {
                Ok(Confirm::Yes) | Ok(Confirm::All) => {}
                Ok(_) => {
                    ctx.emit("rm: cancelled\n");
                    return OutCode::Ok;
                }
                Err(_) => return OutCode::Unexpected,
            }
        }

        if self.tree.remove(path) {
            OutCode::Ok
        } else {
            ctx.emit(&format!("rm: {path}: no such file or folder\n"));
            OutCode::NotFound
        }
    }
}

pub struct Help;

impl<T: Transport + ?Sized> CommandHandler<T> for Help {
    fn spec(&self) -> &CommandSpec {
        const SPEC: CommandSpec =
            CommandSpec { name: "help", flags: &["f", "non-interactive", "upgrade", "unicode"], options: &[] };
        &SPEC
    }

    fn run(&self, ctx: &mut WorkerContext<T>, _args: ParsedArgs) -> OutCode {
        ctx.emit("Available commands: version, ls, rm, help, exit, quit\n");
        OutCode::Ok
    }
}

pub struct Exit;

impl<T: Transport + ?Sized> CommandHandler<T> for Exit {
    fn spec(&self) -> &CommandSpec {
        const SPEC: CommandSpec = CommandSpec { name: "exit", flags: &["only-shell"], options: &[] };
        &SPEC
    }

    fn run(&self, ctx: &mut WorkerContext<T>, _args: ParsedArgs) -> OutCode {
        ctx.emit("bye\n");
        OutCode::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_tree_lists_seeded_entries() {
        let tree = StubTree::new();
        assert_eq!(tree.list("/").unwrap(), vec!["Documents", "Photos"]);
    }

    #[test]
    fn stub_tree_remove_detaches_from_parent() {
        let tree = StubTree::new();
        assert!(tree.remove("/Documents/notes.txt"));
        assert_eq!(tree.list("/Documents").unwrap(), Vec::<String>::new());
        assert!(!tree.remove("/Documents/notes.txt"));
    }
}
