//! Core petition broker and state-distribution layer for MEGAcmd's
//! server-side daemon (spec.md §1). The library crate exposes the pieces
//! `src/main.rs` wires together; front-end shells and one-shot CLIs are
//! out of scope and connect to this daemon purely over the transport.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod paths;
pub mod petition;
pub mod protocol;
pub mod redact;
pub mod registry;
pub mod sync;
pub mod transport;
pub mod worker;
