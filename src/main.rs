//! `megacmd-server`: petition broker and state-distribution daemon
//! (spec.md §1). Parses the CLI surface, layers it over `Config::load()`
//! (spec.md §3.1), then wires up the platform transport, listener
//! registry, command table, and dispatcher — grounded in the teacher's
//! `Config::load()` → CLI-flag-override pattern in `botster_hub_rs/src/main.rs`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use megacmd_server::commands::builtin::{Exit, Help, Ls, Rm, StubTree, Version};
use megacmd_server::config::{Config, LogLevel};
use megacmd_server::dispatcher::Dispatcher;
use megacmd_server::paths;
use megacmd_server::registry::ListenerRegistry;
use megacmd_server::transport::Transport;
use megacmd_server::worker::CommandTable;

#[cfg(unix)]
use megacmd_server::transport::unix::UnixTransport;
#[cfg(windows)]
use megacmd_server::transport::windows::WindowsPipeTransport;

/// Petition broker and state-distribution daemon for MEGAcmd front-ends.
#[derive(Parser)]
#[command(name = "megacmd-server", version, about = "MEGAcmd petition broker daemon")]
struct Cli {
    /// Log verbosity: off, error, warn, info, debug, trace (or the
    /// MEGAcmd vocabulary: DEBUG, FULLDEBUG, VERBOSE, FULLVERBOSE).
    /// Falls back to `MEGACMD_LOGLEVEL`, then `error`.
    #[arg(long)]
    loglevel: Option<String>,

    /// Overrides the rendezvous socket/pipe name (`MEGACMD_SOCKET_NAME`).
    #[arg(long)]
    socket_name: Option<String>,

    /// Maximum number of concurrently running command workers (default 100).
    #[arg(long)]
    max_workers: Option<usize>,

    /// Maximum number of simultaneously registered state listeners
    /// (default 200, or 0.80 × RLIMIT_NOFILE where available).
    #[arg(long)]
    max_listeners: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = apply_cli_overrides(Config::load(), &cli);

    env_logger::Builder::new().filter_level(config.log_level.as_filter()).init();

    let registry = Arc::new(ListenerRegistry::new(config.max_listeners_default));

    #[cfg(unix)]
    {
        let socket_path = paths::socket_path(&config);
        let runtime_dir = socket_path
            .parent()
            .context("resolved socket path has no parent directory")?
            .to_path_buf();
        let transport = Arc::new(UnixTransport::new(socket_path, runtime_dir, Arc::clone(&registry)));
        transport.init().context("failed to bind rendezvous socket")?;

        let commands = build_commands::<UnixTransport>();
        let dispatcher = Dispatcher::new(transport, registry, commands, config.max_workers);
        dispatcher.run();
    }

    #[cfg(windows)]
    {
        let transport = Arc::new(WindowsPipeTransport::new(paths::pipe_name(&config)));
        transport.init().context("failed to create rendezvous pipe")?;

        let commands = build_commands::<WindowsPipeTransport>();
        let dispatcher = Dispatcher::new(transport, registry, commands, config.max_workers);
        dispatcher.run();
    }

    Ok(())
}

fn apply_cli_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(name) = &cli.socket_name {
        config.socket_name = name.clone();
    }
    if let Some(n) = cli.max_workers {
        config.max_workers = n;
    }
    if let Some(n) = cli.max_listeners {
        config.max_listeners_default = n;
    }
    if let Some(level) = cli.loglevel.as_deref().and_then(LogLevel::parse) {
        config.log_level = level;
    }
    config
}

/// Builds the representative built-in command table (spec.md §4.3.3);
/// the real command set is an external collaborator out of this crate's
/// scope (spec.md §1).
fn build_commands<T: Transport + ?Sized + 'static>() -> CommandTable<T> {
    let mut commands = CommandTable::new();
    let tree = Arc::new(StubTree::new());
    commands.register("version", Box::new(Version));
    commands.register("ls", Box::new(Ls { tree: Arc::clone(&tree) }));
    commands.register("rm", Box::new(Rm { tree }));
    commands.register("help", Box::new(Help));
    commands.register("exit", Box::new(Exit));
    commands.register("quit", Box::new(Exit));
    commands
}
