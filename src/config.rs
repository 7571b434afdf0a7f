//! Ambient configuration (spec.md §3.1 [ADDED], §6.4).
//!
//! An explicitly-constructed struct, not a global: environment variables
//! are layered over defaults here, then `src/main.rs` layers CLI flags on
//! top before threading the result into the transport, dispatcher, and
//! registry constructors. Mirrors the teacher's `Config::load()` →
//! `apply_env_overrides()` layering in `cli/src/config.rs`, minus the
//! on-disk persistence that component handles — config persistence is an
//! explicit Non-goal here (spec.md §1).

use std::path::PathBuf;

/// Parsed form of `MEGACMD_LOGLEVEL` / `--loglevel` (spec.md §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses the spec's `{DEBUG, FULLDEBUG, VERBOSE, FULLVERBOSE}`
    /// vocabulary plus the conventional `log` crate level names, so
    /// both `MEGACMD_LOGLEVEL` and `--loglevel` accept either.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Some(LogLevel::Off),
            "ERROR" => Some(LogLevel::Error),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "INFO" | "VERBOSE" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" | "FULLDEBUG" | "FULLVERBOSE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

const DEFAULT_MAX_WORKERS: usize = 100;
const DEFAULT_MAX_LISTENERS: usize = 200;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bounds the command-worker pool (spec.md §5, default 100).
    pub max_workers: usize,
    /// Bounds the listener registry absent a sampleable `RLIMIT_NOFILE`
    /// (spec.md §4.4, default 200).
    pub max_listeners_default: usize,
    /// `MEGACMD_SOCKET_NAME`: overrides the Unix rendezvous socket's
    /// filename.
    pub socket_name: String,
    /// `MEGACMD_PIPE_SUFFIX`: appended to the Windows rendezvous pipe
    /// name.
    pub pipe_suffix: Option<String>,
    /// `MEGACMD_WORKING_DIR`: overrides the resolved runtime directory
    /// outright (spec.md §6.3 resolution order).
    pub working_dir_override: Option<PathBuf>,
    /// `MEGACMD_WORKING_FOLDER_SUFFIX`: Windows config-dir suffix,
    /// carried through for external collaborators that resolve
    /// configuration paths; unused by the core broker itself.
    pub working_folder_suffix: Option<String>,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_workers: DEFAULT_MAX_WORKERS,
            max_listeners_default: DEFAULT_MAX_LISTENERS,
            socket_name: crate::paths::DEFAULT_SOCKET_NAME.to_string(),
            pipe_suffix: None,
            working_dir_override: None,
            working_folder_suffix: None,
            log_level: LogLevel::Error,
        }
    }
}

impl Config {
    /// Loads defaults overlaid with environment variables (spec.md
    /// §6.4). The caller (`main.rs`) applies CLI-flag overrides on top.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("MEGACMD_SOCKET_NAME") {
            if !name.is_empty() {
                self.socket_name = name;
            }
        }
        if let Ok(suffix) = std::env::var("MEGACMD_PIPE_SUFFIX") {
            if !suffix.is_empty() {
                self.pipe_suffix = Some(suffix);
            }
        }
        if let Ok(dir) = std::env::var("MEGACMD_WORKING_DIR") {
            if !dir.is_empty() {
                self.working_dir_override = Some(PathBuf::from(dir));
            }
        }
        if let Ok(suffix) = std::env::var("MEGACMD_WORKING_FOLDER_SUFFIX") {
            if !suffix.is_empty() {
                self.working_folder_suffix = Some(suffix);
            }
        }
        if let Ok(level) = std::env::var("MEGACMD_LOGLEVEL") {
            if let Some(parsed) = LogLevel::parse(&level) {
                self.log_level = parsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec_values() {
        let config = Config::default();
        assert_eq!(config.max_workers, 100);
        assert_eq!(config.max_listeners_default, 200);
        assert_eq!(config.socket_name, "megacmd.socket");
        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn env_overrides_socket_name_and_log_level() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MEGACMD_SOCKET_NAME", "custom.socket");
        std::env::set_var("MEGACMD_LOGLEVEL", "FULLVERBOSE");

        let config = Config::load();
        assert_eq!(config.socket_name, "custom.socket");
        assert_eq!(config.log_level, LogLevel::Trace);

        std::env::remove_var("MEGACMD_SOCKET_NAME");
        std::env::remove_var("MEGACMD_LOGLEVEL");
    }

    #[test]
    fn unrecognized_loglevel_leaves_default_in_place() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MEGACMD_LOGLEVEL", "bogus");
        let config = Config::load();
        assert_eq!(config.log_level, LogLevel::Error);
        std::env::remove_var("MEGACMD_LOGLEVEL");
    }

    #[test]
    fn log_level_parses_spec_vocabulary_case_insensitively() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("FULLDEBUG"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("Verbose"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("nonsense"), None);
    }
}
