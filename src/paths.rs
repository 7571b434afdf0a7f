//! Rendezvous endpoint naming (spec.md §6.3).
//!
//! Resolves where the single process-global rendezvous endpoint lives:
//! a Unix-domain socket path on POSIX, a named-pipe name on Windows.
//! Both derive from [`crate::config::Config`] (environment variables
//! layered under CLI flags, per §6.4) rather than reading the process
//! environment directly, so tests can exercise the resolution logic
//! without mutating global state.

use std::path::{Path, PathBuf};

use crate::config::Config;

pub const DEFAULT_SOCKET_NAME: &str = "megacmd.socket";

/// Conservative bound on `sockaddr_un.sun_path`, which varies by libc
/// (108 bytes on Linux, 104 on most BSDs/macOS). We pick the smaller of
/// the two so the fallback triggers everywhere it would matter.
const MAX_SUN_PATH: usize = 104;

/// The uid-scoped fallback used both when no other runtime dir is
/// available and when the preferred path would overflow `sun_path`.
fn uid_runtime_fallback() -> PathBuf {
    #[cfg(unix)]
    let uid = unsafe { libc::getuid() };
    #[cfg(not(unix))]
    let uid = 0u32;
    let tmpdir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(tmpdir).join(format!("megacmd-{uid}"))
}

/// Resolves the runtime directory in decreasing priority (§6.3):
/// an explicit `MEGACMD_WORKING_DIR` override, else
/// `XDG_RUNTIME_DIR/megacmd`, else the user's cache-equivalent
/// directory, else `${TMPDIR:-/tmp}/megacmd-<uid>`.
pub fn runtime_dir(config: &Config) -> PathBuf {
    if let Some(dir) = &config.working_dir_override {
        return dir.clone();
    }
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("megacmd");
        }
    }
    if let Some(cache) = dirs::cache_dir() {
        return cache.join("megacmd");
    }
    uid_runtime_fallback()
}

/// Resolves the full rendezvous socket path, falling back to the
/// uid-scoped `/tmp` directory if the preferred candidate would overflow
/// `sockaddr_un.sun_path`.
pub fn socket_path(config: &Config) -> PathBuf {
    let primary = runtime_dir(config).join(&config.socket_name);
    if fits_sun_path(&primary) {
        primary
    } else {
        uid_runtime_fallback().join(&config.socket_name)
    }
}

fn fits_sun_path(path: &Path) -> bool {
    path.as_os_str().len() < MAX_SUN_PATH
}

/// The rendezvous named-pipe name: `\\.\pipe\megacmdpipe_<username>[_<suffix>]`.
#[cfg(windows)]
pub fn pipe_name(config: &Config) -> String {
    let user = std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string());
    let mut name = format!(r"\\.\pipe\megacmdpipe_{user}");
    if let Some(suffix) = &config.pipe_suffix {
        name.push('_');
        name.push_str(suffix);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that
    // touch them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn socket_path_joins_runtime_dir_and_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        config.working_dir_override = Some(PathBuf::from("/tmp/megacmd-test-dir"));
        config.socket_name = "custom.socket".to_string();

        let path = socket_path(&config);
        assert_eq!(path, PathBuf::from("/tmp/megacmd-test-dir/custom.socket"));
    }

    #[test]
    fn working_dir_override_takes_priority_over_xdg() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let mut config = Config::default();
        config.working_dir_override = Some(PathBuf::from("/explicit/override"));

        assert_eq!(runtime_dir(&config), PathBuf::from("/explicit/override"));
        std::env::remove_var("XDG_RUNTIME_DIR");
    }

    #[test]
    fn falls_back_to_xdg_runtime_dir_when_no_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let config = Config::default();

        assert_eq!(runtime_dir(&config), PathBuf::from("/run/user/1000/megacmd"));
        std::env::remove_var("XDG_RUNTIME_DIR");
    }

    #[test]
    fn overflowing_sun_path_falls_back_to_uid_tmp_dir() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("XDG_RUNTIME_DIR");
        std::env::set_var("TMPDIR", "/tmp");
        let mut config = Config::default();
        config.working_dir_override = Some(PathBuf::from("/".to_string() + &"x".repeat(200)));

        let path = socket_path(&config);
        assert!(path.starts_with("/tmp/megacmd-"));
    }

    #[test]
    fn fits_sun_path_respects_the_conservative_bound() {
        assert!(fits_sun_path(Path::new("/run/user/1000/megacmd/megacmd.socket")));
        assert!(!fits_sun_path(Path::new(&("/".to_string() + &"x".repeat(200)))));
    }
}
