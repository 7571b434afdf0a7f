//! Log redaction (spec.md §6.5).
//!
//! Applied to a raw command line before it is committed to any log sink
//! (the dispatcher's accept-loop trace, and any command that logs its
//! own invocation), grounded in the teacher-pack's tag-redaction pattern
//! in `datadog-trace-obfuscation/src/replacer.rs` — compiled `regex`
//! patterns held in `lazy_static`, applied with `replace_all`.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    /// `login`, `passwd`, `confirm`, `confirmcancel`, with or without the
    /// leading interactive sentinel, plus everything that follows.
    static ref CREDENTIAL_COMMAND: Regex =
        Regex::new(r"(?i)^(X?)(login|passwd|confirmcancel|confirm)(\s+\S.*)?$").unwrap();

    /// `--password=`, `--auth-code=`, `--auth-key=` option values,
    /// quoted or bare.
    static ref SECRET_OPTION: Regex = Regex::new(
        r#"--(password|auth-code|auth-key)=("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|\S+)"#,
    )
    .unwrap();

    /// The key (and optional auth) component of a MEGA URL:
    /// `https://mega.nz/{file|folder|#|#F|#P}/<handle>#<key>[:<auth>]`.
    /// `#F`/`#P` must be tried before the bare `#` alternative.
    static ref MEGA_URL_KEY: Regex = Regex::new(
        r"(https://mega\.nz/(?:file|folder|#F|#P|#)/[A-Za-z0-9_-]+#)([^:\s]+)(?::([^\s]+))?",
    )
    .unwrap();
}

/// Redacts a raw command line per §6.5's three rules. Idempotent: a
/// line already containing `<REDACTED>`/`********` redacts to itself.
pub fn redact(line: &str) -> String {
    if let Some(caps) = CREDENTIAL_COMMAND.captures(line) {
        if caps.get(3).is_some() {
            let sentinel = caps.get(1).map_or("", |m| m.as_str());
            let command = &caps[2];
            return format!("{sentinel}{command} <REDACTED>");
        }
        return line.to_string();
    }

    let line = SECRET_OPTION.replace_all(line, |caps: &Captures| format!("--{}=********", &caps[1]));

    MEGA_URL_KEY
        .replace_all(&line, |caps: &Captures| {
            let prefix = &caps[1];
            match caps.get(3) {
                Some(_) => format!("{prefix}********:********"),
                None => format!("{prefix}********"),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_login_argument_entirely() {
        let out = redact("login alice@example.com hunter2");
        assert_eq!(out, "login <REDACTED>");
        assert!(!out.contains("alice@example.com"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn redacts_interactive_sentinel_prefixed_credential_commands() {
        assert_eq!(redact("Xpasswd oldpass newpass"), "Xpasswd <REDACTED>");
    }

    #[test]
    fn bare_login_with_no_argument_is_left_alone() {
        assert_eq!(redact("login"), "login");
    }

    #[test]
    fn redacts_password_auth_code_and_auth_key_options() {
        assert_eq!(redact("put --password=hunter2 file.txt"), "put --password=******** file.txt");
        assert_eq!(redact("get --auth-code=123456 /x"), "get --auth-code=******** /x");
        assert_eq!(redact("foo --auth-key=abcdef"), "foo --auth-key=********");
    }

    #[test]
    fn redacts_quoted_password_option_value() {
        assert_eq!(
            redact(r#"put --password="hunter two" file.txt"#),
            "put --password=******** file.txt"
        );
    }

    #[test]
    fn redacts_mega_url_key_and_auth() {
        let out = redact("open https://mega.nz/file/AbC123#thekey:theauth please");
        assert_eq!(out, "open https://mega.nz/file/AbC123#********:******** please");
    }

    #[test]
    fn redacts_mega_url_key_without_auth() {
        let out = redact("open https://mega.nz/folder/AbC123#thekey please");
        assert_eq!(out, "open https://mega.nz/folder/AbC123#******** please");
    }

    #[test]
    fn does_not_redact_unrelated_commands() {
        assert_eq!(redact("ls -l /Documents"), "ls -l /Documents");
    }
}
