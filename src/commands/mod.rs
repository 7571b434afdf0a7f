//! Command dispatch boundary (spec.md §4.3.3).
//!
//! Individual command semantics sit outside this crate's scope; what
//! lives here is the seam the worker pool calls through, grounded in
//! the teacher's dispatch-by-action-kind pattern in
//! `hub/actions/*_handlers.rs` (one small struct per action, a shared
//! context threaded through each `handle(...)` call).

pub mod builtin;

use std::collections::{HashMap, HashSet};
use std::io;

use crate::protocol::{Confirm, OutCode};
use crate::transport::Transport;

/// Declares the flags and value-bearing options a command recognizes
/// (spec.md §4.3.1).
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub flags: &'static [&'static str],
    pub options: &'static [&'static str],
}

/// The result of tokenizing and separating a command line against a
/// [`CommandSpec`].
#[derive(Debug, Clone, Default)]
pub struct ParsedArgs {
    pub positional: Vec<String>,
    flags: HashSet<String>,
    options: HashMap<String, String>,
}

impl ParsedArgs {
    pub fn flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

/// Splits a command line into words (spec.md §4.3 step 3).
///
/// Double and single quotes pair; a backslash-escaped space survives
/// inside an unquoted word. Trailing whitespace is only preserved when
/// `keep_trailing` is set, which completion computation needs and
/// ordinary dispatch does not.
pub fn tokenize(line: &str, keep_trailing: bool) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                quote = None;
            }
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' if chars.peek() == Some(&' ') => {
                    current.push(' ');
                    chars.next();
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if in_word || (keep_trailing && !current.is_empty()) {
        words.push(current);
    } else if keep_trailing && line.ends_with(char::is_whitespace) {
        words.push(String::new());
    }

    words
}

/// Separates global flags (`-v`, `--help`) from the remaining words,
/// then parses the rest against `spec` (spec.md §4.3 step 4).
///
/// Returns `Err` with a usage line when a token begins with `-` and is
/// not in the declared flag/option set.
pub fn parse_args(spec: &CommandSpec, words: &[String]) -> Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();

    for word in words {
        if let Some(rest) = word.strip_prefix("--") {
            if let Some((key, value)) = rest.split_once('=') {
                if spec.options.contains(&key) {
                    parsed.options.insert(key.to_string(), value.to_string());
                    continue;
                }
                return Err(format!("{}: unrecognized option --{key}", spec.name));
            }
            if spec.flags.contains(&rest) {
                parsed.flags.insert(rest.to_string());
                continue;
            }
            if spec.options.contains(&rest) {
                // A value-bearing option given without `=value` still
                // registers as present; some front-end invocations pass
                // `--clientID` to mean "echo the ambient one".
                parsed.flags.insert(rest.to_string());
                continue;
            }
            return Err(format!("{}: unrecognized option --{rest}", spec.name));
        } else if let Some(rest) = word.strip_prefix('-') {
            if rest.is_empty() || rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                // A bare `-` or a negative number is positional, not a flag.
                parsed.positional.push(word.clone());
                continue;
            }
            if spec.flags.contains(&rest) {
                parsed.flags.insert(rest.to_string());
                continue;
            }
            return Err(format!("{}: unrecognized flag -{rest}", spec.name));
        } else {
            parsed.positional.push(word.clone());
        }
    }

    Ok(parsed)
}

/// Per-command ambient context (spec.md §4.3 step 1): the OUTSTREAM
/// sink, log level, out-code, and the petition being serviced.
pub struct WorkerContext<'a, T: Transport + ?Sized> {
    transport: &'a T,
    petition: &'a mut crate::petition::Petition,
    pub log_level: log::Level,
    pub out_code: OutCode,
    body: Vec<u8>,
}

impl<'a, T: Transport + ?Sized> WorkerContext<'a, T> {
    pub fn new(transport: &'a T, petition: &'a mut crate::petition::Petition) -> Self {
        WorkerContext {
            transport,
            petition,
            log_level: log::Level::Error,
            out_code: OutCode::Ok,
            body: Vec::new(),
        }
    }

    /// Appends `text` to the command's final reply body (spec.md §4.3
    /// step 1) — the original's `OUTSTRINGSTREAM`, flushed once as the
    /// terminal frame.
    pub fn emit(&mut self, text: &str) {
        self.body.extend_from_slice(text.as_bytes());
    }

    /// Streams `text` immediately as a `PARTIAL` frame, independent of
    /// the terminal body (spec.md §4.3 step 1, §8's concatenation
    /// property) — the original's separate `LoggedStreamPartialOutputs`.
    /// Never also appended to `body`: a front-end reconstructs a
    /// command's full output by concatenating every `PARTIAL` frame with
    /// the terminal frame, not by picking one or the other.
    pub fn stream_partial(&mut self, text: &str) {
        self.transport.write_partial(self.petition, text.as_bytes());
    }

    pub fn request_confirm(&mut self, prompt: &str) -> io::Result<Confirm> {
        self.transport.request_confirm(self.petition, prompt)
    }

    pub fn request_string(&mut self, prompt: &str) -> io::Result<String> {
        self.transport.request_string(self.petition, prompt)
    }

    pub fn client_id(&self) -> Option<u64> {
        self.petition.client_id
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// External command collaborator (spec.md §4.3.3).
///
/// `Send + Sync` because the command table is shared across worker
/// threads behind an `Arc` (spec.md §5: fixed-capacity worker pool).
pub trait CommandHandler<T: Transport + ?Sized>: Send + Sync {
    fn spec(&self) -> &CommandSpec;
    fn run(&self, ctx: &mut WorkerContext<T>, args: ParsedArgs) -> OutCode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_pairs_double_and_single_quotes() {
        let words = tokenize(r#"share "My Folder" 'with spaces'"#, false);
        assert_eq!(words, vec!["share", "My Folder", "with spaces"]);
    }

    #[test]
    fn tokenize_keeps_backslash_escaped_spaces() {
        let words = tokenize(r"ls foo\ bar", false);
        assert_eq!(words, vec!["ls", "foo bar"]);
    }

    #[test]
    fn tokenize_drops_trailing_whitespace_unless_asked_to_keep_it() {
        assert_eq!(tokenize("ls foo ", false), vec!["ls", "foo"]);
        assert_eq!(tokenize("ls foo ", true), vec!["ls", "foo", ""]);
    }

    #[test]
    fn parse_args_rejects_undeclared_flags() {
        let spec = CommandSpec { name: "ls", flags: &["l", "R"], options: &[] };
        let words = tokenize("ls -l -z", false);
        assert!(parse_args(&spec, &words[1..].to_vec()).is_err());
    }

    #[test]
    fn parse_args_recognizes_declared_key_value_options() {
        let spec = CommandSpec { name: "put", flags: &["q"], options: &["clientID"] };
        let words = tokenize("put --clientID=7 -q /tmp/file", false);
        let parsed = parse_args(&spec, &words[1..].to_vec()).unwrap();
        assert_eq!(parsed.option("clientID"), Some("7"));
        assert!(parsed.flag("q"));
        assert_eq!(parsed.positional, vec!["/tmp/file"]);
    }

    #[test]
    fn parse_args_overrides_on_repeated_key() {
        let spec = CommandSpec { name: "put", flags: &[], options: &["clientID"] };
        let words = tokenize("put --clientID=1 --clientID=2", false);
        let parsed = parse_args(&spec, &words[1..].to_vec()).unwrap();
        assert_eq!(parsed.option("clientID"), Some("2"));
    }
}
