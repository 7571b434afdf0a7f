//! Return-channel wire protocol: tag codes, out-codes, and frame framing.
//!
//! Every petition's reply endpoint carries zero-or-more non-terminal
//! frames (`PARTIAL`, `REQCONFIRM`, `REQSTRING`) followed by exactly one
//! terminal reply frame. All integers are host-endian: both peers of this
//! IPC are always the same machine.

use std::io::{self, Read, Write};

/// Tag codes for non-terminal frames on a petition's reply endpoint.
///
/// These values are reserved and must never appear as a terminal
/// [`OutCode`].
pub mod tag {
    /// Confirmation request (`{YES,NO,ALL,NONE}`).
    pub const REQCONFIRM: i32 = -60;
    /// Free-form string request.
    pub const REQSTRING: i32 = -61;
    /// Partial (streamed) output chunk.
    pub const PARTIAL: i32 = -62;
}

/// Outcome of a command, surfaced in the terminal reply frame and (as
/// `|code|`) as the front-end's process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutCode {
    Ok,
    EArgs,
    InvalidEmail,
    NotFound,
    InvalidState,
    InvalidType,
    NotPermitted,
    NotLoggedIn,
    NoFetch,
    Unexpected,
    ReqRestart,
}

impl OutCode {
    /// The server-internal negative representation (§6.1 table).
    pub const fn code(self) -> i32 {
        match self {
            OutCode::Ok => 0,
            OutCode::EArgs => -51,
            OutCode::InvalidEmail => -52,
            OutCode::NotFound => -53,
            OutCode::InvalidState => -54,
            OutCode::InvalidType => -55,
            OutCode::NotPermitted => -56,
            OutCode::NotLoggedIn => -57,
            OutCode::NoFetch => -58,
            OutCode::Unexpected => -59,
            OutCode::ReqRestart => -71,
        }
    }

    /// The front-end-visible process exit code: `|code|`.
    pub const fn exit_code(self) -> i32 {
        self.code().abs()
    }
}

/// Answer to a `REQCONFIRM` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    No = 0,
    Yes = 1,
    All = 2,
    None = 3,
}

impl Confirm {
    /// Parse one line of front-end input per §4.5: case-insensitive
    /// `{yes,y,no,n,all,a,none}`. Returns `None` for unrecognized input;
    /// the caller is expected to keep reading lines until one matches.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => Some(Confirm::Yes),
            "no" | "n" => Some(Confirm::No),
            "all" | "a" => Some(Confirm::All),
            "none" => Some(Confirm::None),
            _ => None,
        }
    }

    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Confirm::No),
            1 => Some(Confirm::Yes),
            2 => Some(Confirm::All),
            3 => Some(Confirm::None),
            _ => None,
        }
    }
}

/// Floors a body length to at least 1 byte, zero-padding if necessary.
///
/// Preserves a present-but-unexplained behavior from the original source
/// (§9 Open Question): some client stacks stall on a zero-length `recv`,
/// so an empty body is padded with a single `0x00` byte rather than sent
/// empty. Do not remove this even though the rationale is unverified.
pub fn floor_pad(mut body: Vec<u8>) -> Vec<u8> {
    if body.is_empty() {
        body.push(0);
    }
    body
}

/// Writes a `REQCONFIRM`/`REQSTRING`-style prompt frame: `[i32 tag][bytes prompt]`.
///
/// The sender closes its write half (or, for our local IPC, the peer
/// simply knows to switch to read-a-line mode) immediately after; this
/// helper does not close anything itself, since the reply endpoint is
/// reused for the terminal frame afterward.
pub fn write_prompt_frame<W: Write>(w: &mut W, tag: i32, prompt: &[u8]) -> io::Result<()> {
    w.write_all(&tag.to_ne_bytes())?;
    w.write_all(prompt)?;
    w.flush()
}

/// Writes a `PARTIAL` frame: `[i32 PARTIAL][usize len][bytes]`.
pub fn write_partial_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let payload = floor_pad(payload.to_vec());
    w.write_all(&tag::PARTIAL.to_ne_bytes())?;
    let len = payload.len();
    w.write_all(&len.to_ne_bytes())?;
    w.write_all(&payload)?;
    w.flush()
}

/// Writes the terminal frame: `[i32 outcode][bytes body]`, body floor-padded.
pub fn write_terminal_frame<W: Write>(w: &mut W, code: OutCode, body: &[u8]) -> io::Result<()> {
    let body = floor_pad(body.to_vec());
    w.write_all(&code.code().to_ne_bytes())?;
    w.write_all(&body)?;
    w.flush()
}

/// Reads a single `i32` answer to a `REQCONFIRM` frame.
pub fn read_confirm_answer<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_tags_never_collide_with_outcodes() {
        let reserved = [tag::REQCONFIRM, tag::REQSTRING, tag::PARTIAL, -71];
        for code in [
            OutCode::Ok,
            OutCode::EArgs,
            OutCode::InvalidEmail,
            OutCode::NotFound,
            OutCode::InvalidState,
            OutCode::InvalidType,
            OutCode::NotPermitted,
            OutCode::NotLoggedIn,
            OutCode::NoFetch,
            OutCode::Unexpected,
        ] {
            assert!(!reserved.contains(&code.code()));
        }
    }

    #[test]
    fn exit_code_is_absolute_value() {
        assert_eq!(OutCode::NotLoggedIn.exit_code(), 57);
        assert_eq!(OutCode::Ok.exit_code(), 0);
    }

    #[test]
    fn floor_pad_pads_empty_body() {
        assert_eq!(floor_pad(vec![]), vec![0]);
        assert_eq!(floor_pad(vec![1, 2]), vec![1, 2]);
    }

    #[test]
    fn confirm_parses_case_insensitive_tokens() {
        assert_eq!(Confirm::parse("YES"), Some(Confirm::Yes));
        assert_eq!(Confirm::parse("n"), Some(Confirm::No));
        assert_eq!(Confirm::parse("ALL"), Some(Confirm::All));
        assert_eq!(Confirm::parse("bogus"), None);
    }

    #[test]
    fn terminal_frame_round_trips_through_a_pipe() {
        let mut buf = Vec::new();
        write_terminal_frame(&mut buf, OutCode::NotFound, b"missing").unwrap();
        let mut cursor = &buf[4..];
        let mut body = Vec::new();
        cursor.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"missing");
        let code = i32::from_ne_bytes(buf[..4].try_into().unwrap());
        assert_eq!(code, OutCode::NotFound.code());
    }
}
