//! Text protocol parser and response generator.
//!
//! A client write carries zero or more commands separated by `;` (a newline
//! also ends a command). Each command is a space separated list of tokens:
//!
//! ```text
//! GET <key>
//! SET <key> <value>
//! DELETE <key>
//! ```
//!
//! Every processed command is answered with one line: the value for `GET`
//! (`nil` when absent), `OK` for `SET`/`DELETE`, or `Unknown command`.

use crate::store::trim_nul;
use bytes::Bytes;

/// Parsed client command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Look up a key
    Get { key: Bytes },

    /// Store a value, overwriting any previous one
    Set { key: Bytes, value: Bytes },

    /// Remove a key
    Delete { key: Bytes },
}

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Fewer than two tokens
    TooFewTokens,
    /// SET without a value
    MissingValue,
    /// Verb is not GET, SET or DELETE
    UnknownCommand(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::TooFewTokens => write!(f, "Command needs a verb and a key"),
            ParseError::MissingValue => write!(f, "SET requires a value"),
            ParseError::UnknownCommand(verb) => write!(f, "Unknown command: {}", verb),
        }
    }
}

impl std::error::Error for ParseError {}

/// Split one read's worth of input into command segments.
///
/// Segments are delimited by `;` or `\n`, a trailing `\r` is dropped, and
/// segments that are empty (or only NUL padding) are skipped. The returned
/// segments share the input buffer.
pub fn split_commands(input: &Bytes) -> impl Iterator<Item = Bytes> + '_ {
    input
        .split(|&b| b == b';' || b == b'\n')
        .map(|segment| segment.strip_suffix(b"\r").unwrap_or(segment))
        .filter(|segment| !trim_nul(segment).is_empty())
        .map(move |segment| input.slice_ref(segment))
}

/// Parse a single command segment.
///
/// Verbs match case-insensitively. Tokens beyond the ones a verb needs are
/// ignored.
pub fn parse(segment: &Bytes) -> Result<Command, ParseError> {
    let mut tokens = segment
        .split(|&b| b == b' ')
        .filter(|token| !token.is_empty())
        .map(|token| segment.slice_ref(token));

    let verb = tokens.next().ok_or(ParseError::TooFewTokens)?;
    let key = tokens.next().ok_or(ParseError::TooFewTokens)?;
    let verb_name = trim_nul(&verb);

    if verb_name.eq_ignore_ascii_case(b"GET") {
        Ok(Command::Get { key })
    } else if verb_name.eq_ignore_ascii_case(b"SET") {
        let value = tokens.next().ok_or(ParseError::MissingValue)?;
        Ok(Command::Set { key, value })
    } else if verb_name.eq_ignore_ascii_case(b"DELETE") {
        Ok(Command::Delete { key })
    } else {
        Err(ParseError::UnknownCommand(
            String::from_utf8_lossy(verb_name).into_owned(),
        ))
    }
}

/// Response generator
pub struct Response;

impl Response {
    /// Generate OK response (SET, DELETE)
    pub fn ok() -> &'static [u8] {
        b"OK"
    }

    /// Generate the absent-key response
    pub fn nil() -> &'static [u8] {
        b"nil"
    }

    /// Generate the response for malformed or unrecognized commands
    pub fn unknown_command() -> &'static [u8] {
        b"Unknown command"
    }

    /// Line terminator written after every processed command
    pub fn terminator() -> &'static [u8] {
        b"\n"
    }
}
