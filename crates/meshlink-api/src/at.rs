//! Legacy AT text-mode encoder/decoder.
//!
//! Modules that are not in framed API mode speak an unframed ASCII command
//! protocol: commands are `AT` followed by a two-letter name and optional
//! parameter characters, terminated with a carriage return. Responses are
//! the value characters terminated the same way; the error response is
//! `ERROR\r`. Command mode is entered from transparent operation with the
//! `+++` sequence, answered by `OK\r`.
//!
//! # Command format
//!
//! ```text
//! AT<CC><params>\r
//! ```
//!
//! There is no framing, no checksum, and no correlation token in this
//! mode, which is why the engine serializes legacy exchanges: a response
//! can only be attributed to the single command in flight.

use bytes::{BufMut, BytesMut};

/// Command/response terminator byte.
pub const TERMINATOR: u8 = b'\r';

/// Error response from the module: `ERROR\r` (terminator excluded here).
pub const ERROR_REPLY: &[u8] = b"ERROR";

/// Positive response to the command-mode entry sequence.
pub const OK_REPLY: &[u8] = b"OK";

/// Sequence that switches a transparent-mode module into command mode.
pub const COMMAND_MODE_SEQUENCE: &[u8] = b"+++";

/// Result of attempting to decode a reply from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete reply was decoded.
    Reply {
        /// The value characters before the terminator (may be empty).
        value: Vec<u8>,
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },
    /// The module returned the error response.
    Error {
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },
    /// The buffer does not yet contain a terminator. More data is needed.
    Incomplete,
}

/// Encode an AT command into raw bytes ready for transmission.
///
/// # Example
///
/// ```
/// use meshlink_api::at::encode_command;
///
/// assert_eq!(encode_command(*b"VR", &[]), b"ATVR\r");
/// assert_eq!(encode_command(*b"NI", b"PUMP"), b"ATNI PUMP\r".to_vec());
/// ```
pub fn encode_command(command: [u8; 2], parameter: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5 + parameter.len() + 1);
    buf.put_slice(b"AT");
    buf.put_slice(&command);
    if !parameter.is_empty() {
        buf.put_u8(b' ');
        buf.put_slice(parameter);
    }
    buf.put_u8(TERMINATOR);
    buf.to_vec()
}

/// Attempt to decode one reply from a byte buffer.
///
/// Scans for the terminator. A leading line feed left over from a previous
/// exchange is tolerated.
pub fn decode_reply(buf: &[u8]) -> DecodeResult {
    let term = match buf.iter().position(|&b| b == TERMINATOR) {
        Some(pos) => pos,
        None => return DecodeResult::Incomplete,
    };
    let consumed = term + 1;
    let line: &[u8] = buf[..term].strip_prefix(b"\n").unwrap_or(&buf[..term]);

    if line == ERROR_REPLY {
        DecodeResult::Error { consumed }
    } else {
        DecodeResult::Reply {
            value: line.to_vec(),
            consumed,
        }
    }
}
