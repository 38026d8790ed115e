//! Chameleon64i line-protocol framing.
//!
//! The device speaks a simple ASCII protocol over its RS-232 port, which the
//! serial-to-ethernet bridge passes through unchanged.
//!
//! # Command format
//!
//! ```text
//! <command text>\r
//! ```
//!
//! # Response format
//!
//! Zero or more data lines followed by a status line, each terminated with
//! `\r\n`:
//!
//! ```text
//! OUTPUT   01   VIDEO   02   AUDIO   02\r\n
//! DONE\r\n
//! ```
//!
//! A rejected command answers `ERROR` instead of `DONE`. The volume/tone
//! dump (`$D`) is the exception: it answers with a single data line and no
//! status line, so the caller must tell the decoder which
//! [`ResponseShape`] to expect.
//!
//! Bridges commonly emit a few bytes of garbage (`0xFF 0xFE`) when a client
//! connects. Anything outside printable ASCII is dropped during decoding.

use bytes::{BufMut, BytesMut};

/// Command terminator byte (carriage return).
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Status line for a successfully executed command.
pub const STATUS_DONE: &str = "DONE";

/// Status line for a rejected command.
pub const STATUS_ERROR: &str = "ERROR";

/// What a complete response to a given command looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseShape {
    /// Data lines terminated by a `DONE` or `ERROR` status line.
    Status,
    /// Exactly one data line, no status line (or a bare `ERROR`).
    SingleLine,
}

/// How a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The device sent `DONE`.
    Done,
    /// The device sent `ERROR`.
    Error,
    /// No status line; the response was complete by shape, or salvaged
    /// after a read timeout.
    Implicit,
}

/// A decoded response: the data lines plus how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Non-empty data lines, trimmed, in arrival order.
    pub lines: Vec<String>,
    /// Completion status.
    pub status: Status,
}

impl Response {
    /// First data line, if any.
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// `true` if the device rejected the command.
    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    /// All data lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Result of attempting to decode a response from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete response was decoded.
    Complete {
        /// The decoded response.
        response: Response,
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },

    /// The buffer does not yet contain a complete response.
    Incomplete,
}

/// Encode a command into raw bytes ready for transmission.
///
/// # Example
///
/// ```
/// use chameleon_protocol::protocol::encode_command;
///
/// assert_eq!(encode_command("$V0104"), b"$V0104\r");
/// ```
pub fn encode_command(text: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(COMMAND_TERMINATOR);
    buf.to_vec()
}

/// Attempt to decode one complete response from `buf`.
///
/// Lines end at `\r` or `\n`; empty lines are skipped. `DONE` and `ERROR`
/// are matched case-insensitively. For [`ResponseShape::SingleLine`] the
/// first data line completes the response.
///
/// # Example
///
/// ```
/// use chameleon_protocol::protocol::{decode_response, DecodeResult, ResponseShape, Status};
///
/// let buf = b"\xFF\xFEOUTPUT 01 VIDEO 02 AUDIO 02\r\nDONE\r\n";
/// match decode_response(buf, ResponseShape::Status) {
///     DecodeResult::Complete { response, consumed } => {
///         assert_eq!(response.lines, vec!["OUTPUT 01 VIDEO 02 AUDIO 02"]);
///         assert_eq!(response.status, Status::Done);
///         assert_eq!(consumed, buf.len());
///     }
///     DecodeResult::Incomplete => panic!("expected Complete"),
/// }
/// ```
pub fn decode_response(buf: &[u8], shape: ResponseShape) -> DecodeResult {
    let mut lines = Vec::new();

    for (line, end) in LineScanner::new(buf) {
        if line.eq_ignore_ascii_case(STATUS_DONE) || line.eq_ignore_ascii_case(STATUS_ERROR) {
            let status = if line.eq_ignore_ascii_case(STATUS_DONE) {
                Status::Done
            } else {
                Status::Error
            };
            return DecodeResult::Complete {
                response: Response { lines, status },
                consumed: end,
            };
        }

        lines.push(line);

        if shape == ResponseShape::SingleLine {
            return DecodeResult::Complete {
                response: Response {
                    lines,
                    status: Status::Implicit,
                },
                consumed: end,
            };
        }
    }

    DecodeResult::Incomplete
}

/// Salvage whatever complete data lines `buf` holds.
///
/// Used after a read timeout: some bridges swallow the trailing status line,
/// and the data that did arrive is still the answer to the command. Returns
/// `None` if no complete data line was received.
pub fn finish_partial(buf: &[u8]) -> Option<Response> {
    let lines: Vec<String> = LineScanner::new(buf)
        .map(|(line, _)| line)
        .filter(|line| {
            !line.eq_ignore_ascii_case(STATUS_DONE) && !line.eq_ignore_ascii_case(STATUS_ERROR)
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(Response {
            lines,
            status: Status::Implicit,
        })
    }
}

/// Iterates over complete, non-empty, trimmed lines in a buffer, yielding
/// each line with the offset just past its terminator.
struct LineScanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LineScanner<'a> {
    fn new(buf: &'a [u8]) -> Self {
        LineScanner { buf, pos: 0 }
    }
}

impl Iterator for LineScanner<'_> {
    type Item = (String, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = &self.buf[self.pos..];
            let term = rest.iter().position(|&b| b == b'\r' || b == b'\n')?;

            let mut end = self.pos + term + 1;
            // Treat "\r\n" as one terminator.
            if rest[term] == b'\r' && self.buf.get(end) == Some(&b'\n') {
                end += 1;
            }

            let line: String = rest[..term]
                .iter()
                .filter(|b| b.is_ascii_graphic() || **b == b' ' || **b == b'\t')
                .map(|&b| b as char)
                .collect();
            self.pos = end;

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some((trimmed.to_string(), end));
            }
        }
    }
}
