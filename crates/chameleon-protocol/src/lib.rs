//! chameleon-protocol: ASCII command codec for the Knox Chameleon64i.
//!
//! - [`protocol`]: framing (`\r` commands, `\r\n` lines ending in `DONE` or
//!   `ERROR`), noise stripping and partial-response salvage
//! - [`commands`]: typed command builders and response parsers
//!
//! Everything here is pure; I/O lives in `chameleon-client`.

pub mod commands;
pub mod protocol;

pub use commands::Command;
pub use protocol::{DecodeResult, Response, ResponseShape, Status};
