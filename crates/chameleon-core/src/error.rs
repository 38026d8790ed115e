//! Error types for Chameleon64i control.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Errors fall into three classes:
//!
//! - **connection** ([`Transport`](Error::Transport), [`Timeout`](Error::Timeout),
//!   [`NotConnected`](Error::NotConnected), [`ConnectionLost`](Error::ConnectionLost),
//!   [`Io`](Error::Io)) -- retried by the connection manager with backoff and
//!   finally surfaced as [`Unavailable`](Error::Unavailable);
//! - **protocol** ([`Protocol`](Error::Protocol), [`Rejected`](Error::Rejected)) --
//!   returned immediately, never retried;
//! - **caller** ([`InvalidParameter`](Error::InvalidParameter),
//!   [`Config`](Error::Config)) -- rejected before any I/O happens.

/// The error type for all Chameleon64i operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (refused connection, unresolvable host).
    #[error("transport error: {0}")]
    Transport(String),

    /// A malformed response: wrong field count, non-numeric field, missing
    /// register. Distinct from [`Timeout`](Error::Timeout) so callers can
    /// tell a confused device from a silent one.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered `ERROR` to a well-formed command.
    #[error("command rejected by device: {0}")]
    Rejected(String),

    /// Timed out waiting for a connection or a response.
    #[error("timeout waiting for response")]
    Timeout,

    /// An out-of-range zone, input, volume or similar argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid configuration data.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No connection to the device has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection was closed or reset by the peer.
    #[error("connection lost")]
    ConnectionLost,

    /// Every attempt of a command failed with a connection-class error.
    #[error("device unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<Error>,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a connection-class failure that a reconnect
    /// might cure.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Timeout
                | Error::NotConnected
                | Error::ConnectionLost
                | Error::Io(_)
        )
    }

    /// Whether this error is (or was ultimately caused by) a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Unavailable { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether the device is unreachable, i.e. the entity should be shown
    /// as unavailable rather than in an error state.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable { .. }) || self.is_connection_error()
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
