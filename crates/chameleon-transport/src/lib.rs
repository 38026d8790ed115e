//! Transport implementations for the Chameleon64i.
//!
//! The device is reached through a serial-to-ethernet bridge, so the only
//! physical link is a TCP socket:
//!
//! - [`TcpTransport`]: one open socket, implementing
//!   [`Transport`](chameleon_core::Transport)
//! - [`TcpConnector`]: opens a new [`TcpTransport`] on demand, implementing
//!   [`Connector`](chameleon_core::Connector)

pub mod tcp;

pub use tcp::{TcpConnector, TcpTransport, DEFAULT_PORT};
