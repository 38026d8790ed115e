//! Transport and connector traits.
//!
//! The [`Transport`] trait abstracts over the byte stream to the device's
//! serial-to-ethernet bridge. The [`Connector`] trait abstracts over *how*
//! such a stream is opened, so the connection manager can reconnect after a
//! failure without knowing whether it is talking to a real TCP socket or a
//! scripted mock from the `chameleon-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the device.
///
/// Implementations handle buffering and error mapping at the socket level.
/// Framing (`\r` commands, `\r\n` responses) belongs to the protocol codec.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device, returning once they are flushed.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes into `buf`.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives. A zero timeout returns only data that is already buffered.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport. Closing twice is a no-op.
    ///
    /// After `close()`, `send()` and `receive()` return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Opens new [`Transport`]s on demand.
///
/// The connection manager owns one connector for its lifetime and calls
/// [`connect`](Connector::connect) on first use and after every failure.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport, waiting at most `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>>;

    /// Human-readable endpoint description for logs (e.g. `"10.0.0.5:8899"`).
    fn endpoint(&self) -> String;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>> {
        (**self).connect(timeout).await
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}
