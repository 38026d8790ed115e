//! ChameleonBuilder -- fluent builder for constructing [`ChameleonClient`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! the bridge address, timeouts and retry policy before the client exists.
//! Building does no I/O: the connection is opened lazily on the first
//! command or by an explicit [`connect`](ChameleonClient::connect).
//!
//! # Example
//!
//! ```no_run
//! use chameleon_client::builder::ChameleonBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> chameleon_core::Result<()> {
//! let client = ChameleonBuilder::new()
//!     .host("192.168.1.50")
//!     .command_timeout(Duration::from_secs(2))
//!     .max_attempts(5)
//!     .build()?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chameleon_core::error::{Error, Result};
use chameleon_core::transport::Connector;
use chameleon_transport::{TcpConnector, DEFAULT_PORT};

use crate::client::ChameleonClient;
use crate::config::DeviceConfig;
use crate::connection::{Connection, ConnectionConfig};

/// Default number of zone queries allowed in flight during a batch poll.
pub const DEFAULT_POLL_CONCURRENCY: usize = 1;

/// Fluent builder for [`ChameleonClient`].
///
/// Everything but the host has a default, so the simplest usage is:
///
/// ```ignore
/// let client = ChameleonBuilder::new().host("192.168.1.50").build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ChameleonBuilder {
    host: Option<String>,
    port: u16,
    connection: ConnectionConfig,
    poll_concurrency: usize,
}

impl Default for ChameleonBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChameleonBuilder {
    /// Create a builder with default settings and no host.
    pub fn new() -> Self {
        ChameleonBuilder {
            host: None,
            port: DEFAULT_PORT,
            connection: ConnectionConfig::default(),
            poll_concurrency: DEFAULT_POLL_CONCURRENCY,
        }
    }

    /// Start from stored config-entry data: host, port and any timeout,
    /// attempt or concurrency overrides it carries.
    pub fn from_config(config: &DeviceConfig) -> Self {
        let mut builder = ChameleonBuilder::new().host(&config.host).port(config.port);
        if let Some(ms) = config.command_timeout_ms {
            builder = builder.command_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = config.max_attempts {
            builder = builder.max_attempts(n);
        }
        if let Some(n) = config.poll_concurrency {
            builder = builder.poll_concurrency(n);
        }
        builder
    }

    /// Set the bridge host name or address.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the bridge TCP port (default: 8899).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the timeout for one command/response exchange (default: 5s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.connection.command_timeout = timeout;
        self
    }

    /// Set the timeout for opening the TCP connection (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    /// Set the total number of tries per command, including the first
    /// (default: 3).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.connection.max_attempts = n;
        self
    }

    /// Set the reconnect backoff range (default: 1s doubling up to 60s).
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.connection.backoff_base = base;
        self.connection.backoff_max = max;
        self
    }

    /// Set the reconnect jitter as a fraction of the delay (default: 0.1).
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.connection.jitter_ratio = ratio;
        self
    }

    /// Set the pause between connecting and discarding the bridge's
    /// start-up bytes (default: 200ms).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.connection.settle_delay = delay;
        self
    }

    /// Set the timeout of the identify round-trip used by
    /// [`health_check`](ChameleonClient::health_check) (default: 2s).
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.connection.health_check_timeout = timeout;
        self
    }

    /// Set how many zone queries a batch poll may have in flight
    /// (default: 1).
    pub fn poll_concurrency(mut self, n: usize) -> Self {
        self.poll_concurrency = n;
        self
    }

    /// Build a [`ChameleonClient`] with a caller-provided connector.
    ///
    /// This is the entry point for testing (pass a `MockConnector` from
    /// `chameleon-test-harness`) and for callers that reach the bridge
    /// some other way than plain TCP.
    pub fn build_with_connector(self, connector: Box<dyn Connector>) -> Result<ChameleonClient> {
        self.validate()?;
        let connection = Connection::new(connector, self.connection);
        Ok(ChameleonClient::new(connection, self.poll_concurrency))
    }

    /// Build a [`ChameleonClient`] that talks TCP to the configured bridge.
    ///
    /// Requires that [`host()`](Self::host) has been called.
    pub fn build(self) -> Result<ChameleonClient> {
        let host = match self.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::InvalidParameter("host is required for build()".into())),
        };
        if self.port == 0 {
            return Err(Error::InvalidParameter("port must not be 0".into()));
        }
        let connector = TcpConnector::new(host, self.port);
        self.build_with_connector(Box::new(connector))
    }

    fn validate(&self) -> Result<()> {
        if self.connection.max_attempts == 0 {
            return Err(Error::InvalidParameter("max_attempts must be at least 1".into()));
        }
        if self.poll_concurrency == 0 {
            return Err(Error::InvalidParameter(
                "poll_concurrency must be at least 1".into(),
            ));
        }
        if self.connection.command_timeout.is_zero() {
            return Err(Error::InvalidParameter("command_timeout must be positive".into()));
        }
        if self.connection.connect_timeout.is_zero() {
            return Err(Error::InvalidParameter("connect_timeout must be positive".into()));
        }
        if self.connection.health_check_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "health_check_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}
