//! chameleon-test-harness: Test utilities for the Chameleon64i crates.
//!
//! - [`MockTransport`] / [`MockConnector`]: scripted byte streams and
//!   connection attempts for deterministic unit tests
//! - [`MockTcpServer`]: a scripted TCP peer for the real socket path
//! - [`FakeChameleon`]: a stateful device simulator with failure injection

pub mod fake_device;
pub mod mock_tcp;
pub mod mock_transport;

pub use fake_device::{FakeChameleon, FakeOptions, FakeZone};
pub use mock_tcp::MockTcpServer;
pub use mock_transport::{MockConnector, MockTransport, SentLog};
