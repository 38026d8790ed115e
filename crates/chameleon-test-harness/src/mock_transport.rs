//! Mock transport and connector for deterministic testing.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/reply pairs, so the connection manager and client can be tested
//! without a socket. [`MockConnector`] hands out scripted transports (or
//! scripted connection failures) to exercise the reconnect path.
//!
//! # Example
//!
//! ```
//! use chameleon_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the client sends "I\r", return the sign-on message.
//! mock.expect(b"I\r", b"Knox Chameleon64i\r\nDONE\r\n");
//! // When it asks for zone 5's volume, never answer.
//! mock.expect_silence(b"$D05\r");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chameleon_core::error::{Error, Result};
use chameleon_core::transport::{Connector, Transport};

/// What the mock does after a matching request.
#[derive(Debug, Clone)]
enum Reply {
    /// Make these bytes available to `receive()`.
    Bytes(Vec<u8>),
    /// Return nothing; `receive()` times out.
    Silence,
    /// Drop the link; `receive()` returns [`Error::ConnectionLost`].
    Hangup,
}

/// A pre-loaded request/reply pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// What happens once the request arrives.
    reply: Reply,
}

/// Shared record of every `send()` across one or more mock transports.
///
/// Cloning shares the underlying log, so a test can keep a handle after the
/// transport itself has been moved into a client.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, data: &[u8]) {
        if let Ok(mut log) = self.0.lock() {
            log.push(data.to_vec());
        }
    }

    /// All sends so far, one element per `send()` call.
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// All sends so far, lossily decoded as text.
    pub fn as_strings(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| String::from_utf8_lossy(e).into_owned())
            .collect()
    }

    /// Number of sends so far.
    pub fn len(&self) -> usize {
        self.0.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// `true` if nothing has been sent.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; its reply is
/// then served by subsequent `receive()` calls. Bytes queued with
/// [`push_incoming`](MockTransport::push_incoming) are served before any
/// reply, which models adapter start-up noise or stale data.
///
/// Timeouts are reported immediately rather than after the requested
/// duration, so tests never sleep.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/reply pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes available to the next `receive()` calls.
    incoming: VecDeque<u8>,
    /// Set when a hangup reply has been triggered.
    hung_up: bool,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: SentLog,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        Self::with_log(SentLog::new())
    }

    /// Create a mock that records into an existing (shared) log.
    pub fn with_log(sent_log: SentLog) -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            incoming: VecDeque::new(),
            hung_up: false,
            connected: true,
            sent_log,
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the subsequent
    /// `receive()` calls return `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.push_expectation(request, Reply::Bytes(response.to_vec()));
    }

    /// Expect `request` and never answer it.
    pub fn expect_silence(&mut self, request: &[u8]) {
        self.push_expectation(request, Reply::Silence);
    }

    /// Expect `request` and drop the connection instead of answering.
    pub fn expect_hangup(&mut self, request: &[u8]) {
        self.push_expectation(request, Reply::Hangup);
    }

    fn push_expectation(&mut self, request: &[u8], reply: Reply) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply,
        });
    }

    /// Queue bytes that are readable before anything is sent.
    pub fn push_incoming(&mut self, data: &[u8]) {
        self.incoming.extend(data);
    }

    /// Return a handle to the log of all data sent through this transport.
    pub fn sent_log(&self) -> SentLog {
        self.sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.hung_up {
            return Err(Error::ConnectionLost);
        }

        self.sent_log.push(data);

        let expectation = self.expectations.pop_front().ok_or_else(|| {
            Error::Protocol(format!(
                "no more expectations in mock transport (got {:?})",
                String::from_utf8_lossy(data)
            ))
        })?;

        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }

        match expectation.reply {
            Reply::Bytes(bytes) => self.incoming.extend(bytes),
            Reply::Silence => {}
            Reply::Hangup => self.hung_up = true,
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.incoming.is_empty() {
            return if self.hung_up {
                Err(Error::ConnectionLost)
            } else {
                Err(Error::Timeout)
            };
        }

        let n = self.incoming.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.incoming.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// A [`Connector`] that returns scripted outcomes, one per `connect()` call.
///
/// Outcomes are consumed in order; once the script is exhausted every
/// further attempt fails with [`Error::Transport`].
#[derive(Debug, Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Result<MockTransport>>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    /// Create a connector with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next attempt succeeds with `transport`.
    pub fn push_transport(&self, transport: MockTransport) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(transport));
        }
    }

    /// Next attempt fails with `error`.
    pub fn push_failure(&self, error: Error) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// Number of `connect()` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of scripted outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _timeout: Duration) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| Error::Transport("mock connector poisoned".into()))?
            .pop_front();

        match next {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(Error::Transport(
                "mock connector script exhausted".into(),
            )),
        }
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}
