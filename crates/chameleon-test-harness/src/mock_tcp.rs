//! Scripted TCP peer for testing the real socket path.
//!
//! [`MockTcpServer`] is a TCP listener pre-loaded with scripted replies. It
//! lets the TCP transport and connection manager be tested end to end
//! without a bridge or a device.
//!
//! # Example
//!
//! ```
//! use chameleon_test_harness::MockTcpServer;
//!
//! # async fn example() -> chameleon_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//!
//! // Adapter noise on connect, then answer the identify command.
//! server.greeting(&[0xFF, 0xFE]);
//! server.expect(b"I\r", b"Knox Chameleon64i\r\nDONE\r\n");
//!
//! let addr = server.addr().to_string();
//! server.start();
//! // ... connect a TcpTransport to `addr` and test ...
//! server.wait().await.map_err(chameleon_core::Error::Transport)?;
//! # Ok(())
//! # }
//! ```

use chameleon_core::error::{Error, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A pre-loaded request/reply pair for the mock TCP server.
#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes we expect the client to send.
    request: Vec<u8>,
    /// The bytes to send back, or `None` to stay silent.
    response: Option<Vec<u8>>,
}

/// A mock TCP server for testing the protocol over a real socket.
///
/// The server listens on a random available port on localhost. Once
/// [`start`](MockTcpServer::start) is called, it accepts a single
/// connection, writes the greeting (if any) and processes expectations in
/// order: for each expected request, it reads from the client and writes
/// back the corresponding reply.
///
/// If the client sends data that does not match the next expectation, the
/// server closes the connection and [`wait`](MockTcpServer::wait) reports
/// the mismatch.
pub struct MockTcpServer {
    /// The address the server is listening on (e.g., "127.0.0.1:54321").
    addr: String,
    /// Bound listener, moved into the server task on start.
    listener: Option<TcpListener>,
    /// Bytes written as soon as the client connects.
    greeting: Vec<u8>,
    /// Ordered queue of expected request/reply pairs.
    expectations: VecDeque<TcpExpectation>,
    /// Handle to the server task once started.
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Create a new mock TCP server listening on a random port.
    ///
    /// The listener is bound immediately, so clients may connect before
    /// [`start`](MockTcpServer::start); they are accepted once it runs.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        Ok(Self {
            addr,
            listener: Some(listener),
            greeting: Vec::new(),
            expectations: VecDeque::new(),
            server_handle: None,
        })
    }

    /// Bytes to write as soon as the client connects.
    pub fn greeting(&mut self, bytes: &[u8]) {
        self.greeting = bytes.to_vec();
    }

    /// Add an expected request/reply pair.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: Some(response.to_vec()),
        });
    }

    /// Expect `request` and send nothing back.
    pub fn expect_silence(&mut self, request: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: None,
        });
    }

    /// Get the address the server is listening on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Start the server, accepting a single client connection and processing
    /// all expectations.
    ///
    /// This spawns a background task. Call [`wait`](MockTcpServer::wait) to
    /// block until all expectations have been processed and check for errors.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let greeting = std::mem::take(&mut self.greeting);
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();

        let handle = tokio::spawn(async move {
            let (mut stream, peer) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;
            tracing::debug!(peer = %peer, "Mock TCP server accepted connection");

            if !greeting.is_empty() {
                stream
                    .write_all(&greeting)
                    .await
                    .map_err(|e| format!("greeting write error: {}", e))?;
            }

            for (i, expectation) in expectations.iter().enumerate() {
                serve_expectation(&mut stream, i, expectation).await?;
            }

            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to complete and return any errors.
    ///
    /// Call this after the client has finished its interactions to verify
    /// that all expectations were met.
    pub async fn wait(self) -> std::result::Result<(), String> {
        if let Some(handle) = self.server_handle {
            handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?
        } else {
            Ok(())
        }
    }
}

async fn serve_expectation(
    stream: &mut TcpStream,
    i: usize,
    expectation: &TcpExpectation,
) -> std::result::Result<(), String> {
    let mut buf = vec![0u8; expectation.request.len()];
    let mut total_read = 0;

    // Read exactly the expected number of bytes
    while total_read < expectation.request.len() {
        let n = stream
            .read(&mut buf[total_read..])
            .await
            .map_err(|e| format!("expectation {}: read error: {}", i, e))?;
        if n == 0 {
            return Err(format!(
                "expectation {}: client disconnected after {} bytes (expected {})",
                i,
                total_read,
                expectation.request.len()
            ));
        }
        total_read += n;
    }

    if buf != expectation.request {
        return Err(format!(
            "expectation {}: request mismatch: expected {:?}, got {:?}",
            i,
            String::from_utf8_lossy(&expectation.request),
            String::from_utf8_lossy(&buf)
        ));
    }

    if let Some(response) = &expectation.response {
        stream
            .write_all(response)
            .await
            .map_err(|e| format!("expectation {}: write error: {}", i, e))?;
        stream
            .flush()
            .await
            .map_err(|e| format!("expectation {}: flush error: {}", i, e))?;
    }

    Ok(())
}
