//! Connection manager: one serialized, self-healing link to the bridge.
//!
//! A [`Connection`] owns the transport behind a single `tokio::sync::Mutex`.
//! Every exchange (drain stale input, write, read until complete) runs with
//! the lock held, so two callers can never interleave partial reads. When
//! an exchange fails with a connection-class error the transport is closed
//! and reopened through the [`Connector`], again with the lock held, so
//! concurrent callers queue behind one reconnect instead of racing their
//! own.
//!
//! ```text
//!   Disconnected --connect--> Connecting --ok--> Connected
//!        ^                        |                  |
//!        |                       err          command fails
//!        |                        v                  v
//!        +------ attempts exhausted ------- Reconnecting (backoff)
//! ```

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use chameleon_core::error::{Error, Result};
use chameleon_core::events::ChameleonEvent;
use chameleon_core::transport::{Connector, Transport};
use chameleon_core::types::ConnectionState;
use chameleon_protocol::commands::{self, Command};
use chameleon_protocol::protocol::{self, DecodeResult, Response};

use crate::backoff::{self, Backoff};

/// Bytes discarded per drain before giving up on a chattering peer.
const MAX_DRAIN: usize = 64 * 1024;

/// Largest response accepted before the exchange is abandoned. A full
/// crosspoint map is under 3 KiB.
const MAX_RESPONSE: usize = 16 * 1024;

/// Tunables for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on opening the TCP connection.
    pub connect_timeout: Duration,
    /// Bound on a single command/response exchange.
    pub command_timeout: Duration,
    /// Total tries per command, including the first.
    pub max_attempts: u32,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Ceiling of the un-jittered reconnect delay.
    pub backoff_max: Duration,
    /// Reconnect jitter as a fraction of the delay.
    pub jitter_ratio: f64,
    /// Pause after connecting before start-up noise is discarded.
    pub settle_delay: Duration,
    /// Bound on the identify round-trip used as a health check.
    pub health_check_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: backoff::DEFAULT_BASE,
            backoff_max: backoff::DEFAULT_MAX,
            jitter_ratio: backoff::DEFAULT_JITTER_RATIO,
            settle_delay: Duration::from_millis(200),
            health_check_timeout: Duration::from_secs(2),
        }
    }
}

/// State guarded by the serialization lock.
struct Link {
    transport: Option<Box<dyn Transport>>,
    /// Set while a command is written but its reply not yet read. Still
    /// set at the next lock means the previous exchange was dropped and
    /// its reply may be on the wire.
    in_flight: bool,
    backoff: Backoff,
    rng: StdRng,
}

/// A persistent, serialized connection to the device.
pub struct Connection {
    connector: Box<dyn Connector>,
    config: ConnectionConfig,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ChameleonEvent>,
}

impl Connection {
    /// Create a connection manager. Nothing is opened until the first
    /// [`connect`](Connection::connect) or [`send`](Connection::send).
    pub fn new(connector: Box<dyn Connector>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(256);
        let backoff = Backoff::new(config.backoff_base, config.backoff_max, config.jitter_ratio);

        Connection {
            connector,
            config,
            link: Mutex::new(Link {
                transport: None,
                in_flight: false,
                backoff,
                rng: StdRng::from_entropy(),
            }),
            state_tx,
            event_tx,
        }
    }

    /// Endpoint description for logs.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// The configuration this connection was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to connection and zone events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChameleonEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event to subscribers. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: ChameleonEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Open the connection if it is not already open.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.transport.is_some() {
            return Ok(());
        }
        if let Err(e) = self.open(&mut link).await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection. Closing an already closed connection is a
    /// no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.close_link(&mut link).await;
        Ok(())
    }

    /// Send a command and wait for its response, reconnecting and retrying
    /// on connection-class failures.
    ///
    /// The response is returned as decoded; a device `ERROR` is *not*
    /// turned into an error here (see
    /// [`check_status`](chameleon_protocol::commands::check_status)).
    pub async fn send(&self, command: &Command) -> Result<Response> {
        self.exchange(command, self.config.command_timeout, self.config.max_attempts)
            .await
    }

    /// Like [`send`](Connection::send) with an explicit per-exchange timeout.
    pub async fn send_with_timeout(&self, command: &Command, timeout: Duration) -> Result<Response> {
        self.exchange(command, timeout, self.config.max_attempts)
            .await
    }

    /// Send `I` once, bounded by the health-check timeout. Returns `true`
    /// when the device answered with a sign-on line.
    ///
    /// The bound covers waiting for the serialization lock as well, so a
    /// long batch poll cannot hold the check up.
    pub async fn health_check(&self) -> bool {
        let command = commands::cmd_identify();
        let bound = self.config.health_check_timeout;
        let result = match tokio::time::timeout(bound, self.exchange(&command, bound, 1)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = bound.as_millis() as u64, "Health check timed out");
                return false;
            }
        };
        match result {
            Ok(response) if !response.is_error() && !response.lines.is_empty() => true,
            Ok(response) => {
                warn!(status = ?response.status, "Health check got an empty reply");
                false
            }
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        }
    }

    async fn exchange(
        &self,
        command: &Command,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<Response> {
        let attempts = max_attempts.max(1);
        let mut link = self.link.lock().await;
        if link.in_flight {
            warn!(
                command = %command,
                "Previous exchange was abandoned mid-reply, reopening connection"
            );
            self.close_link(&mut link).await;
        }
        let mut last_error = Error::NotConnected;

        for attempt in 1..=attempts {
            match self.attempt(&mut link, command, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connection_error() => {
                    warn!(
                        command = %command,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Command failed"
                    );
                    self.close_link(&mut link).await;

                    if attempt < attempts {
                        let Link { backoff, rng, .. } = &mut *link;
                        let delay = backoff.next_delay(rng);
                        self.set_state(ConnectionState::Reconnecting);
                        self.emit(ChameleonEvent::Reconnecting { attempt });
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Backing off before reconnect"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(Error::Unavailable {
            attempts,
            source: Box::new(last_error),
        })
    }

    async fn attempt(&self, link: &mut Link, command: &Command, timeout: Duration) -> Result<Response> {
        if link.transport.is_none() {
            self.open(link).await?;
        }
        let transport = link.transport.as_mut().ok_or(Error::NotConnected)?;

        let stale = drain(&mut **transport).await?;
        if stale > 0 {
            debug!(bytes = stale, command = %command, "Discarded stale input before command");
        }

        debug!(command = %command, "Sending command");
        link.in_flight = true;
        transport.send(&command.encode()).await?;

        let response = read_response(&mut **transport, command, timeout).await;
        link.in_flight = false;
        let response = response?;
        trace!(command = %command, lines = ?response.lines, status = ?response.status, "Response");
        Ok(response)
    }

    /// Open the transport, let the adapter settle and discard its noise.
    async fn open(&self, link: &mut Link) -> Result<()> {
        let endpoint = self.connector.endpoint();
        if self.state() == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Connecting);
        }
        debug!(addr = %endpoint, "Opening connection");

        let mut transport = self.connector.connect(self.config.connect_timeout).await?;

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }
        let noise = drain(&mut *transport).await?;
        if noise > 0 {
            debug!(addr = %endpoint, bytes = noise, "Discarded adapter start-up noise");
        }

        link.transport = Some(transport);
        link.backoff.reset();
        self.set_state(ConnectionState::Connected);
        info!(addr = %endpoint, "Connected to Chameleon64i");
        Ok(())
    }

    async fn close_link(&self, link: &mut Link) {
        link.in_flight = false;
        if let Some(mut transport) = link.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Error closing transport (ignored)");
            }
            info!(addr = %self.connector.endpoint(), "Connection closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "Connection state changed");
        match state {
            ConnectionState::Connected => self.emit(ChameleonEvent::Connected),
            ConnectionState::Disconnected if previous == ConnectionState::Connected => {
                self.emit(ChameleonEvent::Disconnected)
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Read and discard whatever is already buffered. Returns the byte count.
async fn drain(transport: &mut dyn Transport) -> Result<usize> {
    let mut buf = [0u8; 256];
    let mut total = 0;

    while total < MAX_DRAIN {
        match transport.receive(&mut buf, Duration::ZERO).await {
            Ok(n) => {
                trace!(bytes = n, data = ?&buf[..n], "Drained");
                total += n;
            }
            Err(Error::Timeout) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Read until `command`'s response is complete or `timeout` elapses.
///
/// On timeout, complete data lines that did arrive are returned as an
/// implicit response; with nothing usable the result is
/// [`Error::Timeout`].
async fn read_response(
    transport: &mut dyn Transport,
    command: &Command,
    timeout: Duration,
) -> Result<Response> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 512];
    let mut response_buf = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let received = if remaining.is_zero() {
            Err(Error::Timeout)
        } else {
            transport.receive(&mut buf, remaining).await
        };

        match received {
            Ok(n) => {
                response_buf.extend_from_slice(&buf[..n]);
                if response_buf.len() > MAX_RESPONSE {
                    return Err(Error::Protocol(format!(
                        "response to {} exceeded {} bytes",
                        command, MAX_RESPONSE
                    )));
                }

                match protocol::decode_response(&response_buf, command.shape()) {
                    DecodeResult::Complete { response, consumed } => {
                        if consumed < response_buf.len() {
                            trace!(
                                bytes = response_buf.len() - consumed,
                                "Discarding bytes after complete response"
                            );
                        }
                        return Ok(response);
                    }
                    DecodeResult::Incomplete => {}
                }
            }
            Err(Error::Timeout) => {
                return match protocol::finish_partial(&response_buf) {
                    Some(response) => {
                        debug!(
                            command = %command,
                            lines = response.lines.len(),
                            "No status line before timeout, using partial response"
                        );
                        Ok(response)
                    }
                    None => Err(Error::Timeout),
                };
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chameleon_core::types::ZoneId;
    use chameleon_protocol::protocol::Status;
    use chameleon_test_harness::{
        FakeChameleon, FakeOptions, MockConnector, MockTcpServer, MockTransport, SentLog,
    };
    use chameleon_transport::TcpConnector;
    use std::sync::Arc;

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(200),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            jitter_ratio: 0.1,
            settle_delay: Duration::ZERO,
            health_check_timeout: Duration::from_millis(200),
        }
    }

    fn connection(connector: MockConnector) -> Connection {
        Connection::new(Box::new(connector), fast_config())
    }

    #[tokio::test]
    async fn connect_discards_noise_and_reports_connected() {
        let log = SentLog::new();
        let mut mock = MockTransport::with_log(log.clone());
        mock.push_incoming(&[0xFF, 0xFE]);
        mock.expect(b"I\r", b"Knox Chameleon64i\r\nDONE\r\n");
        let connector = MockConnector::new();
        connector.push_transport(mock);

        let conn = connection(connector);
        let mut events = conn.subscribe();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(events.recv().await.unwrap(), ChameleonEvent::Connected);

        let response = conn.send(&commands::cmd_identify()).await.unwrap();
        assert_eq!(response.first_line(), Some("Knox Chameleon64i"));
        assert_eq!(response.status, Status::Done);
        assert_eq!(log.as_strings(), vec!["I\r"]);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let connector = MockConnector::new();
        connector.push_transport(MockTransport::new());
        let conn = connection(connector);

        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn send_connects_lazily() {
        let mut mock = MockTransport::new();
        mock.expect(b"W\r", b"CARD 1\r\nDONE\r\n");
        let connector = MockConnector::new();
        connector.push_transport(mock);
        let conn = connection(connector);

        let response = conn.send(&commands::cmd_list_cards()).await.unwrap();
        assert_eq!(response.lines, vec!["CARD 1"]);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn reconnects_after_timeout() {
        let log = SentLog::new();
        let mut first = MockTransport::with_log(log.clone());
        first.expect_silence(b"I\r");
        let mut second = MockTransport::with_log(log.clone());
        second.expect(b"I\r", b"Knox\r\nDONE\r\n");

        let connector = Arc::new(MockConnector::new());
        connector.push_transport(first);
        connector.push_transport(second);
        let conn = Connection::new(Box::new(connector.clone()), fast_config());
        let mut events = conn.subscribe();

        let response = conn.send(&commands::cmd_identify()).await.unwrap();
        assert_eq!(response.first_line(), Some("Knox"));
        assert_eq!(connector.attempts(), 2);
        assert_eq!(log.len(), 2);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ChameleonEvent::Connected,
                ChameleonEvent::Disconnected,
                ChameleonEvent::Reconnecting { attempt: 1 },
                ChameleonEvent::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn reconnects_after_connection_lost() {
        let mut first = MockTransport::new();
        first.expect_hangup(b"$M011\r");
        let mut second = MockTransport::new();
        second.expect(b"$M011\r", b"DONE\r\n");

        let connector = MockConnector::new();
        connector.push_transport(first);
        connector.push_transport(second);
        let conn = connection(connector);

        let zone = ZoneId::new(1).unwrap();
        let response = conn.send(&commands::cmd_set_mute(zone, true)).await.unwrap();
        assert_eq!(response.status, Status::Done);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_unavailable() {
        let connector = MockConnector::new();
        for _ in 0..3 {
            let mut mock = MockTransport::new();
            mock.expect_silence(b"I\r");
            connector.push_transport(mock);
        }
        let conn = connection(connector);

        let err = conn.send(&commands::cmd_identify()).await.unwrap_err();
        match &err {
            Error::Unavailable { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**source, Error::Timeout));
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert!(err.is_timeout());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_failures_count_as_attempts() {
        let connector = Arc::new(MockConnector::new());
        for _ in 0..3 {
            connector.push_failure(Error::Transport("connection refused: mock".into()));
        }
        let conn = Connection::new(Box::new(connector.clone()), fast_config());

        let err = conn.send(&commands::cmd_identify()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!err.is_timeout());
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let mut mock = MockTransport::new();
        mock.expect(b"W\r", b"DONE\r\n");
        let connector = Arc::new(MockConnector::new());
        connector.push_transport(mock);
        let conn = Connection::new(Box::new(connector.clone()), fast_config());

        // The mock rejects the unexpected command with a protocol error.
        let err = conn.send(&commands::cmd_identify()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(connector.attempts(), 1);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn device_error_is_a_response_not_a_retry() {
        let mut mock = MockTransport::new();
        mock.expect(b"R05\r", b"ERROR\r\n");
        let connector = Arc::new(MockConnector::new());
        connector.push_transport(mock);
        let conn = Connection::new(Box::new(connector.clone()), fast_config());

        let pattern = chameleon_core::types::PatternId::new(5).unwrap();
        let response = conn
            .send(&commands::cmd_recall_pattern(pattern))
            .await
            .unwrap();
        assert!(response.is_error());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn partial_response_salvaged_on_timeout() {
        let mut mock = MockTransport::new();
        mock.expect(b"D04\r", b"OUTPUT   04   VIDEO   09   AUDIO   09\r\n");
        let connector = MockConnector::new();
        connector.push_transport(mock);
        let conn = connection(connector);

        let zone = ZoneId::new(4).unwrap();
        let response = conn.send(&commands::cmd_get_crosspoint(zone)).await.unwrap();
        assert_eq!(response.status, Status::Implicit);
        assert_eq!(response.lines.len(), 1);
    }

    #[tokio::test]
    async fn health_check_reports_both_ways() {
        let mut mock = MockTransport::new();
        mock.expect(b"I\r", b"Knox\r\nDONE\r\n");
        mock.expect_silence(b"I\r");
        let connector = Arc::new(MockConnector::new());
        connector.push_transport(mock);
        let conn = Connection::new(Box::new(connector.clone()), fast_config());

        assert!(conn.health_check().await);
        assert!(!conn.health_check().await);
        // A failed health check does not retry.
        assert_eq!(connector.attempts(), 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_then_send_reconnects() {
        let mut first = MockTransport::new();
        first.expect(b"I\r", b"A\r\nDONE\r\n");
        let mut second = MockTransport::new();
        second.expect(b"I\r", b"B\r\nDONE\r\n");
        let connector = Arc::new(MockConnector::new());
        connector.push_transport(first);
        connector.push_transport(second);
        let conn = Connection::new(Box::new(connector.clone()), fast_config());
        let mut state = conn.subscribe_state();

        assert_eq!(conn.send(&commands::cmd_identify()).await.unwrap().first_line(), Some("A"));
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

        assert_eq!(conn.send(&commands::cmd_identify()).await.unwrap().first_line(), Some("B"));
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn concurrent_commands_never_interleave() {
        let device = FakeChameleon::start_with(FakeOptions {
            response_delay: Duration::from_millis(2),
            ..FakeOptions::default()
        })
        .await
        .unwrap();
        let conn = Arc::new(Connection::new(
            Box::new(TcpConnector::new(device.host(), device.port())),
            ConnectionConfig {
                settle_delay: Duration::from_millis(20),
                command_timeout: Duration::from_secs(2),
                ..fast_config()
            },
        ));

        let mut tasks = Vec::new();
        for z in 1..=32u8 {
            let conn = Arc::clone(&conn);
            tasks.push(tokio::spawn(async move {
                let zone = ZoneId::new(z).unwrap();
                let response = conn.send(&commands::cmd_get_vtb(zone)).await.unwrap();
                let vtb = commands::parse_vtb(response.first_line().unwrap()).unwrap();
                (z, vtb.volume_raw)
            }));
        }

        for task in tasks {
            let (zone, volume) = task.await.unwrap();
            // The fake device seeds each zone's volume with its own number.
            assert_eq!(volume, i16::from(zone));
        }
        assert_eq!(device.connection_count(), 1);
        device.shutdown().await;
    }

    #[tokio::test]
    async fn late_done_after_vtb_is_drained_over_tcp() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.greeting(&[0xFF, 0xFE]);
        server.expect(
            b"$D07\r",
            b"V:12  M:1  L:0  BL:00 BR:00 B:-2 T: 0\r\nDONE\r\n",
        );
        server.expect(b"I\r", b"Knox Chameleon64i v2.1\r\nDONE\r\n");
        server.start();

        let conn = Connection::new(
            Box::new(TcpConnector::new("127.0.0.1", server.port())),
            ConnectionConfig {
                settle_delay: Duration::from_millis(20),
                command_timeout: Duration::from_secs(1),
                ..fast_config()
            },
        );

        let zone = ZoneId::new(7).unwrap();
        let response = conn.send(&commands::cmd_get_vtb(zone)).await.unwrap();
        let vtb = commands::parse_vtb(response.first_line().unwrap()).unwrap();
        assert_eq!(vtb.volume_raw, 12);
        assert!(vtb.muted);
        assert_eq!(vtb.bass, Some(-2));

        let response = conn.send(&commands::cmd_identify()).await.unwrap();
        assert_eq!(response.first_line(), Some("Knox Chameleon64i v2.1"));
        assert_eq!(response.status, Status::Done);

        conn.disconnect().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_send_does_not_leak_its_reply() {
        let device = FakeChameleon::start_with(FakeOptions {
            response_delay: Duration::from_millis(100),
            ..FakeOptions::default()
        })
        .await
        .unwrap();
        let conn = Connection::new(
            Box::new(TcpConnector::new(device.host(), device.port())),
            ConnectionConfig {
                settle_delay: Duration::from_millis(20),
                command_timeout: Duration::from_secs(2),
                ..fast_config()
            },
        );
        conn.connect().await.unwrap();

        // Dropped after the write, before zone 1's reply arrives.
        let zone1 = ZoneId::new(1).unwrap();
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), conn.send(&commands::cmd_get_vtb(zone1)))
                .await;
        assert!(cancelled.is_err());

        let zone2 = ZoneId::new(2).unwrap();
        let response = conn.send(&commands::cmd_get_vtb(zone2)).await.unwrap();
        let vtb = commands::parse_vtb(response.first_line().unwrap()).unwrap();
        assert_eq!(vtb.volume_raw, 2);
        assert_eq!(device.connection_count(), 2);
        device.shutdown().await;
    }

    #[tokio::test]
    async fn health_check_bound_covers_waiting_for_the_lock() {
        let device = FakeChameleon::start_with(FakeOptions {
            response_delay: Duration::from_millis(400),
            ..FakeOptions::default()
        })
        .await
        .unwrap();
        let conn = Arc::new(Connection::new(
            Box::new(TcpConnector::new(device.host(), device.port())),
            ConnectionConfig {
                settle_delay: Duration::from_millis(20),
                command_timeout: Duration::from_secs(2),
                health_check_timeout: Duration::from_millis(100),
                ..fast_config()
            },
        ));
        conn.connect().await.unwrap();

        let slow = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let zone = ZoneId::new(5).unwrap();
                conn.send(&commands::cmd_get_vtb(zone)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let started = tokio::time::Instant::now();
        assert!(!conn.health_check().await);
        assert!(started.elapsed() < Duration::from_millis(300));

        // The command holding the lock is unaffected.
        let response = slow.await.unwrap().unwrap();
        let vtb = commands::parse_vtb(response.first_line().unwrap()).unwrap();
        assert_eq!(vtb.volume_raw, 5);
        assert_eq!(device.connection_count(), 1);
        device.shutdown().await;
    }
}
