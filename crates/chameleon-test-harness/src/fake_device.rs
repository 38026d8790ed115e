//! In-process Chameleon64i simulator.
//!
//! [`FakeChameleon`] listens on a random localhost port and answers the
//! device's ASCII command set from an in-memory register file, the way a
//! real matrix behind an HF2211A bridge would: `0xFF 0xFE` on connect,
//! `DONE`/`ERROR` status lines, and a bare single line for `$D`.
//!
//! Failure injection covers what the bridge does in the field:
//!
//! - silent zones: any command addressing the zone gets no answer
//! - malformed zones: `$D` for the zone answers with garbage
//! - a fixed response delay
//! - hanging up after N commands on a connection
//!
//! # Example
//!
//! ```
//! use chameleon_test_harness::FakeChameleon;
//!
//! # async fn example() -> chameleon_core::Result<()> {
//! let device = FakeChameleon::start().await?;
//! device.set_silent_zone(5, true);
//! // ... point a client at device.host() / device.port() ...
//! device.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chameleon_core::error::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sign-on message returned by `I`.
pub const FAKE_IDENTITY: &str = "Knox Chameleon64i v1.0 (FAKE)";

/// Bytes the bridge emits when a client connects.
pub const INIT_NOISE: &[u8] = &[0xFF, 0xFE];

const ZONES: u8 = 64;
const MAX_VOLUME: u8 = 63;
const MAX_PATTERN: u8 = 20;

/// Maximum buffered command bytes before the buffer is reset.
const MAX_BUF: usize = 1024;

/// Register file for one output zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeZone {
    /// Routed video input.
    pub video: u8,
    /// Routed audio input.
    pub audio: u8,
    /// Volume, 0 loudest to 63 quietest.
    pub volume: u8,
    /// Mute flag.
    pub muted: bool,
    /// Loudness contour flag.
    pub loudness: bool,
    /// Bass, -7..=7.
    pub bass: i8,
    /// Treble, -7..=7.
    pub treble: i8,
    /// Left channel attenuation.
    pub balance_left: u8,
    /// Right channel attenuation.
    pub balance_right: u8,
}

impl FakeZone {
    fn initial(zone: u8) -> Self {
        FakeZone {
            video: 1,
            audio: 1,
            volume: zone % (MAX_VOLUME + 1),
            muted: false,
            loudness: false,
            bass: 0,
            treble: 0,
            balance_left: 0,
            balance_right: 0,
        }
    }
}

/// Knobs for [`FakeChameleon::start_with`].
#[derive(Debug, Clone)]
pub struct FakeOptions {
    /// Write [`INIT_NOISE`] on every new connection.
    pub init_noise: bool,
    /// Delay before every reply.
    pub response_delay: Duration,
    /// Close a connection instead of answering its N+1th command.
    pub hangup_after: Option<usize>,
}

impl Default for FakeOptions {
    fn default() -> Self {
        FakeOptions {
            init_noise: true,
            response_delay: Duration::ZERO,
            hangup_after: None,
        }
    }
}

/// What the simulator does with one command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Text(String),
    Silent,
}

#[derive(Debug)]
struct DeviceState {
    zones: Vec<FakeZone>,
    patterns: HashMap<u8, Vec<(u8, u8)>>,
    silent_zones: HashSet<u8>,
    malformed_zones: HashSet<u8>,
    command_log: Vec<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<DeviceState>,
    options: FakeOptions,
    connections: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        // A panicking test thread must not wedge every other connection.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A running simulator. Dropping it stops the listener.
#[derive(Debug)]
pub struct FakeChameleon {
    addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FakeChameleon {
    /// Start a simulator with default options.
    pub async fn start() -> Result<Self> {
        Self::start_with(FakeOptions::default()).await
    }

    /// Start a simulator with the given options.
    pub async fn start_with(options: FakeOptions) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind fake device: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(DeviceState {
                zones: (1..=ZONES).map(FakeZone::initial).collect(),
                patterns: HashMap::new(),
                silent_zones: HashSet::new(),
                malformed_zones: HashSet::new(),
                command_log: Vec::new(),
            }),
            options,
            connections: AtomicUsize::new(0),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), cancel.clone()));

        tracing::debug!(addr = %addr, "Fake Chameleon64i listening");

        Ok(FakeChameleon {
            addr,
            shared,
            cancel,
            task: Some(task),
        })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening host, as a string.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Every command received so far, without terminators.
    pub fn command_log(&self) -> Vec<String> {
        self.shared.state().command_log.clone()
    }

    /// Snapshot of a zone's registers. Panics on a zone outside 1..=64.
    pub fn zone(&self, zone: u8) -> FakeZone {
        self.shared.state().zones[usize::from(zone) - 1]
    }

    /// Overwrite a zone's registers.
    pub fn set_zone(&self, zone: u8, registers: FakeZone) {
        self.shared.state().zones[usize::from(zone) - 1] = registers;
    }

    /// Stop (or resume) answering commands that address `zone`.
    pub fn set_silent_zone(&self, zone: u8, silent: bool) {
        let mut state = self.shared.state();
        if silent {
            state.silent_zones.insert(zone);
        } else {
            state.silent_zones.remove(&zone);
        }
    }

    /// Make `$D` for `zone` answer with an unparseable line.
    pub fn set_malformed_zone(&self, zone: u8, malformed: bool) {
        let mut state = self.shared.state();
        if malformed {
            state.malformed_zones.insert(zone);
        } else {
            state.malformed_zones.remove(&zone);
        }
    }

    /// Stop the listener and all open connections.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FakeChameleon {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    shared.connections.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(peer = %peer, "Fake device accepted connection");
                    tokio::spawn(serve_connection(stream, Arc::clone(&shared), cancel.child_token()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Fake device accept failed");
                    break;
                }
            },
        }
    }
}

async fn serve_connection(mut stream: TcpStream, shared: Arc<Shared>, cancel: CancellationToken) {
    if shared.options.init_noise && stream.write_all(INIT_NOISE).await.is_err() {
        return;
    }

    let mut pending = Vec::new();
    let mut handled = 0usize;
    let mut buf = [0u8; 256];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };

        pending.extend_from_slice(&buf[..n]);
        if pending.len() > MAX_BUF {
            pending.clear();
            continue;
        }

        while let Some(pos) = pending.iter().position(|&b| b == b'\r') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            if command.is_empty() {
                continue;
            }

            if shared
                .options
                .hangup_after
                .is_some_and(|limit| handled >= limit)
            {
                tracing::debug!(command = %command, "Fake device hanging up");
                return;
            }
            handled += 1;

            let reply = shared.state().process(&command);

            if !shared.options.response_delay.is_zero() {
                tokio::time::sleep(shared.options.response_delay).await;
            }

            if let Reply::Text(text) = reply {
                if stream.write_all(text.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl DeviceState {
    fn process(&mut self, command: &str) -> Reply {
        self.command_log.push(command.to_string());

        if let Some(zone) = addressed_zone(command) {
            if self.silent_zones.contains(&zone) {
                return Reply::Silent;
            }
            if command.starts_with("$D") && self.malformed_zones.contains(&zone) {
                return Reply::Text("V:??  M:x\r\n".to_string());
            }
        }

        Reply::Text(
            self.execute(command)
                .unwrap_or_else(|| "ERROR\r\n".to_string()),
        )
    }

    fn zone_mut(&mut self, zone: u8) -> Option<&mut FakeZone> {
        if (1..=ZONES).contains(&zone) {
            self.zones.get_mut(usize::from(zone) - 1)
        } else {
            None
        }
    }

    fn execute(&mut self, command: &str) -> Option<String> {
        const DONE: &str = "DONE\r\n";

        if !command.is_ascii() {
            return None;
        }

        match command {
            "I" => return Some(format!("{FAKE_IDENTITY}\r\nDONE\r\n")),
            "W" => return Some("CARD 1 AUDIO/VIDEO 64x64\r\nDONE\r\n".to_string()),
            "M" => return Some(self.crosspoint_lines(1, ZONES)? + DONE),
            _ => {}
        }

        if let Some(rest) = command.strip_prefix('$') {
            let (op, args) = rest.split_at(rest.len().min(1));
            let zone = number(args.get(..2)?)?;
            let arg = &args[2..];
            let registers = self.zone_mut(zone)?;

            match op {
                "V" => {
                    if let Some(steps) = arg.strip_suffix('+') {
                        let steps = step_count(steps)?;
                        registers.volume = registers.volume.saturating_sub(steps);
                    } else if let Some(steps) = arg.strip_suffix('-') {
                        let steps = step_count(steps)?;
                        registers.volume = registers.volume.saturating_add(steps).min(MAX_VOLUME);
                    } else {
                        let volume = number(arg)?;
                        if arg.len() != 2 || volume > MAX_VOLUME {
                            return None;
                        }
                        registers.volume = volume;
                    }
                    Some(DONE.to_string())
                }
                "M" => {
                    registers.muted = match arg {
                        "0" => false,
                        "1" => true,
                        _ => return None,
                    };
                    Some(DONE.to_string())
                }
                "D" if arg.is_empty() => Some(format!(
                    "V:{}  M:{}  L:{}  BL:{:02} BR:{:02} B:{:>2} T:{:>2}\r\n",
                    registers.volume,
                    u8::from(registers.muted),
                    u8::from(registers.loudness),
                    registers.balance_left,
                    registers.balance_right,
                    registers.bass,
                    registers.treble,
                )),
                "B" | "T" => {
                    if !arg.starts_with(['+', '-']) {
                        return None;
                    }
                    let level: i8 = arg.parse().ok()?;
                    if !(-7..=7).contains(&level) {
                        return None;
                    }
                    if op == "B" {
                        registers.bass = level;
                    } else {
                        registers.treble = level;
                    }
                    Some(DONE.to_string())
                }
                "S" => {
                    match arg {
                        "-" => registers.balance_right = (registers.balance_right + 1).min(MAX_VOLUME),
                        "+" => registers.balance_left = (registers.balance_left + 1).min(MAX_VOLUME),
                        "0" => {
                            registers.balance_left = 0;
                            registers.balance_right = 0;
                        }
                        _ => return None,
                    }
                    Some(DONE.to_string())
                }
                _ => None,
            }
        } else {
            let (op, args) = command.split_at(command.len().min(1));
            match op {
                "B" | "V" | "A" => {
                    if args.len() != 4 {
                        return None;
                    }
                    let zone = number(&args[..2])?;
                    let input = number(&args[2..])?;
                    if !(1..=ZONES).contains(&input) {
                        return None;
                    }
                    let registers = self.zone_mut(zone)?;
                    if op != "A" {
                        registers.video = input;
                    }
                    if op != "V" {
                        registers.audio = input;
                    }
                    Some(DONE.to_string())
                }
                "D" => {
                    let (first, last) = match args.len() {
                        2 => {
                            let z = number(args)?;
                            (z, z)
                        }
                        4 => (number(&args[..2])?, number(&args[2..])?),
                        _ => return None,
                    };
                    Some(self.crosspoint_lines(first, last)? + DONE)
                }
                "S" | "R" => {
                    let slot = number(args)?;
                    if args.len() != 2 || !(1..=MAX_PATTERN).contains(&slot) {
                        return None;
                    }
                    if op == "S" {
                        let routing = self.zones.iter().map(|z| (z.video, z.audio)).collect();
                        self.patterns.insert(slot, routing);
                    } else {
                        let routing = self.patterns.get(&slot)?.clone();
                        for (zone, (video, audio)) in self.zones.iter_mut().zip(routing) {
                            zone.video = video;
                            zone.audio = audio;
                        }
                    }
                    Some(DONE.to_string())
                }
                _ => None,
            }
        }
    }

    fn crosspoint_lines(&self, first: u8, last: u8) -> Option<String> {
        if first < 1 || last > ZONES || first > last {
            return None;
        }
        let mut out = String::new();
        for zone in first..=last {
            let z = self.zones[usize::from(zone) - 1];
            out.push_str(&format!(
                "OUTPUT   {:2}   VIDEO   {:2}   AUDIO   {:2}\r\n",
                zone, z.video, z.audio
            ));
        }
        Some(out)
    }
}

/// The zone a command addresses, if any.
fn addressed_zone(command: &str) -> Option<u8> {
    let digits = if command.starts_with('$') {
        command.get(2..4)?
    } else if command.starts_with(['B', 'V', 'A', 'D']) {
        command.get(1..3)?
    } else {
        return None;
    };
    number(digits)
}

fn number(digits: &str) -> Option<u8> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn step_count(digits: &str) -> Option<u8> {
    if digits.is_empty() {
        Some(1)
    } else {
        number(digits).filter(|n| (1..=MAX_VOLUME).contains(n))
    }
}
