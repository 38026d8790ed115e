//! ChameleonClient -- per-zone operations on top of a [`Connection`].
//!
//! Every method validates its arguments through the typed identifiers,
//! sends exactly one command (two for [`get_zone_state`]) through the
//! serialized connection, and turns the device's reply into a typed result.
//! Successful set operations publish a [`ChameleonEvent`].
//!
//! Unit conversion between host volume levels (`0.0..=1.0`, 1.0 loudest)
//! and device volume (`0..=63`, 0 loudest) happens here, at the boundary.
//!
//! [`get_zone_state`]: ChameleonClient::get_zone_state

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Semaphore};
use tracing::{debug, info};

use chameleon_core::error::{Error, Result};
use chameleon_core::events::ChameleonEvent;
use chameleon_core::types::*;
use chameleon_protocol::commands::{self, Command};
use chameleon_protocol::protocol::Response;

use crate::connection::Connection;

/// Async client for one Chameleon64i.
///
/// Cheap to clone; clones share the connection and the poll gate.
/// Constructed via [`ChameleonBuilder`](crate::builder::ChameleonBuilder).
#[derive(Debug, Clone)]
pub struct ChameleonClient {
    connection: Arc<Connection>,
    pub(crate) poll_gate: Arc<Semaphore>,
    poll_concurrency: usize,
}

impl ChameleonClient {
    /// Wrap a connection. `poll_concurrency` bounds how many zone queries a
    /// batch poll keeps queued at once (minimum 1).
    pub fn new(connection: Connection, poll_concurrency: usize) -> Self {
        let poll_concurrency = poll_concurrency.max(1);
        ChameleonClient {
            connection: Arc::new(connection),
            poll_gate: Arc::new(Semaphore::new(poll_concurrency)),
            poll_concurrency,
        }
    }

    /// The underlying connection manager.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Batch poll concurrency ceiling.
    pub fn poll_concurrency(&self) -> usize {
        self.poll_concurrency
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    /// Open the connection now rather than on the first command.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Identify round-trip bounded by the health-check timeout.
    pub async fn health_check(&self) -> bool {
        self.connection.health_check().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Subscribe to connection and zone change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChameleonEvent> {
        self.connection.subscribe()
    }

    // ---------------------------------------------------------------
    // Command helpers
    // ---------------------------------------------------------------

    /// Send a command and map a device `ERROR` to [`Error::Rejected`].
    async fn execute(&self, command: Command) -> Result<Response> {
        let response = self.connection.send(&command).await?;
        commands::check_status(&command, &response)?;
        Ok(response)
    }

    /// Send a raw command line and return the reply lines.
    ///
    /// Intended for diagnostics; the reply is expected to end in a status
    /// line.
    pub async fn send_raw(&self, text: &str, timeout: Duration) -> Result<Response> {
        let text = text.trim();
        if text.is_empty() || !text.is_ascii() || text.contains(['\r', '\n']) {
            return Err(Error::InvalidParameter(
                "raw command must be a single non-empty ASCII line".into(),
            ));
        }
        let command = commands::cmd_raw(text);
        self.connection.send_with_timeout(&command, timeout).await
    }

    // ---------------------------------------------------------------
    // Interrogation
    // ---------------------------------------------------------------

    /// Sign-on message including the firmware revision.
    pub async fn identify(&self) -> Result<String> {
        let response = self.execute(commands::cmd_identify()).await?;
        commands::parse_identify(&response)
    }

    /// Installed crosspoint cards, one line per card.
    pub async fn list_cards(&self) -> Result<Vec<String>> {
        let response = self.execute(commands::cmd_list_cards()).await?;
        Ok(response.lines)
    }

    // ---------------------------------------------------------------
    // Routing
    // ---------------------------------------------------------------

    /// Route `input` to `zone`, audio and video together.
    pub async fn set_input(&self, zone: ZoneId, input: InputId) -> Result<()> {
        debug!(zone = %zone, input = %input, "Setting input");
        self.execute(commands::cmd_set_input(zone, input)).await?;
        self.connection
            .emit(ChameleonEvent::InputChanged { zone, input });
        Ok(())
    }

    /// Route video only.
    pub async fn set_video_input(&self, zone: ZoneId, input: InputId) -> Result<()> {
        debug!(zone = %zone, input = %input, "Setting video input");
        self.execute(commands::cmd_set_video_input(zone, input))
            .await?;
        self.connection
            .emit(ChameleonEvent::InputChanged { zone, input });
        Ok(())
    }

    /// Route audio only.
    pub async fn set_audio_input(&self, zone: ZoneId, input: InputId) -> Result<()> {
        debug!(zone = %zone, input = %input, "Setting audio input");
        self.execute(commands::cmd_set_audio_input(zone, input))
            .await?;
        Ok(())
    }

    /// Video and audio routing of one zone.
    pub async fn get_crosspoint(&self, zone: ZoneId) -> Result<CrosspointEntry> {
        let response = self.execute(commands::cmd_get_crosspoint(zone)).await?;
        commands::parse_zone_crosspoint(&response, zone)
    }

    /// The input routed to `zone` (its video crosspoint).
    pub async fn get_input(&self, zone: ZoneId) -> Result<InputId> {
        Ok(self.get_crosspoint(zone).await?.video)
    }

    /// Routing of every zone.
    pub async fn get_crosspoint_map(&self) -> Result<Vec<CrosspointEntry>> {
        let response = self.execute(commands::cmd_get_crosspoint_map()).await?;
        commands::parse_crosspoint_map(&response.lines)
    }

    // ---------------------------------------------------------------
    // Volume and mute
    // ---------------------------------------------------------------

    /// Set the device volume (0 loudest, 63 quietest).
    pub async fn set_volume(&self, zone: ZoneId, volume: Volume) -> Result<()> {
        debug!(zone = %zone, volume = %volume, "Setting volume");
        self.execute(commands::cmd_set_volume(zone, volume)).await?;
        self.connection
            .emit(ChameleonEvent::VolumeChanged { zone, volume });
        Ok(())
    }

    /// Current device volume; `None` if the device reports a value outside
    /// 0..=63.
    pub async fn get_volume(&self, zone: ZoneId) -> Result<Option<Volume>> {
        Ok(self.get_vtb(zone).await?.volume())
    }

    /// Set the volume from a host level (`0.0` silent .. `1.0` loudest).
    /// Returns the device volume that was sent.
    pub async fn set_volume_level(&self, zone: ZoneId, level: f64) -> Result<Volume> {
        let volume = Volume::from_level(level)?;
        self.set_volume(zone, volume).await?;
        Ok(volume)
    }

    /// Current volume as a host level.
    pub async fn get_volume_level(&self, zone: ZoneId) -> Result<Option<f64>> {
        Ok(self.get_volume(zone).await?.map(Volume::to_level))
    }

    /// Step the volume louder.
    pub async fn volume_up(&self, zone: ZoneId, steps: u8) -> Result<()> {
        self.execute(commands::cmd_volume_up(zone, steps)?).await?;
        Ok(())
    }

    /// Step the volume quieter.
    pub async fn volume_down(&self, zone: ZoneId, steps: u8) -> Result<()> {
        self.execute(commands::cmd_volume_down(zone, steps)?).await?;
        Ok(())
    }

    /// Mute or unmute a zone.
    pub async fn set_mute(&self, zone: ZoneId, muted: bool) -> Result<()> {
        debug!(zone = %zone, muted, "Setting mute");
        self.execute(commands::cmd_set_mute(zone, muted)).await?;
        self.connection
            .emit(ChameleonEvent::MuteChanged { zone, muted });
        Ok(())
    }

    /// Current mute state as reported by the device.
    pub async fn get_mute(&self, zone: ZoneId) -> Result<MuteState> {
        Ok(MuteState::from(self.get_vtb(zone).await?.muted))
    }

    // ---------------------------------------------------------------
    // Tone
    // ---------------------------------------------------------------

    /// Volume, mute, loudness, balance and tone in one query.
    pub async fn get_vtb(&self, zone: ZoneId) -> Result<VtbState> {
        let command = commands::cmd_get_vtb(zone);
        let response = self.execute(command).await?;
        let line = response
            .first_line()
            .ok_or_else(|| Error::Protocol(format!("empty VTB reply for zone {zone}")))?;
        commands::parse_vtb(line)
    }

    /// Set bass.
    pub async fn set_bass(&self, zone: ZoneId, level: ToneLevel) -> Result<()> {
        self.execute(commands::cmd_set_bass(zone, level)).await?;
        Ok(())
    }

    /// Set treble.
    pub async fn set_treble(&self, zone: ZoneId, level: ToneLevel) -> Result<()> {
        self.execute(commands::cmd_set_treble(zone, level)).await?;
        Ok(())
    }

    /// Shift the balance one step, or re-center it.
    pub async fn shift_balance(&self, zone: ZoneId, shift: BalanceShift) -> Result<()> {
        self.execute(commands::cmd_shift_balance(zone, shift))
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Zone state
    // ---------------------------------------------------------------

    /// Full snapshot of one zone: the VTB dump plus the crosspoint.
    ///
    /// A zone whose crosspoint query the device rejects is still reported,
    /// with an unknown input.
    pub async fn get_zone_state(&self, zone: ZoneId) -> Result<ZoneState> {
        let vtb = self.get_vtb(zone).await?;
        let mut state = ZoneState::unknown(zone);
        state.apply_vtb(&vtb);

        match self.get_crosspoint(zone).await {
            Ok(entry) => state.input = Some(entry.video),
            Err(Error::Rejected(msg)) => {
                debug!(zone = %zone, reason = %msg, "Crosspoint query rejected, input unknown");
            }
            Err(e) => return Err(e),
        }
        Ok(state)
    }

    // ---------------------------------------------------------------
    // Patterns
    // ---------------------------------------------------------------

    /// Store the current routing as pattern `pattern`.
    pub async fn store_pattern(&self, pattern: PatternId) -> Result<()> {
        info!(pattern = pattern.get(), "Storing crosspoint pattern");
        self.execute(commands::cmd_store_pattern(pattern)).await?;
        Ok(())
    }

    /// Recall routing pattern `pattern`.
    pub async fn recall_pattern(&self, pattern: PatternId) -> Result<()> {
        info!(pattern = pattern.get(), "Recalling crosspoint pattern");
        self.execute(commands::cmd_recall_pattern(pattern)).await?;
        Ok(())
    }
}
