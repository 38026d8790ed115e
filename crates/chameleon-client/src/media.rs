//! Media-player view of a zone.
//!
//! Host integrations model each output zone as a media player: on/off,
//! a volume level in `0.0..=1.0`, a mute flag and a named source picked
//! from the configured inputs. [`ZonePlayer`] maps those onto the zone's
//! device registers. Mute doubles as power: a muted zone is reported as
//! [`PlayerState::Off`].
//!
//! The player keeps an optimistic copy of the zone state. Every successful
//! action updates it right away; [`refresh`](ZonePlayer::refresh) replaces
//! it with what the device reports.
//!
//! A player whose device cannot be reached is marked unavailable rather
//! than dropped. The next successful refresh or action brings it back.

use serde::Serialize;
use tracing::{debug, warn};

use chameleon_core::error::{Error, Result};
use chameleon_core::types::{InputId, MuteState, ZoneId, ZoneState};

use crate::client::ChameleonClient;
use crate::config::{DeviceConfig, InputConfig};

/// Power state of a zone as a media player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// Zone unmuted.
    On,
    /// Zone muted.
    Off,
    /// Mute state not read yet.
    Unknown,
}

impl From<MuteState> for PlayerState {
    fn from(mute: MuteState) -> Self {
        match mute {
            MuteState::Unmuted => PlayerState::On,
            MuteState::Muted => PlayerState::Off,
            MuteState::Unknown => PlayerState::Unknown,
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlayerState::On => "on",
            PlayerState::Off => "off",
            PlayerState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Host-facing attributes of one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaView {
    /// The output zone.
    pub zone: ZoneId,
    /// Display name.
    pub name: String,
    /// Whether the last refresh or action reached the device.
    pub available: bool,
    /// On/off derived from the mute state.
    pub state: PlayerState,
    /// `0.0..=1.0`, 1.0 loudest.
    pub volume_level: Option<f64>,
    pub is_volume_muted: Option<bool>,
    /// Name of the routed input, if it is one of the configured inputs.
    pub source: Option<String>,
    pub source_list: Vec<String>,
}

/// One zone driven as a media player.
#[derive(Debug, Clone)]
pub struct ZonePlayer {
    client: ChameleonClient,
    zone: ZoneId,
    name: String,
    inputs: Vec<InputConfig>,
    state: ZoneState,
    available: bool,
}

impl ZonePlayer {
    /// A player for `zone` choosing among `inputs`. State starts unknown
    /// and the player available.
    pub fn new(
        client: ChameleonClient,
        zone: ZoneId,
        name: impl Into<String>,
        inputs: Vec<InputConfig>,
    ) -> Self {
        ZonePlayer {
            client,
            zone,
            name: name.into(),
            inputs,
            state: ZoneState::unknown(zone),
            available: true,
        }
    }

    /// One player per configured zone, in configuration order.
    pub fn from_config(client: &ChameleonClient, config: &DeviceConfig) -> Vec<ZonePlayer> {
        config
            .zones
            .iter()
            .map(|z| ZonePlayer::new(client.clone(), z.id, z.name.clone(), config.inputs.clone()))
            .collect()
    }

    /// The output zone this player drives.
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optimistic zone state.
    pub fn zone_state(&self) -> &ZoneState {
        &self.state
    }

    /// Replace the local state with a snapshot polled elsewhere, e.g. by
    /// a batch poll.
    pub fn update(&mut self, state: ZoneState) {
        if state.zone == self.zone {
            self.state = state;
            self.available = true;
        }
    }

    /// Apply this zone's entry from a batch poll. A failure that means the
    /// device is unreachable marks the player unavailable and keeps the
    /// last known state.
    pub fn update_result(&mut self, result: Result<ZoneState>) {
        match result {
            Ok(state) => self.update(state),
            Err(e) => self.record_failure(&e),
        }
    }

    /// `false` once the device stopped answering for this zone.
    pub fn available(&self) -> bool {
        self.available
    }

    /// On when unmuted, off when muted.
    pub fn state(&self) -> PlayerState {
        PlayerState::from(self.state.mute)
    }

    /// Volume as a host level, `0.0..=1.0`.
    pub fn volume_level(&self) -> Option<f64> {
        self.state.volume_level()
    }

    /// Mute flag, `None` until read.
    pub fn is_volume_muted(&self) -> Option<bool> {
        self.state.mute.as_bool()
    }

    /// Name of the routed input, if it is a configured one.
    pub fn source(&self) -> Option<&str> {
        let input = self.state.input?;
        self.inputs
            .iter()
            .find(|i| i.id == input)
            .map(|i| i.name.as_str())
    }

    /// Names of the configured inputs.
    pub fn source_list(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.name.clone()).collect()
    }

    /// Snapshot of all host-facing attributes.
    pub fn view(&self) -> MediaView {
        MediaView {
            zone: self.zone,
            name: self.name.clone(),
            available: self.available,
            state: self.state(),
            volume_level: self.volume_level(),
            is_volume_muted: self.is_volume_muted(),
            source: self.source().map(str::to_string),
            source_list: self.source_list(),
        }
    }

    /// Re-read the zone from the device.
    pub async fn refresh(&mut self) -> Result<()> {
        let result = self.client.get_zone_state(self.zone).await;
        self.state = self.track(result)?;
        Ok(())
    }

    /// Unmute the zone.
    pub async fn turn_on(&mut self) -> Result<()> {
        self.mute_volume(false).await
    }

    /// Mute the zone.
    pub async fn turn_off(&mut self) -> Result<()> {
        self.mute_volume(true).await
    }

    /// Mute or unmute the zone.
    pub async fn mute_volume(&mut self, muted: bool) -> Result<()> {
        let result = self.client.set_mute(self.zone, muted).await;
        self.track(result)?;
        self.state.mute = MuteState::from(muted);
        Ok(())
    }

    /// Set the volume from a host level, `0.0..=1.0`.
    pub async fn set_volume_level(&mut self, level: f64) -> Result<()> {
        let result = self.client.set_volume_level(self.zone, level).await;
        let volume = self.track(result)?;
        self.state.volume = Some(volume);
        Ok(())
    }

    /// One device step louder.
    pub async fn volume_up(&mut self) -> Result<()> {
        let result = self.client.volume_up(self.zone, 1).await;
        self.track(result)?;
        self.state.volume = self.state.volume.map(|v| v.louder(1));
        Ok(())
    }

    /// One device step quieter.
    pub async fn volume_down(&mut self) -> Result<()> {
        let result = self.client.volume_down(self.zone, 1).await;
        self.track(result)?;
        self.state.volume = self.state.volume.map(|v| v.quieter(1));
        Ok(())
    }

    /// Route the input named `source` (case-insensitive) to the zone.
    pub async fn select_source(&mut self, source: &str) -> Result<()> {
        let input = self.input_named(source)?;
        let result = self.client.set_input(self.zone, input).await;
        self.track(result)?;
        debug!(zone = %self.zone, input = %input, source, "Source selected");
        self.state.input = Some(input);
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.available = true,
            Err(e) => self.record_failure(e),
        }
        result
    }

    fn record_failure(&mut self, error: &Error) {
        if error.is_unavailable() {
            if self.available {
                warn!(zone = %self.zone, error = %error, "Zone unavailable");
            }
            self.available = false;
        }
    }

    fn input_named(&self, source: &str) -> Result<InputId> {
        self.inputs
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(source))
            .map(|i| i.id)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown source {source:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ChameleonBuilder;
    use chameleon_core::types::Volume;
    use chameleon_test_harness::{FakeChameleon, MockConnector};
    use std::collections::HashMap;
    use std::time::Duration;

    fn inputs() -> Vec<InputConfig> {
        vec![
            InputConfig {
                id: InputId::new(1).unwrap(),
                name: "Sonos".into(),
                source_entity: None,
            },
            InputConfig {
                id: InputId::new(4).unwrap(),
                name: "TV".into(),
                source_entity: Some("media_player.tv".into()),
            },
        ]
    }

    fn client_for(device: &FakeChameleon) -> ChameleonClient {
        ChameleonBuilder::new()
            .host(&device.host())
            .port(device.port())
            .settle_delay(Duration::from_millis(10))
            .command_timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    fn zone(n: u8) -> ZoneId {
        ZoneId::new(n).unwrap()
    }

    #[test]
    fn player_state_mapping() {
        assert_eq!(PlayerState::from(MuteState::Unmuted), PlayerState::On);
        assert_eq!(PlayerState::from(MuteState::Muted), PlayerState::Off);
        assert_eq!(PlayerState::from(MuteState::Unknown), PlayerState::Unknown);
        assert_eq!(PlayerState::Off.to_string(), "off");
    }

    #[test]
    fn unknown_before_first_poll() {
        let client = ChameleonBuilder::new()
            .build_with_connector(Box::new(MockConnector::new()))
            .unwrap();
        let player = ZonePlayer::new(client, zone(2), "Den", inputs());

        let view = player.view();
        assert!(view.available);
        assert_eq!(view.state, PlayerState::Unknown);
        assert_eq!(view.volume_level, None);
        assert_eq!(view.is_volume_muted, None);
        assert_eq!(view.source, None);
        assert_eq!(view.source_list, vec!["Sonos".to_string(), "TV".to_string()]);
    }

    #[test]
    fn update_ignores_other_zones() {
        let client = ChameleonBuilder::new()
            .build_with_connector(Box::new(MockConnector::new()))
            .unwrap();
        let mut player = ZonePlayer::new(client, zone(2), "Den", inputs());

        let mut other = ZoneState::unknown(zone(3));
        other.mute = MuteState::Muted;
        player.update(other);
        assert_eq!(player.state(), PlayerState::Unknown);

        let mut mine = ZoneState::unknown(zone(2));
        mine.mute = MuteState::Unmuted;
        mine.input = InputId::new(9).ok();
        player.update(mine);
        assert_eq!(player.state(), PlayerState::On);
        // Input 9 is routed but not configured.
        assert_eq!(player.source(), None);
    }

    #[tokio::test]
    async fn refresh_reads_device() {
        let device = FakeChameleon::start().await.unwrap();
        let mut player = ZonePlayer::new(client_for(&device), zone(21), "Patio", inputs());

        player.refresh().await.unwrap();
        assert_eq!(player.state(), PlayerState::On);
        assert_eq!(player.is_volume_muted(), Some(false));
        assert_eq!(player.zone_state().volume, Some(Volume::new(21).unwrap()));
        assert!((player.volume_level().unwrap() - (1.0 - 21.0 / 63.0)).abs() < 1e-9);
        assert_eq!(player.source(), Some("Sonos"));
        device.shutdown().await;
    }

    #[tokio::test]
    async fn actions_update_device_and_local_state() {
        let device = FakeChameleon::start().await.unwrap();
        let mut player = ZonePlayer::new(client_for(&device), zone(6), "Kitchen", inputs());

        player.turn_off().await.unwrap();
        assert_eq!(player.state(), PlayerState::Off);
        assert!(device.zone(6).muted);

        player.turn_on().await.unwrap();
        assert_eq!(player.state(), PlayerState::On);
        assert!(!device.zone(6).muted);

        player.set_volume_level(1.0).await.unwrap();
        assert_eq!(player.volume_level(), Some(1.0));
        assert_eq!(device.zone(6).volume, 0);

        player.volume_down().await.unwrap();
        assert_eq!(player.zone_state().volume, Some(Volume::new(1).unwrap()));
        assert_eq!(device.zone(6).volume, 1);
        player.volume_up().await.unwrap();
        assert_eq!(device.zone(6).volume, 0);

        player.select_source("tv").await.unwrap();
        assert_eq!(player.source(), Some("TV"));
        assert_eq!(device.zone(6).video, 4);
        assert_eq!(device.zone(6).audio, 4);

        player.refresh().await.unwrap();
        assert_eq!(player.source(), Some("TV"));
        assert_eq!(player.zone_state().volume, Some(Volume::LOUDEST));
        device.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_source_is_rejected_without_io() {
        let device = FakeChameleon::start().await.unwrap();
        let mut player = ZonePlayer::new(client_for(&device), zone(1), "Hall", inputs());

        let err = player.select_source("Radio").await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(device.command_log().is_empty());
        device.shutdown().await;
    }

    #[tokio::test]
    async fn players_from_config() {
        let config = DeviceConfig::from_json_str(
            r#"{ "host": "h", "zones": [{ "id": 3, "name": "Office" }, { "id": 7, "name": "Gym" }],
                 "inputs": [{ "id": 2, "name": "Radio" }] }"#,
        )
        .unwrap();
        let client = ChameleonBuilder::from_config(&config).build().unwrap();
        let players = ZonePlayer::from_config(&client, &config);

        assert_eq!(players.len(), 2);
        assert_eq!(players[1].zone(), zone(7));
        assert_eq!(players[1].name(), "Gym");
        assert_eq!(players[0].source_list(), vec!["Radio".to_string()]);
    }

    #[tokio::test]
    async fn silent_device_marks_player_unavailable() {
        let device = FakeChameleon::start().await.unwrap();
        let client = ChameleonBuilder::new()
            .host(&device.host())
            .port(device.port())
            .settle_delay(Duration::from_millis(10))
            .command_timeout(Duration::from_millis(150))
            .max_attempts(1)
            .build()
            .unwrap();
        let mut player = ZonePlayer::new(client, zone(4), "Study", inputs());

        player.refresh().await.unwrap();
        assert!(player.available());
        let before = player.zone_state().clone();

        device.set_silent_zone(4, true);
        let err = player.refresh().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!player.available());
        assert!(!player.view().available);
        // Last known values are kept.
        assert_eq!(player.zone_state(), &before);

        device.set_silent_zone(4, false);
        player.turn_off().await.unwrap();
        assert!(player.available());
        device.shutdown().await;
    }

    #[tokio::test]
    async fn batch_failure_marks_player_unavailable() {
        let device = FakeChameleon::start().await.unwrap();
        let client = ChameleonBuilder::new()
            .host(&device.host())
            .port(device.port())
            .settle_delay(Duration::from_millis(10))
            .command_timeout(Duration::from_millis(150))
            .max_attempts(1)
            .build()
            .unwrap();
        let mut quiet = ZonePlayer::new(client.clone(), zone(8), "Garage", inputs());
        let mut loud = ZonePlayer::new(client.clone(), zone(9), "Gym", inputs());
        device.set_silent_zone(8, true);

        let batch = client.get_all_zone_states(&[zone(8), zone(9)]).await;
        let mut results: HashMap<ZoneId, Result<ZoneState>> =
            batch.into_results().into_iter().collect();
        quiet.update_result(results.remove(&zone(8)).unwrap());
        loud.update_result(results.remove(&zone(9)).unwrap());

        assert!(!quiet.available());
        assert_eq!(quiet.state(), PlayerState::Unknown);
        assert!(loud.available());
        assert_eq!(loud.zone_state().volume, Some(Volume::new(9).unwrap()));
        device.shutdown().await;
    }
}
