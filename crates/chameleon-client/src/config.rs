//! Device configuration as stored by the host.
//!
//! A [`DeviceConfig`] is the config-entry data a host integration keeps for
//! one matrix: where the bridge is, which zones and inputs are in use and
//! what they are called, and how often to poll. It is plain serde data, so
//! hosts can persist it however they like; the CLI reads it from JSON.
//!
//! ```
//! use chameleon_client::config::DeviceConfig;
//!
//! let config = DeviceConfig::from_json_str(r#"{
//!     "host": "192.168.1.50",
//!     "zones": [{ "id": 1, "name": "Kitchen" }],
//!     "inputs": [{ "id": 3, "name": "Sonos" }]
//! }"#).unwrap();
//! assert_eq!(config.port, 8899);
//! assert_eq!(config.scan_interval().as_secs(), 60);
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chameleon_core::error::{Error, Result};
use chameleon_core::types::{InputId, ZoneId};
use chameleon_transport::DEFAULT_PORT;

/// Default poll interval in seconds.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;

/// Shortest poll interval, to avoid hammering the bridge.
pub const MIN_SCAN_INTERVAL_SECS: u64 = 10;

/// Longest poll interval.
pub const MAX_SCAN_INTERVAL_SECS: u64 = 300;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

/// A configured output zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Device zone number.
    pub id: ZoneId,
    /// Display name.
    pub name: String,
    /// Room or area the zone belongs to, if the host tracks one.
    #[serde(default, alias = "ha_area", skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

/// A configured input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Device input number.
    pub id: InputId,
    /// Display name, shown as the source name.
    pub name: String,
    /// Host entity that plays into this input, if any.
    ///
    /// Carried for the host only: the client never reads it, it is kept so
    /// that loading and saving an entry does not lose it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity: Option<String>,
}

/// Config-entry data for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Bridge host name or address.
    pub host: String,
    /// Bridge TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Zones in use.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    /// Inputs in use.
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    /// Poll interval in seconds; clamped by [`scan_interval`](Self::scan_interval).
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Per-command timeout override, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
    /// Attempts-per-command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Batch poll concurrency override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_concurrency: Option<usize>,
}

impl DeviceConfig {
    /// A config for `host` with defaults everywhere else.
    pub fn new(host: impl Into<String>) -> Self {
        DeviceConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            zones: Vec::new(),
            inputs: Vec::new(),
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            command_timeout_ms: None,
            max_attempts: None,
            poll_concurrency: None,
        }
    }

    /// Parse and validate JSON config data.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DeviceConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid device config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize device config: {e}")))
    }

    /// Reject an empty host, port 0, zero overrides and duplicate zone or
    /// input ids. Zone and input ranges are enforced by their types.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".into()));
        }
        if self.command_timeout_ms == Some(0) {
            return Err(Error::Config("command_timeout_ms must be positive".into()));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.poll_concurrency == Some(0) {
            return Err(Error::Config("poll_concurrency must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id) {
                return Err(Error::Config(format!("duplicate zone id {}", zone.id)));
            }
        }
        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.id) {
                return Err(Error::Config(format!("duplicate input id {}", input.id)));
            }
        }
        Ok(())
    }

    /// Poll interval, clamped to 10..=300 seconds.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(
            self.scan_interval_secs
                .clamp(MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS),
        )
    }

    /// Configured zone ids, in configuration order.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.zones.iter().map(|z| z.id).collect()
    }

    /// Display name of a configured zone.
    pub fn zone_name(&self, zone: ZoneId) -> Option<&str> {
        self.zones
            .iter()
            .find(|z| z.id == zone)
            .map(|z| z.name.as_str())
    }

    /// Display name of a configured input.
    pub fn input_name(&self, input: InputId) -> Option<&str> {
        self.inputs
            .iter()
            .find(|i| i.id == input)
            .map(|i| i.name.as_str())
    }

    /// Look up an input by display name (case-insensitive).
    pub fn input_by_name(&self, name: &str) -> Option<InputId> {
        self.inputs
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .map(|i| i.id)
    }
}
