//! Core types used throughout the workspace.
//!
//! Validated identifiers ([`ZoneId`], [`InputId`], [`PatternId`]), device
//! register values ([`Volume`], [`ToneLevel`]), and the per-zone state
//! records produced by polling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of addressable zones (outputs) on a Chameleon64i.
pub const MAX_ZONES: u8 = 64;

/// Number of addressable inputs on a Chameleon64i.
pub const MAX_INPUTS: u8 = 64;

/// Quietest device volume. The device scale is inverted: 0 is loudest.
pub const VOLUME_MIN_LOUDNESS: u8 = 63;

/// Number of crosspoint patterns the device can store.
pub const MAX_PATTERNS: u8 = 20;

fn check_range(kind: &str, value: u8, min: u8, max: u8) -> Result<u8> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidParameter(format!(
            "{kind} must be {min}-{max}, got {value}"
        )))
    }
}

/// An output zone, 1-64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ZoneId(u8);

impl ZoneId {
    /// Create a zone identifier, rejecting values outside 1-64.
    pub fn new(zone: u8) -> Result<Self> {
        check_range("zone", zone, 1, MAX_ZONES).map(ZoneId)
    }

    /// Return the raw zone number.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Iterate over every zone the device can address.
    pub fn all() -> impl Iterator<Item = ZoneId> {
        (1..=MAX_ZONES).map(ZoneId)
    }
}

impl TryFrom<u8> for ZoneId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        ZoneId::new(value)
    }
}

impl From<ZoneId> for u8 {
    fn from(zone: ZoneId) -> u8 {
        zone.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ZoneId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("not a zone number: {s:?}")))?;
        ZoneId::new(n)
    }
}

/// A source input, 1-64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct InputId(u8);

impl InputId {
    /// Create an input identifier, rejecting values outside 1-64.
    pub fn new(input: u8) -> Result<Self> {
        check_range("input", input, 1, MAX_INPUTS).map(InputId)
    }

    /// Return the raw input number.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for InputId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        InputId::new(value)
    }
}

impl From<InputId> for u8 {
    fn from(input: InputId) -> u8 {
        input.0
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InputId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("not an input number: {s:?}")))?;
        InputId::new(n)
    }
}

/// A stored crosspoint pattern slot, 1-20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternId(u8);

impl PatternId {
    /// Create a pattern slot identifier, rejecting values outside 1-20.
    pub fn new(slot: u8) -> Result<Self> {
        check_range("pattern", slot, 1, MAX_PATTERNS).map(PatternId)
    }

    /// Return the raw slot number.
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Device volume in native units.
///
/// The Chameleon64i scale is inverted: `0` is loudest and `63` is quietest.
/// Host applications think in levels from `0.0` (silent) to `1.0` (full);
/// [`to_level`](Volume::to_level) and [`from_level`](Volume::from_level)
/// convert at the boundary using `level = 1 - device / 63`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Volume(u8);

impl Volume {
    /// The loudest setting (device value 0).
    pub const LOUDEST: Volume = Volume(0);

    /// The quietest setting (device value 63).
    pub const QUIETEST: Volume = Volume(VOLUME_MIN_LOUDNESS);

    /// Create a device volume, rejecting values outside 0-63.
    pub fn new(value: u8) -> Result<Self> {
        check_range("volume", value, 0, VOLUME_MIN_LOUDNESS).map(Volume)
    }

    /// Return the raw device value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Convert to a host level in `[0.0, 1.0]`.
    pub fn to_level(self) -> f64 {
        1.0 - f64::from(self.0) / f64::from(VOLUME_MIN_LOUDNESS)
    }

    /// Convert a host level to the nearest device value.
    ///
    /// Levels outside `[0.0, 1.0]` are clamped. Non-finite levels are
    /// rejected.
    pub fn from_level(level: f64) -> Result<Self> {
        if !level.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "volume level must be finite, got {level}"
            )));
        }
        let level = level.clamp(0.0, 1.0);
        let device = ((1.0 - level) * f64::from(VOLUME_MIN_LOUDNESS)).round();
        Ok(Volume(device as u8))
    }

    /// Step toward loud by `steps`, saturating at [`Volume::LOUDEST`].
    pub fn louder(self, steps: u8) -> Volume {
        Volume(self.0.saturating_sub(steps))
    }

    /// Step toward quiet by `steps`, saturating at [`Volume::QUIETEST`].
    pub fn quieter(self, steps: u8) -> Volume {
        Volume(self.0.saturating_add(steps).min(VOLUME_MIN_LOUDNESS))
    }
}

impl TryFrom<u8> for Volume {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Volume::new(value)
    }
}

impl From<Volume> for u8 {
    fn from(volume: Volume) -> u8 {
        volume.0
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Volume {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("not a volume: {s:?}")))?;
        Volume::new(n)
    }
}

/// Bass or treble adjustment, -7 to +7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub struct ToneLevel(i8);

impl ToneLevel {
    /// Create a tone level, rejecting values outside -7..=7.
    pub fn new(value: i8) -> Result<Self> {
        if (-7..=7).contains(&value) {
            Ok(ToneLevel(value))
        } else {
            Err(Error::InvalidParameter(format!(
                "tone level must be -7 to +7, got {value}"
            )))
        }
    }

    /// Return the raw signed value.
    pub fn get(self) -> i8 {
        self.0
    }
}

impl TryFrom<i8> for ToneLevel {
    type Error = Error;

    fn try_from(value: i8) -> Result<Self> {
        ToneLevel::new(value)
    }
}

impl From<ToneLevel> for i8 {
    fn from(level: ToneLevel) -> i8 {
        level.0
    }
}

/// Direction for the device's relative balance command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceShift {
    /// Attenuate the right channel (shift toward left).
    Left,
    /// Attenuate the left channel (shift toward right).
    Right,
    /// Reset both channels to center.
    Center,
}

/// Per-zone mute state.
///
/// Before the first successful poll the device state is genuinely unknown,
/// so this is tri-state rather than a `bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteState {
    /// Not yet read from the device.
    #[default]
    Unknown,
    /// Output suppressed.
    Muted,
    /// Output active.
    Unmuted,
}

impl MuteState {
    /// `Some(true)` when muted, `Some(false)` when unmuted, `None` if unknown.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            MuteState::Unknown => None,
            MuteState::Muted => Some(true),
            MuteState::Unmuted => Some(false),
        }
    }
}

impl From<bool> for MuteState {
    fn from(muted: bool) -> Self {
        if muted {
            MuteState::Muted
        } else {
            MuteState::Unmuted
        }
    }
}

impl fmt::Display for MuteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MuteState::Unknown => "unknown",
            MuteState::Muted => "muted",
            MuteState::Unmuted => "unmuted",
        };
        write!(f, "{s}")
    }
}

/// State of the persistent connection to the TCP bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket open.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open and usable.
    Connected,
    /// A command failed; waiting out the backoff before reconnecting.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

/// Decoded volume/tone/balance register dump (`$D` reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VtbState {
    /// Raw volume field. Unconfigured zones report values outside 0-63
    /// (typically `-1`).
    pub volume_raw: i16,
    /// Whether the zone output is muted.
    pub muted: bool,
    /// Loudness contour, if reported.
    pub loudness: Option<bool>,
    /// Left-channel balance attenuation, if reported.
    pub balance_left: Option<i16>,
    /// Right-channel balance attenuation, if reported.
    pub balance_right: Option<i16>,
    /// Bass, if reported.
    pub bass: Option<i16>,
    /// Treble, if reported.
    pub treble: Option<i16>,
}

impl VtbState {
    /// The volume as a validated device value, or `None` if the device
    /// reported an out-of-range value.
    pub fn volume(&self) -> Option<Volume> {
        u8::try_from(self.volume_raw)
            .ok()
            .and_then(|v| Volume::new(v).ok())
    }
}

/// One row of the crosspoint table: which inputs feed an output zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrosspointEntry {
    /// The output zone.
    pub zone: ZoneId,
    /// Input routed to the video bus.
    pub video: InputId,
    /// Input routed to the audio bus.
    pub audio: InputId,
}

/// Snapshot of one zone as last read from (or written to) the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneState {
    /// The zone this state belongs to.
    pub zone: ZoneId,
    /// Routed input, if known.
    pub input: Option<InputId>,
    /// Device volume, if known and in range.
    pub volume: Option<Volume>,
    /// Mute state; [`MuteState::Unknown`] until read.
    pub mute: MuteState,
    /// Loudness contour, if reported.
    pub loudness: Option<bool>,
    /// Left-channel balance attenuation, if reported.
    pub balance_left: Option<i16>,
    /// Right-channel balance attenuation, if reported.
    pub balance_right: Option<i16>,
    /// Bass, if reported.
    pub bass: Option<i16>,
    /// Treble, if reported.
    pub treble: Option<i16>,
}

impl ZoneState {
    /// A state with every field unknown.
    pub fn unknown(zone: ZoneId) -> Self {
        ZoneState {
            zone,
            input: None,
            volume: None,
            mute: MuteState::Unknown,
            loudness: None,
            balance_left: None,
            balance_right: None,
            bass: None,
            treble: None,
        }
    }

    /// Merge a VTB register dump into this state.
    pub fn apply_vtb(&mut self, vtb: &VtbState) {
        self.volume = vtb.volume();
        self.mute = MuteState::from(vtb.muted);
        self.loudness = vtb.loudness;
        self.balance_left = vtb.balance_left;
        self.balance_right = vtb.balance_right;
        self.bass = vtb.bass;
        self.treble = vtb.treble;
    }

    /// Host volume level, if the device volume is known.
    pub fn volume_level(&self) -> Option<f64> {
        self.volume.map(Volume::to_level)
    }
}
