//! Chameleon64i command builders and response parsers.
//!
//! All functions are pure -- they produce [`Command`]s or consume decoded
//! [`Response`]s without performing any I/O. Identifiers are validated by
//! their types ([`ZoneId`], [`InputId`], [`Volume`], ...), so builders only
//! fail for parameters that have no dedicated type.
//!
//! # Command reference
//!
//! Based on the Chameleon64i RS-232 manual, section 3.4. Zone, input and
//! pattern numbers are always two zero-padded decimal digits.
//!
//! | Command | Meaning |
//! |---------|---------|
//! | `Bzzii` | route input `ii` (audio and video) to zone `zz` |
//! | `Vzzii` / `Azzii` | route video only / audio only |
//! | `Dzz` | query the crosspoint of zone `zz` |
//! | `M` | dump the whole crosspoint map |
//! | `$Vzzvv` | set volume (`00` loudest, `63` quietest) |
//! | `$Vzz+` / `$Vzzn-` | step volume |
//! | `$Mzz1` / `$Mzz0` | mute / unmute |
//! | `$Dzz` | dump volume, mute, loudness, balance and tone |
//! | `$Bzz+n` / `$Tzz-n` | set bass / treble |
//! | `$Szz-` / `$Szz+` / `$Szz0` | shift balance |
//! | `Snn` / `Rnn` | store / recall pattern |
//! | `I` | sign-on message with firmware revision |
//! | `W` | list installed crosspoint cards |

use std::fmt;

use chameleon_core::{
    BalanceShift, CrosspointEntry, Error, InputId, PatternId, Result, ToneLevel, Volume, VtbState,
    ZoneId, VOLUME_MIN_LOUDNESS,
};

use crate::protocol::{encode_command, Response, ResponseShape};

/// A single device command plus the shape of its expected response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    shape: ResponseShape,
}

impl Command {
    fn status(text: String) -> Self {
        Command {
            text,
            shape: ResponseShape::Status,
        }
    }

    fn single_line(text: String) -> Self {
        Command {
            text,
            shape: ResponseShape::SingleLine,
        }
    }

    /// Command text without the terminator.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Expected response shape.
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Wire bytes including the `\r` terminator.
    pub fn encode(&self) -> Vec<u8> {
        encode_command(&self.text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ---------------------------------------------------------------
// Routing
// ---------------------------------------------------------------

/// Route `input` to `zone`, audio and video together (`Bzzii`).
pub fn cmd_set_input(zone: ZoneId, input: InputId) -> Command {
    Command::status(format!("B{:02}{:02}", zone.get(), input.get()))
}

/// Route video only (`Vzzii`).
pub fn cmd_set_video_input(zone: ZoneId, input: InputId) -> Command {
    Command::status(format!("V{:02}{:02}", zone.get(), input.get()))
}

/// Route audio only (`Azzii`).
pub fn cmd_set_audio_input(zone: ZoneId, input: InputId) -> Command {
    Command::status(format!("A{:02}{:02}", zone.get(), input.get()))
}

/// Query the crosspoint of one zone (`Dzz`).
pub fn cmd_get_crosspoint(zone: ZoneId) -> Command {
    Command::status(format!("D{:02}", zone.get()))
}

/// Dump the crosspoint of every zone (`M`).
pub fn cmd_get_crosspoint_map() -> Command {
    Command::status("M".to_string())
}

// ---------------------------------------------------------------
// Volume, mute, tone
// ---------------------------------------------------------------

/// Set the absolute volume (`$Vzzvv`).
pub fn cmd_set_volume(zone: ZoneId, volume: Volume) -> Command {
    Command::status(format!("$V{:02}{:02}", zone.get(), volume.get()))
}

/// Step the volume louder by `steps` (`$Vzz+` or `$Vzzn+`).
///
/// Louder means a *lower* device value; the device clamps at `00`.
pub fn cmd_volume_up(zone: ZoneId, steps: u8) -> Result<Command> {
    volume_step(zone, steps, '+')
}

/// Step the volume quieter by `steps` (`$Vzz-` or `$Vzzn-`).
pub fn cmd_volume_down(zone: ZoneId, steps: u8) -> Result<Command> {
    volume_step(zone, steps, '-')
}

fn volume_step(zone: ZoneId, steps: u8, direction: char) -> Result<Command> {
    match steps {
        0 => Err(Error::InvalidParameter("volume step must be at least 1".into())),
        1 => Ok(Command::status(format!("$V{:02}{direction}", zone.get()))),
        n if n <= VOLUME_MIN_LOUDNESS => Ok(Command::status(format!(
            "$V{:02}{n}{direction}",
            zone.get()
        ))),
        n => Err(Error::InvalidParameter(format!(
            "volume step must be at most {VOLUME_MIN_LOUDNESS}, got {n}"
        ))),
    }
}

/// Mute or unmute a zone (`$Mzz1` / `$Mzz0`).
pub fn cmd_set_mute(zone: ZoneId, muted: bool) -> Command {
    Command::status(format!("$M{:02}{}", zone.get(), if muted { '1' } else { '0' }))
}

/// Dump volume, mute, loudness, balance and tone (`$Dzz`).
///
/// The device answers with one line and no status line.
pub fn cmd_get_vtb(zone: ZoneId) -> Command {
    Command::single_line(format!("$D{:02}", zone.get()))
}

/// Set bass (`$Bzz+n` / `$Bzz-n`).
pub fn cmd_set_bass(zone: ZoneId, level: ToneLevel) -> Command {
    Command::status(format!("$B{:02}{:+}", zone.get(), level.get()))
}

/// Set treble (`$Tzz+n` / `$Tzz-n`).
pub fn cmd_set_treble(zone: ZoneId, level: ToneLevel) -> Command {
    Command::status(format!("$T{:02}{:+}", zone.get(), level.get()))
}

/// Shift the balance one step, or re-center it (`$Szz-`, `$Szz+`, `$Szz0`).
pub fn cmd_shift_balance(zone: ZoneId, shift: BalanceShift) -> Command {
    let code = match shift {
        BalanceShift::Left => '-',
        BalanceShift::Right => '+',
        BalanceShift::Center => '0',
    };
    Command::status(format!("$S{:02}{code}", zone.get()))
}

// ---------------------------------------------------------------
// Patterns and interrogation
// ---------------------------------------------------------------

/// Store the current crosspoint pattern (`Snn`).
pub fn cmd_store_pattern(pattern: PatternId) -> Command {
    Command::status(format!("S{:02}", pattern.get()))
}

/// Recall a stored crosspoint pattern (`Rnn`).
pub fn cmd_recall_pattern(pattern: PatternId) -> Command {
    Command::status(format!("R{:02}", pattern.get()))
}

/// Sign-on message with firmware revision (`I`). Also the health check.
pub fn cmd_identify() -> Command {
    Command::status("I".to_string())
}

/// List installed crosspoint cards (`W`).
pub fn cmd_list_cards() -> Command {
    Command::status("W".to_string())
}

/// Arbitrary command text, answered with a status line. For diagnostics.
pub fn cmd_raw(text: &str) -> Command {
    Command::status(text.to_string())
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Map a device `ERROR` reply to [`Error::Rejected`].
pub fn check_status(command: &Command, response: &Response) -> Result<()> {
    if response.is_error() {
        Err(Error::Rejected(format!(
            "device rejected command {}",
            command.as_str()
        )))
    } else {
        Ok(())
    }
}

/// Parse a `$D` reply line.
///
/// ```text
/// V:32  M:0  L:0  BL:00 BR:00 B: 0 T: 0
/// ```
///
/// `V` and `M` are mandatory; the tone fields are optional. Values may
/// carry a sign (`V:+4`) and may be separated from their key by spaces
/// (`B: 0`).
pub fn parse_vtb(line: &str) -> Result<VtbState> {
    let mut volume = None;
    let mut muted = None;
    let mut vtb = VtbState {
        volume_raw: 0,
        muted: false,
        loudness: None,
        balance_left: None,
        balance_right: None,
        bass: None,
        treble: None,
    };

    for (key, value) in vtb_fields(line)? {
        let number: i16 = value.parse().map_err(|_| {
            Error::Protocol(format!("non-numeric {key} value {value:?} in VTB {line:?}"))
        })?;

        match key.to_ascii_uppercase().as_str() {
            "V" => volume = Some(number),
            "M" => muted = Some(flag(key, number, line)?),
            "L" => vtb.loudness = Some(flag(key, number, line)?),
            "BL" => vtb.balance_left = Some(number),
            "BR" => vtb.balance_right = Some(number),
            "B" => vtb.bass = Some(number),
            "T" => vtb.treble = Some(number),
            _ => {
                return Err(Error::Protocol(format!(
                    "unknown VTB field {key:?} in {line:?}"
                )))
            }
        }
    }

    vtb.volume_raw =
        volume.ok_or_else(|| Error::Protocol(format!("VTB missing volume field: {line:?}")))?;
    vtb.muted = muted.ok_or_else(|| Error::Protocol(format!("VTB missing mute field: {line:?}")))?;
    Ok(vtb)
}

/// Split a VTB line into `(key, value)` pairs, joining `KEY:` with a value
/// in the following token.
fn vtb_fields(line: &str) -> Result<Vec<(&str, &str)>> {
    let mut fields = Vec::new();
    let mut tokens = line.split_whitespace();

    while let Some(token) = tokens.next() {
        let (key, value) = token
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("malformed VTB token {token:?} in {line:?}")))?;
        let value = if value.is_empty() {
            tokens
                .next()
                .ok_or_else(|| Error::Protocol(format!("VTB field {key:?} has no value")))?
        } else {
            value
        };
        if key.is_empty() {
            return Err(Error::Protocol(format!("empty VTB key in {line:?}")));
        }
        fields.push((key, value));
    }

    if fields.is_empty() {
        return Err(Error::Protocol("empty VTB response".into()));
    }
    Ok(fields)
}

fn flag(key: &str, value: i16, line: &str) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::Protocol(format!(
            "VTB field {key} must be 0 or 1, got {value} in {line:?}"
        ))),
    }
}

/// Parse one crosspoint line.
///
/// ```text
/// OUTPUT   01   VIDEO   02   AUDIO   02
/// ```
pub fn parse_crosspoint(line: &str) -> Result<CrosspointEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(Error::Protocol(format!(
            "crosspoint line must have 6 fields, got {}: {line:?}",
            fields.len()
        )));
    }

    for (idx, label) in [(0, "OUTPUT"), (2, "VIDEO"), (4, "AUDIO")] {
        if !fields[idx].eq_ignore_ascii_case(label) {
            return Err(Error::Protocol(format!(
                "expected {label} in crosspoint line {line:?}"
            )));
        }
    }

    let number = |idx: usize| -> Result<u8> {
        fields[idx].parse().map_err(|_| {
            Error::Protocol(format!(
                "non-numeric field {:?} in crosspoint line {line:?}",
                fields[idx]
            ))
        })
    };
    let out_of_range =
        |e: Error| Error::Protocol(format!("crosspoint line {line:?} out of range: {e}"));

    Ok(CrosspointEntry {
        zone: ZoneId::new(number(1)?).map_err(out_of_range)?,
        video: InputId::new(number(3)?).map_err(out_of_range)?,
        audio: InputId::new(number(5)?).map_err(out_of_range)?,
    })
}

/// Parse every `OUTPUT` line of a crosspoint dump. Other lines (banners,
/// headers) are ignored; a malformed `OUTPUT` line is an error.
pub fn parse_crosspoint_map(lines: &[String]) -> Result<Vec<CrosspointEntry>> {
    lines
        .iter()
        .filter(|line| is_crosspoint_line(line))
        .map(|line| parse_crosspoint(line))
        .collect()
}

/// Find the crosspoint entry for `zone` in a `Dzz` reply.
pub fn parse_zone_crosspoint(response: &Response, zone: ZoneId) -> Result<CrosspointEntry> {
    parse_crosspoint_map(&response.lines)?
        .into_iter()
        .find(|entry| entry.zone == zone)
        .ok_or_else(|| Error::Protocol(format!("no crosspoint for zone {zone} in reply")))
}

fn is_crosspoint_line(line: &str) -> bool {
    line.get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("OUTPUT"))
}

/// Extract the sign-on message from an `I` reply.
pub fn parse_identify(response: &Response) -> Result<String> {
    match response.first_line() {
        Some(line) => Ok(line.to_string()),
        None => Err(Error::Protocol("empty identify reply".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    fn zone(n: u8) -> ZoneId {
        ZoneId::new(n).unwrap()
    }

    fn input(n: u8) -> InputId {
        InputId::new(n).unwrap()
    }

    fn response(lines: &[&str], status: Status) -> Response {
        Response {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            status,
        }
    }

    // ---------------------------------------------------------------
    // Builders
    // ---------------------------------------------------------------

    #[test]
    fn set_volume_encoding() {
        let cmd = cmd_set_volume(zone(1), Volume::new(4).unwrap());
        assert_eq!(cmd.encode(), b"$V0104\r");
        assert_eq!(cmd.shape(), ResponseShape::Status);
    }

    #[test]
    fn set_input_encoding() {
        assert_eq!(cmd_set_input(zone(1), input(2)).encode(), b"B0102\r");
        assert_eq!(cmd_set_input(zone(64), input(64)).as_str(), "B6464");
    }

    #[test]
    fn split_routing() {
        assert_eq!(cmd_set_video_input(zone(3), input(12)).as_str(), "V0312");
        assert_eq!(cmd_set_audio_input(zone(3), input(12)).as_str(), "A0312");
    }

    #[test]
    fn crosspoint_queries() {
        assert_eq!(cmd_get_crosspoint(zone(7)).as_str(), "D07");
        assert_eq!(cmd_get_crosspoint_map().as_str(), "M");
    }

    #[test]
    fn volume_steps() {
        assert_eq!(cmd_volume_up(zone(2), 1).unwrap().as_str(), "$V02+");
        assert_eq!(cmd_volume_down(zone(2), 1).unwrap().as_str(), "$V02-");
        assert_eq!(cmd_volume_up(zone(2), 5).unwrap().as_str(), "$V025+");
        assert_eq!(cmd_volume_down(zone(10), 12).unwrap().as_str(), "$V1012-");
    }

    #[test]
    fn volume_step_bounds() {
        assert!(matches!(
            cmd_volume_up(zone(1), 0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            cmd_volume_down(zone(1), 64),
            Err(Error::InvalidParameter(_))
        ));
        assert!(cmd_volume_down(zone(1), 63).is_ok());
    }

    #[test]
    fn mute_encoding() {
        assert_eq!(cmd_set_mute(zone(5), true).as_str(), "$M051");
        assert_eq!(cmd_set_mute(zone(5), false).as_str(), "$M050");
    }

    #[test]
    fn vtb_query_is_single_line() {
        let cmd = cmd_get_vtb(zone(9));
        assert_eq!(cmd.as_str(), "$D09");
        assert_eq!(cmd.shape(), ResponseShape::SingleLine);
    }

    #[test]
    fn tone_encoding() {
        assert_eq!(
            cmd_set_bass(zone(1), ToneLevel::new(3).unwrap()).as_str(),
            "$B01+3"
        );
        assert_eq!(
            cmd_set_treble(zone(1), ToneLevel::new(-7).unwrap()).as_str(),
            "$T01-7"
        );
        assert_eq!(
            cmd_set_bass(zone(1), ToneLevel::new(0).unwrap()).as_str(),
            "$B01+0"
        );
    }

    #[test]
    fn balance_encoding() {
        assert_eq!(cmd_shift_balance(zone(4), BalanceShift::Left).as_str(), "$S04-");
        assert_eq!(cmd_shift_balance(zone(4), BalanceShift::Right).as_str(), "$S04+");
        assert_eq!(cmd_shift_balance(zone(4), BalanceShift::Center).as_str(), "$S040");
    }

    #[test]
    fn patterns_and_interrogation() {
        let p = PatternId::new(3).unwrap();
        assert_eq!(cmd_store_pattern(p).as_str(), "S03");
        assert_eq!(cmd_recall_pattern(p).as_str(), "R03");
        assert_eq!(cmd_identify().encode(), b"I\r");
        assert_eq!(cmd_list_cards().as_str(), "W");
        assert_eq!(cmd_raw("H").encode(), b"H\r");
    }

    // ---------------------------------------------------------------
    // Parsers
    // ---------------------------------------------------------------

    #[test]
    fn check_status_maps_error() {
        let cmd = cmd_set_input(zone(1), input(2));
        assert!(check_status(&cmd, &response(&[], Status::Done)).is_ok());
        assert!(check_status(&cmd, &response(&[], Status::Implicit)).is_ok());
        match check_status(&cmd, &response(&[], Status::Error)) {
            Err(Error::Rejected(msg)) => assert!(msg.contains("B0102"), "{msg}"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn vtb_full_line() {
        let vtb = parse_vtb("V:32  M:0  L:0  BL:00 BR:00 B: 0 T: 0").unwrap();
        assert_eq!(vtb.volume_raw, 32);
        assert!(!vtb.muted);
        assert_eq!(vtb.loudness, Some(false));
        assert_eq!(vtb.balance_left, Some(0));
        assert_eq!(vtb.balance_right, Some(0));
        assert_eq!(vtb.bass, Some(0));
        assert_eq!(vtb.treble, Some(0));
        assert_eq!(vtb.volume(), Some(Volume::new(32).unwrap()));
    }

    #[test]
    fn vtb_signed_values() {
        let vtb = parse_vtb("V:+4  M:1  L:1  BL:02 BR:00 B:-3 T:+5").unwrap();
        assert_eq!(vtb.volume_raw, 4);
        assert!(vtb.muted);
        assert_eq!(vtb.loudness, Some(true));
        assert_eq!(vtb.balance_left, Some(2));
        assert_eq!(vtb.bass, Some(-3));
        assert_eq!(vtb.treble, Some(5));
    }

    #[test]
    fn vtb_out_of_range_volume_is_kept_raw() {
        let vtb = parse_vtb("V:-1  M:0").unwrap();
        assert_eq!(vtb.volume_raw, -1);
        assert_eq!(vtb.volume(), None);
        assert_eq!(vtb.bass, None);
    }

    #[test]
    fn vtb_malformed() {
        for line in [
            "",
            "M:0",
            "V:32",
            "V:xx  M:0",
            "V:32  M:2",
            "V:32  M:0  L:5",
            "V:32  M:0  garbage",
            "V:32  M:0  Q:1",
            "V:32  M:",
        ] {
            assert!(
                matches!(parse_vtb(line), Err(Error::Protocol(_))),
                "expected Protocol error for {line:?}"
            );
        }
    }

    #[test]
    fn crosspoint_line() {
        let entry = parse_crosspoint("OUTPUT   01   VIDEO   02   AUDIO   03").unwrap();
        assert_eq!(entry.zone, zone(1));
        assert_eq!(entry.video, input(2));
        assert_eq!(entry.audio, input(3));
    }

    #[test]
    fn crosspoint_malformed() {
        for line in [
            "OUTPUT 01 VIDEO 02",
            "OUTPUT 01 VIDEO 02 AUDIO 03 EXTRA",
            "OUTPUT xx VIDEO 02 AUDIO 02",
            "OUTPUT 01 AUDIO 02 VIDEO 02",
            "OUTPUT 65 VIDEO 02 AUDIO 02",
            "OUTPUT 01 VIDEO 00 AUDIO 02",
        ] {
            assert!(
                matches!(parse_crosspoint(line), Err(Error::Protocol(_))),
                "expected Protocol error for {line:?}"
            );
        }
    }

    #[test]
    fn crosspoint_map_skips_banners() {
        let lines: Vec<String> = [
            "CROSSPOINT MAP",
            "OUTPUT 01 VIDEO 01 AUDIO 01",
            "OUTPUT 02 VIDEO 05 AUDIO 06",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let map = parse_crosspoint_map(&lines).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[1].zone, zone(2));
        assert_eq!(map[1].audio, input(6));
    }

    #[test]
    fn crosspoint_map_rejects_bad_output_line() {
        let lines = vec!["OUTPUT 01 VIDEO".to_string()];
        assert!(matches!(
            parse_crosspoint_map(&lines),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn zone_crosspoint_lookup() {
        let resp = response(&["OUTPUT 04 VIDEO 09 AUDIO 09"], Status::Done);
        assert_eq!(parse_zone_crosspoint(&resp, zone(4)).unwrap().video, input(9));
        assert!(matches!(
            parse_zone_crosspoint(&resp, zone(5)),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn identify_reply() {
        let resp = response(&["Knox Chameleon64i v1.0 (FAKE)"], Status::Done);
        assert_eq!(parse_identify(&resp).unwrap(), "Knox Chameleon64i v1.0 (FAKE)");
        assert!(matches!(
            parse_identify(&response(&[], Status::Done)),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn parse_error_is_not_a_timeout() {
        let err = parse_vtb("V:32").unwrap_err();
        assert!(!err.is_timeout());
        assert!(!err.is_connection_error());
    }
}
