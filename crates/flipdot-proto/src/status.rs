//! Textual side of the link: JSON status snapshots from the device and the
//! text commands the panel sends back.
//!
//! Snapshot shape (device -> panel):
//! ```text
//! { "backlight": 0|1, "invert": 0|1, "active": 0|1, "quick": 0|1,
//!   "mode": 0|1|2, "error"?: string }
//! ```
//! Commands (panel -> device): `getState`, `setMode:<mode>:<credential>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::frame::Opcode;
use crate::{ProtoError, ProtoResult};

/// Device operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Pictures are set one at a time from the panel.
    Individual,
    /// The device cycles through stored patterns on its own.
    PatternCycle,
    /// Unsupervised random animation.
    Chaos,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Individual, Mode::PatternCycle, Mode::Chaos];

    pub const fn as_u8(self) -> u8 {
        match self {
            Mode::Individual => 0,
            Mode::PatternCycle => 1,
            Mode::Chaos => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Mode::Individual => "individual",
            Mode::PatternCycle => "cycle",
            Mode::Chaos => "chaos",
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Individual),
            1 => Ok(Mode::PatternCycle),
            2 => Ok(Mode::Chaos),
            other => Err(ProtoError::UnknownMode(other.to_string())),
        }
    }
}

impl FromStr for Mode {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "individual" | "manual" => Ok(Mode::Individual),
            "1" | "cycle" | "pattern-cycle" | "patterncycle" => Ok(Mode::PatternCycle),
            "2" | "chaos" => Ok(Mode::Chaos),
            other => Err(ProtoError::Command(format!("unknown mode {other}"))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the four boolean device settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Backlight,
    Invert,
    Active,
    Quick,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Backlight, Flag::Invert, Flag::Active, Flag::Quick];

    /// Opcode of the binary switch command for this flag.
    pub const fn opcode(self) -> Opcode {
        match self {
            Flag::Backlight => Opcode::Backlight,
            Flag::Invert => Opcode::Invert,
            Flag::Active => Opcode::Active,
            Flag::Quick => Opcode::FastMode,
        }
    }

    /// Key used for this flag in status snapshots.
    pub const fn key(self) -> &'static str {
        match self {
            Flag::Backlight => "backlight",
            Flag::Invert => "invert",
            Flag::Active => "active",
            Flag::Quick => "quick",
        }
    }
}

impl FromStr for Flag {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backlight" => Ok(Flag::Backlight),
            "invert" => Ok(Flag::Invert),
            "active" => Ok(Flag::Active),
            "quick" | "fast" | "fastmode" => Ok(Flag::Quick),
            other => Err(ProtoError::UnknownFlag(other.to_string())),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFlags {
    pub backlight: bool,
    pub invert: bool,
    pub quick: bool,
    pub active: bool,
}

impl DeviceFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Backlight => self.backlight,
            Flag::Invert => self.invert,
            Flag::Active => self.active,
            Flag::Quick => self.quick,
        }
    }

    pub fn set(&mut self, flag: Flag, on: bool) {
        match flag {
            Flag::Backlight => self.backlight = on,
            Flag::Invert => self.invert = on,
            Flag::Active => self.active = on,
            Flag::Quick => self.quick = on,
        }
    }
}

/// Device state reported over the text channel. Every field is optional;
/// a missing field means "not reported" and unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default, deserialize_with = "flag_bit")]
    pub backlight: Option<bool>,
    #[serde(default, deserialize_with = "flag_bit")]
    pub invert: Option<bool>,
    #[serde(default, deserialize_with = "flag_bit")]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "flag_bit")]
    pub quick: Option<bool>,
    #[serde(default, deserialize_with = "loose_value")]
    mode: Option<Value>,
    #[serde(default, deserialize_with = "loose_value")]
    error: Option<Value>,
}

impl StatusSnapshot {
    pub fn parse(text: &str) -> ProtoResult<Self> {
        serde_json::from_str(text).map_err(|err| ProtoError::Snapshot(err.to_string()))
    }

    pub fn flag(&self, flag: Flag) -> Option<bool> {
        match flag {
            Flag::Backlight => self.backlight,
            Flag::Invert => self.invert,
            Flag::Active => self.active,
            Flag::Quick => self.quick,
        }
    }

    /// Reported mode, `Ok(None)` when the snapshot does not carry one.
    /// Anything but the integers 0 to 2 is an unknown mode.
    pub fn mode(&self) -> ProtoResult<Option<Mode>> {
        let Some(value) = &self.mode else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|raw| u8::try_from(raw).ok())
            .ok_or_else(|| ProtoError::UnknownMode(value.to_string()))
            .and_then(Mode::try_from)
            .map(Some)
    }

    /// Rejection reason for the last mode request. Blank strings count as
    /// no error.
    pub fn error(&self) -> Option<&str> {
        match &self.error {
            Some(Value::String(err)) if !err.trim().is_empty() => Some(err.as_str()),
            _ => None,
        }
    }

    /// Copies every reported flag into `flags`, leaving the rest untouched.
    pub fn apply_to(&self, flags: &mut DeviceFlags) {
        for flag in Flag::ALL {
            if let Some(on) = self.flag(flag) {
                flags.set(flag, on);
            }
        }
    }
}

/// Keeps whatever JSON the device sent so one odd field never costs the
/// whole snapshot. `null` reads as absent.
fn loose_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.filter(|value| !value.is_null()))
}

/// Flags travel as `0`/`1`; only `1` (or JSON `true`) means on.
fn flag_bit<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Bool(on)) => Some(on),
        Some(Value::Number(n)) => Some(n.as_u64() == Some(1)),
        Some(_) => Some(false),
    })
}

pub const GET_STATE: &str = "getState";
const SET_MODE_PREFIX: &str = "setMode";

/// Text command sent from the panel to the device.
#[derive(Clone, PartialEq, Eq)]
pub enum ControlCommand {
    GetState,
    SetMode { mode: Mode, credential: String },
}

impl ControlCommand {
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::GetState => f.write_str(GET_STATE),
            ControlCommand::SetMode { mode, credential } => {
                write!(f, "{SET_MODE_PREFIX}:{}:{credential}", mode.as_u8())
            }
        }
    }
}

impl fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::GetState => f.write_str("GetState"),
            ControlCommand::SetMode { mode, .. } => f
                .debug_struct("SetMode")
                .field("mode", mode)
                .field("credential", &"<redacted>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_snapshot() {
        let snapshot = StatusSnapshot::parse(
            r#"{"backlight":1,"invert":0,"active":1,"quick":0,"mode":2}"#,
        )
        .unwrap();
        assert_eq!(snapshot.backlight, Some(true));
        assert_eq!(snapshot.invert, Some(false));
        assert_eq!(snapshot.active, Some(true));
        assert_eq!(snapshot.quick, Some(false));
        assert_eq!(snapshot.mode(), Ok(Some(Mode::Chaos)));
        assert_eq!(snapshot.error(), None);
    }

    #[test]
    fn unknown_fields_are_ignored_and_missing_fields_unreported() {
        let snapshot =
            StatusSnapshot::parse(r#"{"invert":1,"firmware":"1.4.2","uptime":99}"#).unwrap();
        assert_eq!(snapshot.invert, Some(true));
        assert_eq!(snapshot.backlight, None);
        assert_eq!(snapshot.mode(), Ok(None));

        let mut flags = DeviceFlags {
            backlight: true,
            ..DeviceFlags::default()
        };
        snapshot.apply_to(&mut flags);
        assert!(flags.backlight);
        assert!(flags.invert);
    }

    #[test]
    fn only_one_means_on() {
        let snapshot =
            StatusSnapshot::parse(r#"{"backlight":2,"invert":true,"active":"1","quick":null}"#)
                .unwrap();
        assert_eq!(snapshot.backlight, Some(false));
        assert_eq!(snapshot.invert, Some(true));
        assert_eq!(snapshot.active, Some(false));
        assert_eq!(snapshot.quick, None);
    }

    #[test]
    fn error_field_is_surfaced_unless_blank() {
        let snapshot = StatusSnapshot::parse(r#"{"mode":1,"error":"wrong password"}"#).unwrap();
        assert_eq!(snapshot.error(), Some("wrong password"));

        let blank = StatusSnapshot::parse(r#"{"mode":1,"error":""}"#).unwrap();
        assert_eq!(blank.error(), None);

        let odd = StatusSnapshot::parse(r#"{"mode":1,"error":0,"invert":1}"#).unwrap();
        assert_eq!(odd.error(), None);
        assert_eq!(odd.invert, Some(true));
    }

    #[test]
    fn out_of_range_mode_is_reported() {
        let snapshot = StatusSnapshot::parse(r#"{"mode":7}"#).unwrap();
        assert_eq!(snapshot.mode(), Err(ProtoError::UnknownMode("7".into())));

        for (raw, shown) in [("-1", "-1"), ("300", "300"), (r#""1""#, r#""1""#), ("1.5", "1.5")] {
            let snapshot =
                StatusSnapshot::parse(&format!(r#"{{"mode":{raw},"backlight":1,"quick":0}}"#))
                    .unwrap();
            assert_eq!(snapshot.mode(), Err(ProtoError::UnknownMode(shown.into())));
            assert_eq!(snapshot.backlight, Some(true));
            assert_eq!(snapshot.quick, Some(false));
        }

        let null = StatusSnapshot::parse(r#"{"mode":null}"#).unwrap();
        assert_eq!(null.mode(), Ok(None));
    }

    #[test]
    fn non_json_text_is_rejected() {
        assert!(matches!(
            StatusSnapshot::parse("hello"),
            Err(ProtoError::Snapshot(_))
        ));
        assert!(StatusSnapshot::parse("").is_err());
    }

    #[test]
    fn control_commands_render_as_text() {
        assert_eq!(ControlCommand::GetState.to_text(), "getState");
        let set = ControlCommand::SetMode {
            mode: Mode::Individual,
            credential: "hunter2".into(),
        };
        assert_eq!(set.to_text(), "setMode:0:hunter2");
        let colons = ControlCommand::SetMode {
            mode: Mode::Chaos,
            credential: "a:b".into(),
        };
        assert_eq!(colons.to_text(), "setMode:2:a:b");
    }

    #[test]
    fn debug_output_hides_the_credential() {
        let set = ControlCommand::SetMode {
            mode: Mode::PatternCycle,
            credential: "hunter2".into(),
        };
        let rendered = format!("{set:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("PatternCycle"));
    }

    #[test]
    fn names_parse() {
        assert_eq!("cycle".parse::<Mode>().unwrap(), Mode::PatternCycle);
        assert_eq!("Individual".parse::<Mode>().unwrap(), Mode::Individual);
        assert_eq!("2".parse::<Mode>().unwrap(), Mode::Chaos);
        assert!("sleep".parse::<Mode>().is_err());
        assert_eq!("fastmode".parse::<Flag>().unwrap(), Flag::Quick);
        assert_eq!(Flag::Quick.opcode(), Opcode::FastMode);
        for mode in Mode::ALL {
            assert_eq!(Mode::try_from(mode.as_u8()).unwrap(), mode);
        }
    }
}
