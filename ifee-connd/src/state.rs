//! Process wide state shared by the surveillance processor, the watchdog and
//! the control surface. Always accessed through [`SharedState`] so every read
//! sees a whole record.
use crate::utils::State;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub type SharedState = State<Shared>;

#[derive(Debug, Clone, PartialEq)]
pub struct Shared {
    /// Single writer: the control surface.
    pub control: ControlFlags,
    /// Single writer: the surveillance processor.
    pub flight: FlightState,
    pub icao: Option<Icao>,
    /// Hysteresis flag. `true` while the aircraft is slow enough for the
    /// cellular link to be allowed.
    pub active: bool,
}

impl Shared {
    pub fn new(icao: Option<Icao>) -> Self {
        Self {
            control: ControlFlags::default(),
            flight: FlightState::default(),
            icao,
            active: true,
        }
    }
}

/// 24 bit aircraft address, kept as six uppercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Icao(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid icao address {0:?}, expected 6 hex digits")]
pub struct IcaoParseError(pub String);

impl FromStr for Icao {
    type Err = IcaoParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 6 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_uppercase()))
        } else {
            Err(IcaoParseError(s.to_string()))
        }
    }
}

impl TryFrom<String> for Icao {
    type Error = IcaoParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Icao> for String {
    fn from(icao: Icao) -> Self {
        icao.0
    }
}

impl fmt::Display for Icao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Icao {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Operator overrides. `None` is "no opinion".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    pub wifi: Option<bool>,
    pub modem: Option<bool>,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self {
            wifi: Some(true),
            modem: Some(true),
        }
    }
}

impl ControlFlags {
    /// Overwrites only the flags `update` has an opinion on.
    pub fn merge(&mut self, update: ControlFlags) {
        if update.wifi.is_some() {
            self.wifi = update.wifi;
        }
        if update.modem.is_some() {
            self.modem = update.modem;
        }
    }

    pub fn modem_allowed(&self) -> bool {
        self.modem == Some(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlightState {
    pub velocity_kt: i32,
    pub altitude_ft: i32,
    pub position: Option<Position>,
}
