use crate::bus::RawModemProperties;
use derive_more::Display;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// `MMModemPowerState`
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ModemPowerState {
    Unknown = 0,
    Off = 1,
    Low = 2,
    On = 3,
}

/// `MMModemState`
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum ModemOperState {
    Failed = -1,
    Unknown = 0,
    Initializing = 1,
    Locked = 2,
    Disabled = 3,
    Disabling = 4,
    Enabling = 5,
    Enabled = 6,
    Searching = 7,
    Registered = 8,
    Disconnecting = 9,
    Connecting = 10,
    Connected = 11,
}

impl ModemOperState {
    /// States in which an enable request has nothing left to do.
    pub fn is_enabled_or_enabling(self) -> bool {
        matches!(
            self,
            Self::Enabling
                | Self::Enabled
                | Self::Connecting
                | Self::Connected
                | Self::Registered
        )
    }

    pub fn is_disabled_or_disabling(self) -> bool {
        matches!(self, Self::Disabling | Self::Disabled)
    }
}

/// `MMModemStateFailedReason`
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ModemFailReason {
    None = 0,
    Unknown = 1,
    SimMissing = 2,
    SimError = 3,
}

impl ModemPowerState {
    pub fn as_raw(self) -> u32 {
        self.to_u32().unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{property} has out of range value {value}")]
pub struct DecodeEnumError {
    pub property: &'static str,
    pub value: i64,
}

fn decode<T: FromPrimitive>(property: &'static str, value: i64) -> Result<T, DecodeEnumError> {
    T::from_i64(value).ok_or(DecodeEnumError { property, value })
}

/// `MMModemAccessTechnology` names, indexed by bit position.
const ACCESS_TECH_BITS: [&str; 16] = [
    "POTS",
    "GSM",
    "GSM_COMPACT",
    "GPRS",
    "EDGE",
    "UMTS",
    "HSDPA",
    "HSUPA",
    "HSPA",
    "HSPA_PLUS",
    "1XRTT",
    "EVDO0",
    "EVDOA",
    "EVDOB",
    "LTE",
    "5GNR",
];

pub const ACCESS_TECH_UNKNOWN: u32 = 0;
pub const ACCESS_TECH_ANY: u32 = u32::MAX;

/// Decodes an access technology bitmask into technology names.
///
/// `0` and the all-ones sentinel decode to `["Unknown"]` and `["Any"]`.
/// Otherwise only the highest set bit among 31 down to 1 is reported, so a
/// composite mask yields a single name. A highest bit with no known
/// technology yields nothing.
pub fn access_technologies(mask: u32) -> Vec<&'static str> {
    match mask {
        ACCESS_TECH_UNKNOWN => return vec!["Unknown"],
        ACCESS_TECH_ANY => return vec!["Any"],
        _ => {}
    }

    (1..32usize)
        .rev()
        .find(|bit| mask & (1u32 << bit) != 0)
        .and_then(|bit| ACCESS_TECH_BITS.get(bit))
        .map(|name| vec![*name])
        .unwrap_or_default()
}

/// Point in time view of a modem. Never kept beyond one decision cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ModemSnapshot {
    pub sim: String,
    pub manufacturer: String,
    pub model: String,
    pub revision: String,
    pub device: String,
    pub primary_port: String,
    pub ports: Vec<String>,
    pub imei: String,
    pub power_state: ModemPowerState,
    pub state: ModemOperState,
    pub fail_reason: ModemFailReason,
    /// 0 - 100
    pub signal_quality: u8,
    pub access_technologies: Vec<&'static str>,
}

impl TryFrom<RawModemProperties> for ModemSnapshot {
    type Error = DecodeEnumError;

    fn try_from(raw: RawModemProperties) -> Result<Self, Self::Error> {
        let signal_quality = u8::try_from(raw.signal_quality)
            .ok()
            .filter(|q| *q <= 100)
            .ok_or(DecodeEnumError {
                property: "SignalQuality",
                value: raw.signal_quality.into(),
            })?;

        Ok(Self {
            sim: raw.sim,
            manufacturer: raw.manufacturer,
            model: raw.model,
            revision: raw.revision,
            device: raw.device,
            primary_port: raw.primary_port,
            ports: raw.ports.into_iter().map(|(port, _kind)| port).collect(),
            imei: raw.equipment_identifier,
            power_state: decode("PowerState", raw.power_state.into())?,
            state: decode("State", raw.state.into())?,
            fail_reason: decode("StateFailedReason", raw.state_failed_reason.into())?,
            signal_quality,
            access_technologies: access_technologies(raw.access_technologies),
        })
    }
}
