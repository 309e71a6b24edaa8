use crate::domain::error::{EncodeError, VisionAirError};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Valid preheat target range in °C, as accepted by the device protocol.
pub const PREHEAT_TEMP_MIN: i32 = 12;
pub const PREHEAT_TEMP_MAX: i32 = 18;

/// Holiday mode duration range in days (0 disables holiday mode).
pub const HOLIDAY_DAYS_MIN: i32 = 0;
pub const HOLIDAY_DAYS_MAX: i32 = 30;

/// Bluetooth address of a VisionAir unit, stored the way WinRT wants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    pub fn new(raw: u64) -> Self {
        Self(raw & 0xFFFF_FFFF_FFFF)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for DeviceAddress {
    type Err = String;

    /// Accepts `AA:BB:CC:DD:EE:FF` (or `-` separated) and `0xAABBCCDDEEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let raw = u64::from_str_radix(hex, 16)
                .map_err(|e| format!("invalid address '{}': {}", s, e))?;
            if raw > 0xFFFF_FFFF_FFFF {
                return Err(format!("invalid address '{}': more than 48 bits", s));
            }
            return Ok(Self(raw));
        }

        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(format!("invalid address '{}': expected 6 octets", s));
        }

        let mut raw = 0u64;
        for part in parts {
            if part.len() != 2 {
                return Err(format!("invalid address '{}': bad octet '{}'", s, part));
            }
            let octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid address '{}': bad octet '{}'", s, part))?;
            raw = (raw << 8) | u64::from(octet);
        }
        Ok(Self(raw))
    }
}

/// Ventilation speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AirflowMode {
    Low,
    Medium,
    High,
}

impl AirflowMode {
    pub const ALL: [AirflowMode; 3] = [AirflowMode::Low, AirflowMode::Medium, AirflowMode::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for AirflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AirflowMode {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(EncodeError::UnknownAirflowMode(s.to_string())),
        }
    }
}

/// One complete status snapshot as reported by the device.
///
/// Snapshots are never mutated after construction; the coordinator replaces
/// them wholesale and hands them out as `Arc<DeviceStatus>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Remote unit temperature (°C)
    pub temp_remote: Option<f32>,
    /// Probe 1 temperature (°C), absent when the probe is not installed
    pub temp_probe1: Option<f32>,
    /// Probe 2 temperature (°C), absent when the probe is not installed
    pub temp_probe2: Option<f32>,
    /// Remote unit relative humidity (%)
    pub humidity_remote: u8,

    pub airflow_mode: AirflowMode,
    /// Current airflow (m³/h)
    pub airflow_rate: u16,
    pub boost_active: bool,

    pub preheat_enabled: bool,
    /// Preheat target (°C)
    pub preheat_temp: u8,

    /// Remaining holiday days, 0 when holiday mode is off
    pub holiday_days: u8,
    pub summer_limit_enabled: bool,

    /// Days until the filter should be replaced
    pub filter_days: u16,
}

impl DeviceStatus {
    pub fn holiday_enabled(&self) -> bool {
        self.holiday_days > 0
    }
}

/// The subset of status fields carried by a single device reply.
///
/// Probe and remote temperatures are doubly optional: the outer `Option`
/// records whether a reply carrying the field arrived, the inner one whether
/// the probe is installed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialStatus {
    pub temp_remote: Option<Option<f32>>,
    pub temp_probe1: Option<Option<f32>>,
    pub temp_probe2: Option<Option<f32>>,
    pub humidity_remote: Option<u8>,
    pub airflow_mode: Option<AirflowMode>,
    pub airflow_rate: Option<u16>,
    pub boost_active: Option<bool>,
    pub preheat_enabled: Option<bool>,
    pub preheat_temp: Option<u8>,
    pub holiday_days: Option<u8>,
    pub summer_limit_enabled: Option<bool>,
    pub filter_days: Option<u16>,
}

impl PartialStatus {
    /// Fold the fields of `other` into `self`. Fields present in `other` win.
    pub fn merge(&mut self, other: PartialStatus) {
        self.temp_remote = other.temp_remote.or(self.temp_remote);
        self.temp_probe1 = other.temp_probe1.or(self.temp_probe1);
        self.temp_probe2 = other.temp_probe2.or(self.temp_probe2);
        self.humidity_remote = other.humidity_remote.or(self.humidity_remote);
        self.airflow_mode = other.airflow_mode.or(self.airflow_mode);
        self.airflow_rate = other.airflow_rate.or(self.airflow_rate);
        self.boost_active = other.boost_active.or(self.boost_active);
        self.preheat_enabled = other.preheat_enabled.or(self.preheat_enabled);
        self.preheat_temp = other.preheat_temp.or(self.preheat_temp);
        self.holiday_days = other.holiday_days.or(self.holiday_days);
        self.summer_limit_enabled = other.summer_limit_enabled.or(self.summer_limit_enabled);
        self.filter_days = other.filter_days.or(self.filter_days);
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let checks: [(&'static str, bool); 12] = [
            ("temp_remote", self.temp_remote.is_some()),
            ("temp_probe1", self.temp_probe1.is_some()),
            ("temp_probe2", self.temp_probe2.is_some()),
            ("humidity_remote", self.humidity_remote.is_some()),
            ("airflow_mode", self.airflow_mode.is_some()),
            ("airflow_rate", self.airflow_rate.is_some()),
            ("boost_active", self.boost_active.is_some()),
            ("preheat_enabled", self.preheat_enabled.is_some()),
            ("preheat_temp", self.preheat_temp.is_some()),
            ("holiday_days", self.holiday_days.is_some()),
            ("summer_limit_enabled", self.summer_limit_enabled.is_some()),
            ("filter_days", self.filter_days.is_some()),
        ];
        checks
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Build a snapshot, or fail naming every field still missing.
    pub fn into_status(self) -> Result<DeviceStatus, VisionAirError> {
        match self {
            PartialStatus {
                temp_remote: Some(temp_remote),
                temp_probe1: Some(temp_probe1),
                temp_probe2: Some(temp_probe2),
                humidity_remote: Some(humidity_remote),
                airflow_mode: Some(airflow_mode),
                airflow_rate: Some(airflow_rate),
                boost_active: Some(boost_active),
                preheat_enabled: Some(preheat_enabled),
                preheat_temp: Some(preheat_temp),
                holiday_days: Some(holiday_days),
                summer_limit_enabled: Some(summer_limit_enabled),
                filter_days: Some(filter_days),
            } => Ok(DeviceStatus {
                temp_remote,
                temp_probe1,
                temp_probe2,
                humidity_remote,
                airflow_mode,
                airflow_rate,
                boost_active,
                preheat_enabled,
                preheat_temp,
                holiday_days,
                summer_limit_enabled,
                filter_days,
            }),
            partial => Err(VisionAirError::IncompleteStatus {
                missing: partial.missing_fields(),
            }),
        }
    }
}

/// A configuration change sent to the device.
///
/// Numeric parameters are kept wide so out-of-range requests can be
/// represented and rejected by [`Command::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AirflowMode(AirflowMode),
    Boost(bool),
    Preheat(bool),
    PreheatTemp(i32),
    Holiday(i32),
    SummerLimit(bool),
}

impl Command {
    pub fn validate(&self) -> Result<(), EncodeError> {
        match *self {
            Self::PreheatTemp(t) if !(PREHEAT_TEMP_MIN..=PREHEAT_TEMP_MAX).contains(&t) => {
                Err(EncodeError::PreheatTemperatureOutOfRange(t))
            }
            Self::Holiday(d) if !(HOLIDAY_DAYS_MIN..=HOLIDAY_DAYS_MAX).contains(&d) => {
                Err(EncodeError::HolidayDaysOutOfRange(d))
            }
            _ => Ok(()),
        }
    }

    /// Whether `status` shows the effect of this command.
    pub fn is_reflected_in(&self, status: &DeviceStatus) -> bool {
        match *self {
            Self::AirflowMode(mode) => status.airflow_mode == mode,
            Self::Boost(on) => status.boost_active == on,
            Self::Preheat(on) => status.preheat_enabled == on,
            Self::PreheatTemp(t) => i32::from(status.preheat_temp) == t,
            Self::Holiday(d) => i32::from(status.holiday_days) == d,
            Self::SummerLimit(on) => status.summer_limit_enabled == on,
        }
    }

    /// Short action label used in logs and error messages.
    pub fn action(&self) -> &'static str {
        match self {
            Self::AirflowMode(_) => "setting airflow mode",
            Self::Boost(_) => "setting boost",
            Self::Preheat(_) => "setting preheat",
            Self::PreheatTemp(_) => "setting preheat temperature",
            Self::Holiday(_) => "setting holiday mode",
            Self::SummerLimit(_) => "setting summer limit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn on_off(v: bool) -> &'static str {
            if v {
                "on"
            } else {
                "off"
            }
        }
        match *self {
            Self::AirflowMode(mode) => write!(f, "airflow={}", mode),
            Self::Boost(on) => write!(f, "boost={}", on_off(on)),
            Self::Preheat(on) => write!(f, "preheat={}", on_off(on)),
            Self::PreheatTemp(t) => write!(f, "preheat_temp={}°C", t),
            Self::Holiday(d) => write!(f, "holiday={}d", d),
            Self::SummerLimit(on) => write!(f, "summer_limit={}", on_off(on)),
        }
    }
}

/// Phase of the polling coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Polling,
    Commanding,
}

/// Notifications published by the coordinator to whoever hosts it.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    StatusUpdated(Arc<DeviceStatus>),
    FetchFailed(VisionAirError),
    StateChanged(CoordinatorState),
}

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDevice {
    pub name: String,
    pub address: DeviceAddress,
    pub signal_strength: i16,
}
