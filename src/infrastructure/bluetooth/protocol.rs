//! VisionAir Protocol
//!
//! Frame definitions and the pure codec for talking to a VisionAir unit.
//!
//! # Frame Structure
//!
//! Every frame, in both directions, is
//!
//! ```text
//! [0-1]   : Marker 0xA5 0xB6
//! [2]     : Opcode (requests) or reply tag (replies)
//! [3..n-1]: Payload
//! [n-1]   : Checksum, XOR of all preceding bytes
//! ```
//!
//! Requests written by the host:
//!
//! ```text
//! Status request : A5 B6 10 <kind> <chk>          kind = reply tag wanted
//! Command        : A5 B6 1A <setting> <value> <chk>
//! ```
//!
//! Replies notified by the device:
//!
//! ```text
//! 0x01 Device state (8 bytes payload)
//!      [0]   airflow mode (1 low, 2 medium, 3 high)
//!      [1]   flags: bit 0 boost, bit 1 preheat, bit 2 summer limit
//!      [2]   preheat target °C
//!      [3]   holiday days remaining
//!      [4-5] filter days remaining (u16 LE)
//!      [6-7] airflow m³/h (u16 LE)
//! 0x03 Probe sensors (4 bytes payload)
//!      [0-1] probe 1 temperature, i16 LE tenths of °C
//!      [2-3] probe 2 temperature, i16 LE tenths of °C
//! 0x04 Remote sensor (3 bytes payload)
//!      [0-1] remote temperature, i16 LE tenths of °C
//!      [2]   relative humidity %
//! ```
//!
//! A temperature of `0x7FFF` means the probe is not installed. The device
//! answers every command with a device state reply.

use crate::domain::error::{DecodeError, EncodeError};
use crate::domain::models::{
    AirflowMode, Command, PartialStatus, HOLIDAY_DAYS_MAX, PREHEAT_TEMP_MAX, PREHEAT_TEMP_MIN,
};
use tracing::trace;

/// Frame marker
pub const MAGIC: [u8; 2] = [0xA5, 0xB6];

pub(crate) const OP_STATUS_REQUEST: u8 = 0x10;
pub(crate) const OP_COMMAND: u8 = 0x1A;

pub(crate) const TAG_DEVICE_STATE: u8 = 0x01;
pub(crate) const TAG_PROBE_SENSORS: u8 = 0x03;
pub(crate) const TAG_REMOTE_SENSOR: u8 = 0x04;

const DEVICE_STATE_LEN: usize = 8;
const PROBE_SENSORS_LEN: usize = 4;
const REMOTE_SENSOR_LEN: usize = 3;

/// Marker + tag + checksum
const FRAME_OVERHEAD: usize = 4;

/// Raw temperature reported for an absent probe
pub const TEMP_NOT_INSTALLED: i16 = 0x7FFF;

pub(crate) const FLAG_BOOST: u8 = 0x01;
pub(crate) const FLAG_PREHEAT: u8 = 0x02;
pub(crate) const FLAG_SUMMER_LIMIT: u8 = 0x04;

/// Setting identifiers carried by command frames
pub(crate) mod setting {
    pub const AIRFLOW_MODE: u8 = 0x01;
    pub const BOOST: u8 = 0x02;
    pub const PREHEAT: u8 = 0x03;
    pub const PREHEAT_TEMP: u8 = 0x04;
    pub const HOLIDAY: u8 = 0x05;
    pub const SUMMER_LIMIT: u8 = 0x06;
}

/// The status queries needed to fill a complete snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusRequest {
    /// Configuration block, filter and airflow
    DeviceState,
    /// Probe 1 and probe 2 temperatures
    ProbeSensors,
    /// Remote unit temperature and humidity
    RemoteSensor,
}

impl StatusRequest {
    /// Default request order used for a full poll.
    pub const ALL: [StatusRequest; 3] = [
        StatusRequest::DeviceState,
        StatusRequest::ProbeSensors,
        StatusRequest::RemoteSensor,
    ];

    pub fn reply_tag(&self) -> u8 {
        match self {
            Self::DeviceState => TAG_DEVICE_STATE,
            Self::ProbeSensors => TAG_PROBE_SENSORS,
            Self::RemoteSensor => TAG_REMOTE_SENSOR,
        }
    }

    /// Whether `partial` already holds every field this request would fill.
    pub fn is_satisfied_by(&self, partial: &PartialStatus) -> bool {
        match self {
            Self::DeviceState => {
                partial.airflow_mode.is_some()
                    && partial.airflow_rate.is_some()
                    && partial.boost_active.is_some()
                    && partial.preheat_enabled.is_some()
                    && partial.preheat_temp.is_some()
                    && partial.holiday_days.is_some()
                    && partial.summer_limit_enabled.is_some()
                    && partial.filter_days.is_some()
            }
            Self::ProbeSensors => partial.temp_probe1.is_some() && partial.temp_probe2.is_some(),
            Self::RemoteSensor => {
                partial.temp_remote.is_some() && partial.humidity_remote.is_some()
            }
        }
    }
}

/// XOR of all bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

pub(crate) fn frame(op: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    bytes.extend_from_slice(&MAGIC);
    bytes.push(op);
    bytes.extend_from_slice(payload);
    bytes.push(checksum(&bytes));
    bytes
}

pub fn encode_status_request(kind: StatusRequest) -> Vec<u8> {
    frame(OP_STATUS_REQUEST, &[kind.reply_tag()])
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>, EncodeError> {
    command.validate()?;

    let (id, value) = match *command {
        Command::AirflowMode(mode) => (setting::AIRFLOW_MODE, airflow_mode_byte(mode)),
        Command::Boost(on) => (setting::BOOST, u8::from(on)),
        Command::Preheat(on) => (setting::PREHEAT, u8::from(on)),
        Command::PreheatTemp(t) => (
            setting::PREHEAT_TEMP,
            u8::try_from(t).map_err(|_| EncodeError::PreheatTemperatureOutOfRange(t))?,
        ),
        Command::Holiday(d) => (
            setting::HOLIDAY,
            u8::try_from(d).map_err(|_| EncodeError::HolidayDaysOutOfRange(d))?,
        ),
        Command::SummerLimit(on) => (setting::SUMMER_LIMIT, u8::from(on)),
    };

    Ok(frame(OP_COMMAND, &[id, value]))
}

pub(crate) fn airflow_mode_byte(mode: AirflowMode) -> u8 {
    match mode {
        AirflowMode::Low => 1,
        AirflowMode::Medium => 2,
        AirflowMode::High => 3,
    }
}

pub(crate) fn airflow_mode_from_byte(byte: u8) -> Result<AirflowMode, DecodeError> {
    match byte {
        1 => Ok(AirflowMode::Low),
        2 => Ok(AirflowMode::Medium),
        3 => Ok(AirflowMode::High),
        other => Err(DecodeError::InvalidValue {
            field: "airflow_mode",
            value: u16::from(other),
        }),
    }
}

fn temperature(lo: u8, hi: u8) -> Option<f32> {
    match i16::from_le_bytes([lo, hi]) {
        TEMP_NOT_INSTALLED => None,
        raw => Some(f32::from(raw) / 10.0),
    }
}

/// Validate framing and return `(tag, payload)`.
fn unframe(bytes: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(DecodeError::Truncated {
            expected: FRAME_OVERHEAD,
            actual: bytes.len(),
        });
    }
    if bytes[..2] != MAGIC {
        return Err(DecodeError::BadMagic([bytes[0], bytes[1]]));
    }

    let (body, chk) = bytes.split_at(bytes.len() - 1);
    let computed = checksum(body);
    if computed != chk[0] {
        return Err(DecodeError::ChecksumMismatch {
            computed,
            received: chk[0],
        });
    }

    Ok((body[2], &body[3..]))
}

/// Payloads are fixed size; short and long frames are both rejected.
fn expect_len(payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    let (expected, actual) = (expected + FRAME_OVERHEAD, payload.len() + FRAME_OVERHEAD);
    if actual < expected {
        return Err(DecodeError::Truncated { expected, actual });
    }
    if actual > expected {
        return Err(DecodeError::BadLength { expected, actual });
    }
    Ok(())
}

fn checked_range(
    field: &'static str,
    value: u8,
    range: std::ops::RangeInclusive<i32>,
) -> Result<u8, DecodeError> {
    if range.contains(&i32::from(value)) {
        Ok(value)
    } else {
        Err(DecodeError::InvalidValue {
            field,
            value: u16::from(value),
        })
    }
}

/// Decode one notification into the fields it carries.
pub fn decode_reply(bytes: &[u8]) -> Result<PartialStatus, DecodeError> {
    trace!("Raw reply: {:02X?}", bytes);

    let (tag, p) = unframe(bytes)?;

    match tag {
        TAG_DEVICE_STATE => {
            expect_len(p, DEVICE_STATE_LEN)?;
            let flags = p[1];
            Ok(PartialStatus {
                airflow_mode: Some(airflow_mode_from_byte(p[0])?),
                boost_active: Some(flags & FLAG_BOOST != 0),
                preheat_enabled: Some(flags & FLAG_PREHEAT != 0),
                summer_limit_enabled: Some(flags & FLAG_SUMMER_LIMIT != 0),
                preheat_temp: Some(checked_range(
                    "preheat_temp",
                    p[2],
                    PREHEAT_TEMP_MIN..=PREHEAT_TEMP_MAX,
                )?),
                holiday_days: Some(checked_range("holiday_days", p[3], 0..=HOLIDAY_DAYS_MAX)?),
                filter_days: Some(u16::from_le_bytes([p[4], p[5]])),
                airflow_rate: Some(u16::from_le_bytes([p[6], p[7]])),
                ..Default::default()
            })
        }
        TAG_PROBE_SENSORS => {
            expect_len(p, PROBE_SENSORS_LEN)?;
            Ok(PartialStatus {
                temp_probe1: Some(temperature(p[0], p[1])),
                temp_probe2: Some(temperature(p[2], p[3])),
                ..Default::default()
            })
        }
        TAG_REMOTE_SENSOR => {
            expect_len(p, REMOTE_SENSOR_LEN)?;
            if p[2] > 100 {
                return Err(DecodeError::InvalidValue {
                    field: "humidity_remote",
                    value: u16::from(p[2]),
                });
            }
            Ok(PartialStatus {
                temp_remote: Some(temperature(p[0], p[1])),
                humidity_remote: Some(p[2]),
                ..Default::default()
            })
        }
        other => Err(DecodeError::UnknownReply(other)),
    }
}

/// Advertised local names used by VisionAir units.
const DEVICE_NAME_PREFIXES: [&str; 2] = ["visionair", "purevent"];

/// Whether an advertisement looks like a VisionAir unit.
pub fn is_visionair_device(name: Option<&str>) -> bool {
    name.map(|n| n.trim().to_ascii_lowercase())
        .is_some_and(|n| DEVICE_NAME_PREFIXES.iter().any(|p| n.starts_with(p)))
}
