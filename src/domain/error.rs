//! Error taxonomy for the VisionAir client.
//!
//! Transport problems, codec problems and bad commands each have their own
//! type; [`VisionAirError`] is what callers of the coordinator see.

use crate::domain::models::DeviceAddress;
use std::time::Duration;
use thiserror::Error;

/// Failure while turning a device reply into status fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reply too short: {actual} bytes, need at least {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("reply does not start with the frame marker (got {0:02X?})")]
    BadMagic([u8; 2]),

    #[error("checksum mismatch: computed {computed:#04X}, frame carries {received:#04X}")]
    ChecksumMismatch { computed: u8, received: u8 },

    #[error("reply has {actual} bytes, expected exactly {expected}")]
    BadLength { expected: usize, actual: usize },

    #[error("unknown reply tag {0:#04X}")]
    UnknownReply(u8),

    #[error("invalid value {value:#04X} for {field}")]
    InvalidValue { field: &'static str, value: u16 },
}

/// A command parameter outside the domain the device accepts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("preheat temperature {0}°C outside 12-18°C")]
    PreheatTemperatureOutOfRange(i32),

    #[error("holiday duration {0} days outside 0-30 days")]
    HolidayDaysOutOfRange(i32),

    #[error("unknown airflow mode '{0}' (expected low, medium or high)")]
    UnknownAirflowMode(String),
}

/// Failure reported by the platform BLE stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The address does not resolve to a connectable peer right now.
    #[error("device not found: {0}")]
    NotFound(String),

    /// GATT level failure on an established link.
    #[error("GATT error: {0}")]
    Gatt(String),

    /// The link went away underneath us.
    #[error("link closed")]
    Closed,
}

/// Coarse classification exposed to the scheduling shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unreachable,
    Timeout,
    Protocol,
    InvalidCommand,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VisionAirError {
    #[error("device {address} is not reachable: {reason}")]
    DeviceUnreachable {
        address: DeviceAddress,
        reason: String,
    },

    #[error("no reply from device within {timeout:?}")]
    LinkTimeout { timeout: Duration },

    #[error("link error: {0}")]
    LinkError(String),

    #[error("decoding error: {0}")]
    Decoding(#[from] DecodeError),

    #[error("incomplete status, missing: {}", .missing.join(", "))]
    IncompleteStatus { missing: Vec<&'static str> },

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] EncodeError),

    #[error("device did not apply {command}")]
    CommandNotApplied { command: String },
}

impl VisionAirError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnreachable { .. } => ErrorKind::Unreachable,
            Self::LinkTimeout { .. } => ErrorKind::Timeout,
            Self::InvalidCommand(_) => ErrorKind::InvalidCommand,
            Self::LinkError(_)
            | Self::Decoding(_)
            | Self::IncompleteStatus { .. }
            | Self::CommandNotApplied { .. } => ErrorKind::Protocol,
        }
    }

    /// Expected on a noisy radio link; the next poll may well succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unreachable | ErrorKind::Timeout)
    }

    /// Map a transport failure that happened on an open link.
    pub(crate) fn from_link(err: TransportError) -> Self {
        Self::LinkError(err.to_string())
    }
}
