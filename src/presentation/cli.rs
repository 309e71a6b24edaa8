//! Command line surface of the `visionair` binary.

use crate::domain::fields::{FieldDescriptor, FieldValue, STATUS_FIELDS};
use crate::domain::models::{AirflowMode, Command, DeviceAddress, DeviceStatus, ScannedDevice};
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Monitor and control VisionAir ventilation units over Bluetooth LE.
#[derive(Parser, Debug)]
#[command(name = "visionair", version, about)]
pub struct Cli {
    /// Device address, e.g. 00:1A:7D:DA:71:13 (overrides the configured one)
    #[arg(short, long, global = true)]
    pub address: Option<DeviceAddress>,

    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Poll the device once and print its status
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll on the configured interval until interrupted
    Watch,
    /// Change a device setting
    Set {
        field: SettingField,
        /// on/off, a number, or an airflow mode (low, medium, high)
        value: String,
    },
    /// List VisionAir units advertising nearby
    Scan {
        /// Scan duration in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Show or change the polling interval
    Interval {
        /// New interval in seconds
        secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SettingField {
    Airflow,
    Boost,
    Preheat,
    PreheatTemp,
    Holiday,
    SummerLimit,
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected on or off, got '{}'", other)),
    }
}

fn parse_number(value: &str) -> Result<i32, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("expected a whole number, got '{}'", value))
}

/// Turn `set <field> <value>` into a command. Range checks are left to
/// [`Command::validate`].
pub fn parse_command(field: SettingField, value: &str) -> Result<Command, String> {
    let command = match field {
        SettingField::Airflow => {
            Command::AirflowMode(value.parse::<AirflowMode>().map_err(|e| e.to_string())?)
        }
        SettingField::Boost => Command::Boost(parse_switch(value)?),
        SettingField::Preheat => Command::Preheat(parse_switch(value)?),
        SettingField::PreheatTemp => Command::PreheatTemp(parse_number(value)?),
        SettingField::Holiday => Command::Holiday(parse_number(value)?),
        SettingField::SummerLimit => Command::SummerLimit(parse_switch(value)?),
    };
    Ok(command)
}

fn format_value(field: &FieldDescriptor, value: &FieldValue) -> String {
    let text = match (value, field.precision) {
        (FieldValue::Float(Some(v)), Some(precision)) => format!("{:.*}", precision, v),
        _ => value.to_string(),
    };
    match (value, field.unit) {
        (FieldValue::Float(None), _) | (_, None) => text,
        (_, Some(unit)) => format!("{} {}", text, unit),
    }
}

/// One line per field. Fields hidden by default are only shown when they
/// carry a reading.
pub fn render_status(status: &DeviceStatus) -> String {
    let mut out = String::new();
    for field in STATUS_FIELDS {
        let Some(value) = status.field_value(field.key) else {
            continue;
        };
        if !field.enabled_default && value == FieldValue::Float(None) {
            continue;
        }
        let _ = writeln!(out, "{:<22}{}", field.name, format_value(field, &value));
    }
    out
}

pub fn render_scan(devices: &[ScannedDevice]) -> String {
    if devices.is_empty() {
        return "No VisionAir units found\n".to_string();
    }
    let mut out = String::new();
    for device in devices {
        let _ = writeln!(
            out,
            "{}  {:>4} dBm  {}",
            device.address, device.signal_strength, device.name
        );
    }
    out
}
