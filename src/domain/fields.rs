//! Declarative description of the status fields for presentation layers.
//!
//! Nothing in the protocol path reads this table; it exists so a front end
//! can list sensors without knowing the shape of [`DeviceStatus`].

use crate::domain::models::DeviceStatus;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Temperature,
    Humidity,
    Duration,
    VolumeFlowRate,
    Enum,
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    Measurement,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: DeviceClass,
    pub state_class: Option<StateClass>,
    pub precision: Option<usize>,
    pub enabled_default: bool,
}

/// Value of one field taken from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(Option<f32>),
    Integer(i64),
    Flag(bool),
    Text(&'static str),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(Some(v)) => write!(f, "{:.1}", v),
            FieldValue::Float(None) => f.write_str("n/a"),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Flag(true) => f.write_str("on"),
            FieldValue::Flag(false) => f.write_str("off"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

const fn sensor(
    key: &'static str,
    name: &'static str,
    unit: Option<&'static str>,
    device_class: DeviceClass,
) -> FieldDescriptor {
    FieldDescriptor {
        key,
        name,
        unit,
        device_class,
        state_class: Some(StateClass::Measurement),
        precision: None,
        enabled_default: true,
    }
}

pub const STATUS_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor {
        precision: Some(1),
        ..sensor("temp_remote", "Remote temperature", Some("°C"), DeviceClass::Temperature)
    },
    FieldDescriptor {
        precision: Some(1),
        ..sensor("temp_probe1", "Probe 1 temperature", Some("°C"), DeviceClass::Temperature)
    },
    FieldDescriptor {
        precision: Some(1),
        enabled_default: false,
        ..sensor("temp_probe2", "Probe 2 temperature", Some("°C"), DeviceClass::Temperature)
    },
    sensor("humidity_remote", "Remote humidity", Some("%"), DeviceClass::Humidity),
    FieldDescriptor {
        state_class: None,
        ..sensor("airflow_mode", "Airflow mode", None, DeviceClass::Enum)
    },
    sensor("airflow_rate", "Airflow", Some("m³/h"), DeviceClass::VolumeFlowRate),
    FieldDescriptor {
        state_class: None,
        ..sensor("boost_active", "Boost", None, DeviceClass::Switch)
    },
    FieldDescriptor {
        state_class: None,
        ..sensor("preheat_enabled", "Preheat", None, DeviceClass::Switch)
    },
    FieldDescriptor {
        state_class: None,
        ..sensor("preheat_temp", "Preheat temperature", Some("°C"), DeviceClass::Temperature)
    },
    FieldDescriptor {
        state_class: None,
        ..sensor("holiday_days", "Holiday days", Some("d"), DeviceClass::Duration)
    },
    FieldDescriptor {
        state_class: None,
        ..sensor("summer_limit_enabled", "Summer limit", None, DeviceClass::Switch)
    },
    FieldDescriptor {
        state_class: None,
        ..sensor("filter_days", "Filter remaining", Some("d"), DeviceClass::Duration)
    },
];

impl DeviceStatus {
    /// Look a field up by its [`FieldDescriptor::key`].
    pub fn field_value(&self, key: &str) -> Option<FieldValue> {
        let value = match key {
            "temp_remote" => FieldValue::Float(self.temp_remote),
            "temp_probe1" => FieldValue::Float(self.temp_probe1),
            "temp_probe2" => FieldValue::Float(self.temp_probe2),
            "humidity_remote" => FieldValue::Integer(i64::from(self.humidity_remote)),
            "airflow_mode" => FieldValue::Text(self.airflow_mode.as_str()),
            "airflow_rate" => FieldValue::Integer(i64::from(self.airflow_rate)),
            "boost_active" => FieldValue::Flag(self.boost_active),
            "preheat_enabled" => FieldValue::Flag(self.preheat_enabled),
            "preheat_temp" => FieldValue::Integer(i64::from(self.preheat_temp)),
            "holiday_days" => FieldValue::Integer(i64::from(self.holiday_days)),
            "summer_limit_enabled" => FieldValue::Flag(self.summer_limit_enabled),
            "filter_days" => FieldValue::Integer(i64::from(self.filter_days)),
            _ => return None,
        };
        Some(value)
    }
}
