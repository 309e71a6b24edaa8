//! Client for VisionAir ventilation units over Bluetooth LE.
//!
//! [`PollingCoordinator`] is the entry point: it polls one unit on a timer,
//! caches the latest [`DeviceStatus`] and executes [`Command`]s, sharing a
//! single-flight link with any other coordinator built on the same
//! [`Connector`].

pub mod coordinator;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use coordinator::PollingCoordinator;
pub use domain::error::{ErrorKind, VisionAirError};
pub use domain::models::{
    AirflowMode, Command, CoordinatorEvent, CoordinatorState, DeviceAddress, DeviceStatus,
};
pub use infrastructure::bluetooth::{BleAdapter, Connector, GattLink};
