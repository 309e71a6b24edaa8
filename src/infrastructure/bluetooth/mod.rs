//! Bluetooth Module
//!
//! Talks to VisionAir ventilation units over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  PollingCoordinator                      │
//! │      (owns the snapshot, schedules polls, commands)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌──────────────┐            ┌──────────────┐
//! │  Aggregator  │            │   Executor   │
//! │ - status     │            │ - validate   │
//! │   requests   │            │ - ack reuse  │
//! └──────┬───────┘            └──────┬───────┘
//!        └─────────────┬─────────────┘
//!                      ▼
//!              ┌──────────────┐      ┌──────────┐
//!              │   Session    │─────▶│ Protocol │
//!              │ - FIFO lock  │      │ - frames │
//!              │ - teardown   │      └──────────┘
//!              └──────┬───────┘
//!                     ▼
//!              ┌──────────────┐
//!              │  Transport   │  WinRT on Windows
//!              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame layout, request/command encoding and reply decoding
//! - [`transport`] - Adapter and link traits the platform backend implements
//! - [`session`] - Single-flight sessions with guaranteed disconnect
//! - [`aggregator`] - Builds a full snapshot from the individual replies
//! - [`executor`] - Sends commands and returns the resulting snapshot

pub mod aggregator;
pub mod executor;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod fake;

pub use session::{Connector, Session};
pub use transport::{BleAdapter, GattLink, UnsupportedAdapter};
