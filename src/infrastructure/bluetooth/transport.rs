//! BLE Transport Seam
//!
//! The platform BLE stack is consumed through these two traits. The WinRT
//! backend implements them on Windows; tests plug in a simulated device.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceAddress, ScannedDevice};
use async_trait::async_trait;
use std::time::Duration;

/// Resolves addresses to live links.
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    type Link: GattLink;

    /// Connect to `address`, discover the VisionAir service and subscribe to
    /// reply notifications.
    ///
    /// Returns [`TransportError::NotFound`] when the device is not currently
    /// connectable.
    async fn connect(&self, address: DeviceAddress) -> Result<Self::Link, TransportError>;

    /// List advertising devices seen during `duration`.
    async fn discover(&self, duration: Duration) -> Result<Vec<ScannedDevice>, TransportError>;
}

/// Write-request / await-notification primitives on an established link.
#[async_trait]
pub trait GattLink: Send + 'static {
    async fn write_request(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next notification on the reply characteristic.
    async fn next_notification(&mut self) -> Result<Vec<u8>, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Adapter for targets without a BLE backend. Every device is unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedAdapter;

/// Uninhabited link type of [`UnsupportedAdapter`].
#[derive(Debug)]
pub enum NoLink {}

#[async_trait]
impl BleAdapter for UnsupportedAdapter {
    type Link = NoLink;

    async fn connect(&self, _address: DeviceAddress) -> Result<NoLink, TransportError> {
        Err(TransportError::NotFound(
            "no BLE backend available on this platform".to_string(),
        ))
    }

    async fn discover(&self, _duration: Duration) -> Result<Vec<ScannedDevice>, TransportError> {
        Err(TransportError::NotFound(
            "no BLE backend available on this platform".to_string(),
        ))
    }
}

#[async_trait]
impl GattLink for NoLink {
    async fn write_request(&mut self, _payload: &[u8]) -> Result<(), TransportError> {
        match *self {}
    }

    async fn next_notification(&mut self) -> Result<Vec<u8>, TransportError> {
        match *self {}
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        match *self {}
    }
}
