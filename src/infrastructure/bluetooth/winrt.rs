//! WinRT BLE Backend
//!
//! Implements the transport traits on top of `Windows.Devices.Bluetooth`.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceAddress, ScannedDevice};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol::is_visionair_device;
use crate::infrastructure::bluetooth::transport::{BleAdapter, GattLink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::BluetoothLEDevice;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

fn gatt(e: windows::core::Error) -> TransportError {
    TransportError::Gatt(e.to_string())
}

/// Parse a textual UUID into the GUID layout WinRT expects.
pub fn parse_uuid(uuid_str: &str) -> Result<GUID, TransportError> {
    let hex = uuid_str.replace('-', "");
    let invalid = || TransportError::Gatt(format!("invalid UUID '{}'", uuid_str));

    if hex.len() != 32 || !hex.is_ascii() {
        return Err(invalid());
    }

    let data1 = u32::from_str_radix(&hex[0..8], 16).map_err(|_| invalid())?;
    let data2 = u16::from_str_radix(&hex[8..12], 16).map_err(|_| invalid())?;
    let data3 = u16::from_str_radix(&hex[12..16], 16).map_err(|_| invalid())?;

    let mut data4 = [0u8; 8];
    for (i, byte) in data4.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[16 + i * 2..18 + i * 2], 16).map_err(|_| invalid())?;
    }

    Ok(GUID {
        data1,
        data2,
        data3,
        data4,
    })
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

pub struct WinRtAdapter {
    service_uuid: GUID,
    write_uuid: GUID,
    notify_uuid: GUID,
}

impl WinRtAdapter {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        Ok(Self {
            service_uuid: parse_uuid(&settings.ble_service_uuid)?,
            write_uuid: parse_uuid(&settings.ble_write_char_uuid)?,
            notify_uuid: parse_uuid(&settings.ble_notify_char_uuid)?,
        })
    }

    async fn characteristics(
        &self,
        device: &BluetoothLEDevice,
    ) -> Result<(GattCharacteristic, GattCharacteristic), TransportError> {
        let services_result = device
            .GetGattServicesForUuidAsync(self.service_uuid)
            .map_err(gatt)?
            .await
            .map_err(gatt)?;

        let status = services_result.Status().map_err(gatt)?;
        if status != GattCommunicationStatus::Success {
            // Out of range or held by another central
            return Err(TransportError::NotFound(format!(
                "GATT services unavailable: {:?}",
                status
            )));
        }

        let services = services_result.Services().map_err(gatt)?;
        if services.Size().map_err(gatt)? == 0 {
            return Err(TransportError::NotFound(
                "VisionAir service not advertised".to_string(),
            ));
        }
        let service = services.GetAt(0).map_err(gatt)?;

        let chars_result = service
            .GetCharacteristicsAsync()
            .map_err(gatt)?
            .await
            .map_err(gatt)?;
        if chars_result.Status().map_err(gatt)? != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(
                "failed to get characteristics".to_string(),
            ));
        }

        let mut write_char = None;
        let mut notify_char = None;
        let characteristics = chars_result.Characteristics().map_err(gatt)?;
        for i in 0..characteristics.Size().map_err(gatt)? {
            let c = characteristics.GetAt(i).map_err(gatt)?;
            let uuid = c.Uuid().map_err(gatt)?;
            if uuid == self.write_uuid {
                write_char = Some(c);
            } else if uuid == self.notify_uuid {
                notify_char = Some(c);
            }
        }

        let write = write_char
            .ok_or_else(|| TransportError::Gatt("write characteristic not found".to_string()))?;
        let notify = notify_char
            .ok_or_else(|| TransportError::Gatt("notify characteristic not found".to_string()))?;
        Ok((write, notify))
    }
}

#[async_trait]
impl BleAdapter for WinRtAdapter {
    type Link = WinRtLink;

    async fn connect(&self, address: DeviceAddress) -> Result<WinRtLink, TransportError> {
        info!(%address, "Opening BLE device");
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address.as_u64())
            .map_err(gatt)?
            .await
            .map_err(|e| TransportError::NotFound(e.to_string()))?;

        let link = match self.characteristics(&device).await {
            Ok((write_char, notify_char)) => {
                WinRtLink::subscribe(device, write_char, notify_char).await
            }
            Err(e) => {
                let _ = device.Close();
                Err(e)
            }
        }?;

        debug!(%address, "Notifications enabled");
        Ok(link)
    }

    async fn discover(&self, duration: Duration) -> Result<Vec<ScannedDevice>, TransportError> {
        info!(?duration, "Scanning for VisionAir units");

        let found: Arc<Mutex<HashMap<u64, ScannedDevice>>> = Arc::default();
        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(gatt)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(gatt)?;

        let sink = found.clone();
        let target_uuid = self.service_uuid;
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let name = adv.LocalName()?.to_string();

                    let service_uuids = adv.ServiceUuids()?;
                    let mut matches = is_visionair_device(Some(&name));
                    for i in 0..service_uuids.Size()? {
                        matches |= service_uuids.GetAt(i)? == target_uuid;
                    }

                    if matches {
                        let raw = args.BluetoothAddress()?;
                        let device = ScannedDevice {
                            name: if name.is_empty() {
                                "Unknown".to_string()
                            } else {
                                name
                            },
                            address: DeviceAddress::new(raw),
                            signal_strength: args.RawSignalStrengthInDBm()?,
                        };
                        sink.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(raw, device);
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(gatt)?;
        watcher.Start().map_err(gatt)?;
        tokio::time::sleep(duration).await;
        watcher.Stop().map_err(gatt)?;

        let mut devices: Vec<ScannedDevice> = found
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
        info!(count = devices.len(), "Scan finished");
        Ok(devices)
    }
}

/// An open GATT link with reply notifications routed into a channel.
pub struct WinRtLink {
    device: BluetoothLEDevice,
    write_char: GattCharacteristic,
    notify_char: GattCharacteristic,
    value_changed_token: Option<i64>,
    notifications: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl WinRtLink {
    async fn subscribe(
        device: BluetoothLEDevice,
        write_char: GattCharacteristic,
        notify_char: GattCharacteristic,
    ) -> Result<Self, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let bytes = read_buffer(&args.CharacteristicValue()?)?;
                    trace!("Notification: {:02X?}", bytes);
                    let _ = tx.send(bytes);
                }
                Ok(())
            },
        );

        let mut link = Self {
            device,
            write_char,
            notify_char,
            value_changed_token: None,
            notifications: rx,
        };
        // From here on `link` owns the device; failures still close it
        let result = link.enable_notifications(&handler).await;
        if let Err(e) = result {
            let _ = link.disconnect().await;
            return Err(e);
        }
        Ok(link)
    }

    async fn enable_notifications(
        &mut self,
        handler: &TypedEventHandler<GattCharacteristic, GattValueChangedEventArgs>,
    ) -> Result<(), TransportError> {
        self.value_changed_token = Some(self.notify_char.ValueChanged(handler).map_err(gatt)?);

        let status = self
            .notify_char
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )
            .map_err(gatt)?
            .await
            .map_err(gatt)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!(
                "notification subscription returned {:?}",
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GattLink for WinRtLink {
    async fn write_request(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        trace!("Write: {:02X?}", payload);
        let writer = DataWriter::new().map_err(gatt)?;
        writer.WriteBytes(payload).map_err(gatt)?;
        let buffer = writer.DetachBuffer().map_err(gatt)?;

        let status = self
            .write_char
            .WriteValueAsync(&buffer)
            .map_err(gatt)?
            .await
            .map_err(gatt)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!("write returned {:?}", status)));
        }
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Vec<u8>, TransportError> {
        self.notifications.recv().await.ok_or(TransportError::Closed)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(token) = self.value_changed_token.take() {
            if let Err(e) = self.notify_char.RemoveValueChanged(token) {
                warn!(error = %e, "Failed to remove notification handler");
            }
        }
        self.notifications.close();
        self.device.Close().map_err(gatt)
    }
}
