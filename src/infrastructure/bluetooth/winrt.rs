//! WinRT Transport
//!
//! Bluetooth LE backend for Windows built on the WinRT device APIs:
//! advertisement watcher for discovery, `BluetoothLEDevice` for the
//! connection, and GATT lookups for the write characteristic.

use crate::domain::errors::TransportError;
use crate::infrastructure::bluetooth::transport::{
    DiscoveredPeripheral, GattService, PeripheralId, Transport, TransportEvent, WriteTarget,
};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCommunicationStatus, GattDeviceService,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataWriter;

impl From<windows::core::Error> for TransportError {
    fn from(e: windows::core::Error) -> Self {
        TransportError(e.to_string())
    }
}

pub struct WinRtTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    device: Mutex<Option<(PeripheralId, BluetoothLEDevice)>>,
    characteristic: Mutex<Option<(WriteTarget, GattCharacteristic)>>,
}

impl WinRtTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            watcher: Mutex::new(None),
            device: Mutex::new(None),
            characteristic: Mutex::new(None),
        }
    }

    fn stop_watcher(&self) -> Result<(), TransportError> {
        if let Some(watcher) = lock(&self.watcher).take() {
            info!("Stopping BLE scan...");
            watcher.Stop()?;
        }
        Ok(())
    }

    fn device_for(&self, peripheral: &PeripheralId) -> Result<BluetoothLEDevice, TransportError> {
        match lock(&self.device).as_ref() {
            Some((id, device)) if id == peripheral => Ok(device.clone()),
            _ => Err(TransportError::new(format!("{} is not connected", peripheral))),
        }
    }

    /// Resolve (and cache) the GATT characteristic behind a write target.
    async fn characteristic_for(
        &self,
        target: &WriteTarget,
    ) -> Result<GattCharacteristic, TransportError> {
        let cached = lock(&self.characteristic)
            .as_ref()
            .filter(|(cached_target, _)| cached_target == target)
            .map(|(_, characteristic)| characteristic.clone());
        if let Some(characteristic) = cached {
            return Ok(characteristic);
        }

        let device = self.device_for(&target.peripheral)?;
        let services_result = device
            .GetGattServicesForUuidAsync(to_guid(target.service))?
            .await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            return Err(TransportError::new(format!(
                "GATT service lookup failed: {:?}",
                services_result.Status()?
            )));
        }
        // Keep the vector view out of the next await.
        let service = {
            let services = services_result.Services()?;
            if services.Size()? == 0 {
                return Err(TransportError::new("service not found"));
            }
            services.GetAt(0)?
        };

        let chars_result = service
            .GetCharacteristicsForUuidAsync(to_guid(target.characteristic))?
            .await?;
        if chars_result.Status()? != GattCommunicationStatus::Success {
            return Err(TransportError::new(format!(
                "characteristic lookup failed: {:?}",
                chars_result.Status()?
            )));
        }
        let characteristic = {
            let characteristics = chars_result.Characteristics()?;
            if characteristics.Size()? == 0 {
                return Err(TransportError::new("characteristic not found"));
            }
            characteristics.GetAt(0)?
        };

        *lock(&self.characteristic) = Some((target.clone(), characteristic.clone()));
        Ok(characteristic)
    }
}

impl Transport for WinRtTransport {
    async fn start_scan(&self, name_filter: &str) -> Result<(), TransportError> {
        self.stop_watcher()?;
        info!("Starting BLE scan for {:?}", name_filter);

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    // Anonymous advertisements can never match by name.
                    if !name.is_empty() {
                        let device = DiscoveredPeripheral {
                            id: address_to_id(args.BluetoothAddress()?),
                            name,
                            signal_strength: args.RawSignalStrengthInDBm()?,
                        };
                        let _ = sender.send(TransportEvent::PeripheralDiscovered(device));
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        *lock(&self.watcher) = Some(watcher);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.stop_watcher()
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let address = id_to_address(peripheral)?;
        info!("Connecting to Bluetooth device: {:#X}", address);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device opened: {:?}", device.Name()?);

        let sender = self.events.clone();
        let id = peripheral.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if let Ok(status) = dev.ConnectionStatus() {
                        let event = match status {
                            BluetoothConnectionStatus::Connected => {
                                TransportEvent::Connected(id.clone())
                            }
                            _ => TransportEvent::Disconnected(id.clone()),
                        };
                        let _ = sender.send(event);
                    }
                }
                Ok(())
            });
        device.ConnectionStatusChanged(&status_handler)?;

        *lock(&self.device) = Some((peripheral.clone(), device));
        let _ = self
            .events
            .send(TransportEvent::Connected(peripheral.clone()));
        Ok(())
    }

    async fn discover_services(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<GattService>, TransportError> {
        let device = self.device_for(peripheral)?;

        let services_result = device.GetGattServicesAsync()?.await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            return Err(TransportError::new(format!(
                "failed to get GATT services: {:?}",
                services_result.Status()?
            )));
        }

        // Use block scope to drop the vector view before awaiting again.
        let device_services: Vec<GattDeviceService> = {
            let services = services_result.Services()?;
            let mut out = Vec::new();
            for i in 0..services.Size()? {
                out.push(services.GetAt(i)?);
            }
            out
        };
        info!("Found {} services", device_services.len());

        let mut resolved = Vec::with_capacity(device_services.len());
        for service in device_services {
            let uuid = from_guid(service.Uuid()?);
            let chars_result = service.GetCharacteristicsAsync()?.await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                warn!("Could not read characteristics of service {}", uuid);
                continue;
            }

            let characteristics = {
                let list = chars_result.Characteristics()?;
                let mut out = Vec::new();
                for i in 0..list.Size()? {
                    out.push(from_guid(list.GetAt(i)?.Uuid()?));
                }
                out
            };
            debug!("Service {} has {} characteristics", uuid, characteristics.len());
            resolved.push(GattService {
                uuid,
                characteristics,
            });
        }

        Ok(resolved)
    }

    async fn write(&self, target: &WriteTarget, payload: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(target).await?;

        let operation = {
            let writer = DataWriter::new()?;
            writer.WriteBytes(payload)?;
            let buffer = writer.DetachBuffer()?;
            characteristic.WriteValueAsync(&buffer)?
        };
        let status = operation.await?;

        if status != GattCommunicationStatus::Success {
            return Err(TransportError::new(format!("write status {:?}", status)));
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        *lock(&self.characteristic) = None;

        let mut device = lock(&self.device);
        if device.as_ref().is_some_and(|(id, _)| id == peripheral) {
            if let Some((_, device)) = device.take() {
                let _ = device.Close();
            }
            info!("Disconnected from {}", peripheral);
        }
        Ok(())
    }
}

impl Drop for WinRtTransport {
    fn drop(&mut self) {
        let _ = self.stop_watcher();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn address_to_id(address: u64) -> PeripheralId {
    PeripheralId(format!("{:012X}", address))
}

fn id_to_address(id: &PeripheralId) -> Result<u64, TransportError> {
    u64::from_str_radix(&id.0, 16)
        .map_err(|_| TransportError::new(format!("invalid Bluetooth address {:?}", id.0)))
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn from_guid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol;

    #[test]
    fn test_address_round_trip() {
        let id = address_to_id(0x0011_2233_4455);
        assert_eq!(id.0, "001122334455");
        assert_eq!(id_to_address(&id).unwrap(), 0x0011_2233_4455);
        assert!(id_to_address(&PeripheralId("SIM:00".to_string())).is_err());
    }

    #[test]
    fn test_guid_conversion() {
        let guid = to_guid(protocol::SERVICE_UUID);
        assert_eq!(guid.data1, 0x4fafc201);
        assert_eq!(from_guid(guid), protocol::SERVICE_UUID);
    }
}
