//! Windows Runtime transport
//!
//! GATT access and device discovery through `Windows.Devices.Bluetooth` and
//! `Windows.Devices.Enumeration`. Every enumeration and read bypasses the
//! system attribute cache.

use crate::infrastructure::bluetooth::transport::{
    DeviceWatcher, DiscoveryBackend, GattBackend, GattCharacteristic, GattPeripheral, GattService,
    TransportError, WatcherEvent,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{IInspectable, Ref, GUID, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as PlatformCharacteristic, GattCommunicationStatus, GattDeviceService,
    GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothLEDevice};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationUpdate, DeviceWatcher as PlatformWatcher,
    DeviceWatcherStatus,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

impl From<windows::core::Error> for TransportError {
    fn from(error: windows::core::Error) -> Self {
        TransportError::Platform(error.to_string())
    }
}

pub fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

pub fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn check(status: GattCommunicationStatus) -> Result<(), TransportError> {
    let name = match status {
        GattCommunicationStatus::Success => return Ok(()),
        GattCommunicationStatus::Unreachable => "Unreachable".to_string(),
        GattCommunicationStatus::ProtocolError => "ProtocolError".to_string(),
        GattCommunicationStatus::AccessDenied => "AccessDenied".to_string(),
        other => format!("{:?}", other),
    };
    Err(TransportError::Status(name))
}

/// Log every failed handler removal and keep the first error
fn first_error<const N: usize>(
    removals: [(&str, windows::core::Result<()>); N],
) -> Result<(), TransportError> {
    let mut first = Ok(());
    for (event, result) in removals {
        if let Err(e) = result {
            warn!("Failed to remove {} handler: {}", event, e);
            if first.is_ok() {
                first = Err(TransportError::from(e));
            }
        }
    }
    first
}

/// Windows Bluetooth LE stack
#[derive(Debug, Default, Clone, Copy)]
pub struct WinRtBluetooth;

impl WinRtBluetooth {
    pub fn new() -> Self {
        Self
    }

    /// Both backends share the same platform stack
    pub fn backends() -> (Arc<dyn GattBackend>, Arc<dyn DiscoveryBackend>) {
        let bluetooth = Arc::new(Self::new());
        (bluetooth.clone(), bluetooth)
    }
}

#[async_trait]
impl GattBackend for WinRtBluetooth {
    async fn open_peripheral(
        &self,
        device_id: &str,
    ) -> Result<Option<Box<dyn GattPeripheral>>, TransportError> {
        let id = HSTRING::from(device_id);
        debug!("Resolving device {}", device_id);

        match BluetoothLEDevice::FromIdAsync(&id)?.await {
            Ok(device) => Ok(Some(Box::new(WinRtPeripheral { device }))),
            // A null device comes back as an error carrying a success code
            Err(e) if e.code().is_ok() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

struct WinRtPeripheral {
    device: BluetoothLEDevice,
}

#[async_trait]
impl GattPeripheral for WinRtPeripheral {
    async fn services(&self) -> Result<Vec<Box<dyn GattService>>, TransportError> {
        let result = self
            .device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check(result.Status()?)?;

        let services = result.Services()?;
        let mut found: Vec<Box<dyn GattService>> = Vec::new();
        for i in 0..services.Size()? {
            found.push(Box::new(WinRtService {
                service: services.GetAt(i)?,
            }));
        }
        Ok(found)
    }

    fn close(&self) {
        if let Err(e) = self.device.Close() {
            debug!("Failed to close device: {}", e);
        }
    }
}

struct WinRtService {
    service: GattDeviceService,
}

#[async_trait]
impl GattService for WinRtService {
    fn uuid(&self) -> Uuid {
        self.service.Uuid().map_or(Uuid::nil(), to_uuid)
    }

    async fn characteristics(&self) -> Result<Vec<Arc<dyn GattCharacteristic>>, TransportError> {
        let result = self
            .service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check(result.Status()?)?;

        let characteristics = result.Characteristics()?;
        let mut found: Vec<Arc<dyn GattCharacteristic>> = Vec::new();
        for i in 0..characteristics.Size()? {
            found.push(Arc::new(WinRtCharacteristic {
                characteristic: characteristics.GetAt(i)?,
            }));
        }
        Ok(found)
    }

    fn close_session(&self) {
        if let Err(e) = self.service.Session().and_then(|session| session.Close()) {
            debug!("Failed to close GATT session: {}", e);
        }
    }

    fn close(&self) {
        if let Err(e) = self.service.Close() {
            debug!("Failed to close service: {}", e);
        }
    }
}

struct WinRtCharacteristic {
    characteristic: PlatformCharacteristic,
}

#[async_trait]
impl GattCharacteristic for WinRtCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.Uuid().map_or(Uuid::nil(), to_uuid)
    }

    async fn read_value(&self) -> Result<Vec<u8>, TransportError> {
        let result = self
            .characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check(result.Status()?)?;

        let reader = DataReader::FromBuffer(&result.Value()?)?;
        let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
        reader.ReadBytes(&mut bytes)?;
        Ok(bytes)
    }

    async fn write_value(&self, payload: &[u8]) -> Result<(), TransportError> {
        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;

        let status = self
            .characteristic
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithResponse)?
            .await?;
        check(status)
    }
}

impl DiscoveryBackend for WinRtBluetooth {
    fn create_watcher(&self) -> Result<Box<dyn DeviceWatcher>, TransportError> {
        let selector = BluetoothLEDevice::GetDeviceSelectorFromPairingState(false)?;
        let watcher = DeviceInformation::CreateWatcherAqsFilter(&selector)?;
        Ok(Box::new(WinRtDeviceWatcher {
            watcher,
            tokens: None,
        }))
    }
}

struct Registrations {
    added: i64,
    updated: i64,
    removed: i64,
    completed: i64,
    stopped: i64,
}

/// Unpaired BLE devices reported by a `Windows.Devices.Enumeration` watcher
pub struct WinRtDeviceWatcher {
    watcher: PlatformWatcher,
    tokens: Option<Registrations>,
}

impl WinRtDeviceWatcher {
    fn subscribe(
        &self,
        events: mpsc::UnboundedSender<WatcherEvent>,
    ) -> Result<Registrations, TransportError> {
        let sender = events.clone();
        let added = self.watcher.Added(&TypedEventHandler::new(
            move |_: Ref<PlatformWatcher>, info: Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    let _ = sender.send(WatcherEvent::Added {
                        id: info.Id()?.to_string(),
                        name: info.Name()?.to_string(),
                    });
                }
                Ok(())
            },
        ))?;

        // Added stops firing unless Updated has a handler
        let updated = self.watcher.Updated(&TypedEventHandler::new(
            |_: Ref<PlatformWatcher>, _: Ref<DeviceInformationUpdate>| Ok(()),
        ))?;

        let sender = events.clone();
        let removed = self.watcher.Removed(&TypedEventHandler::new(
            move |_: Ref<PlatformWatcher>, update: Ref<DeviceInformationUpdate>| {
                if let Some(update) = update.as_ref() {
                    let _ = sender.send(WatcherEvent::Removed {
                        id: update.Id()?.to_string(),
                    });
                }
                Ok(())
            },
        ))?;

        let sender = events.clone();
        let completed = self.watcher.EnumerationCompleted(&TypedEventHandler::new(
            move |_: Ref<PlatformWatcher>, _: Ref<IInspectable>| {
                let _ = sender.send(WatcherEvent::EnumerationCompleted);
                Ok(())
            },
        ))?;

        let stopped = self.watcher.Stopped(&TypedEventHandler::new(
            move |_: Ref<PlatformWatcher>, _: Ref<IInspectable>| {
                let _ = events.send(WatcherEvent::Stopped);
                Ok(())
            },
        ))?;

        Ok(Registrations {
            added,
            updated,
            removed,
            completed,
            stopped,
        })
    }

    /// Unregister every handler, even when some removals fail
    fn unsubscribe(&mut self) -> Result<(), TransportError> {
        let Some(tokens) = self.tokens.take() else {
            return Ok(());
        };
        first_error([
            ("Added", self.watcher.RemoveAdded(tokens.added)),
            ("Updated", self.watcher.RemoveUpdated(tokens.updated)),
            ("Removed", self.watcher.RemoveRemoved(tokens.removed)),
            (
                "EnumerationCompleted",
                self.watcher.RemoveEnumerationCompleted(tokens.completed),
            ),
            ("Stopped", self.watcher.RemoveStopped(tokens.stopped)),
        ])
    }
}

impl DeviceWatcher for WinRtDeviceWatcher {
    fn start(&mut self, events: mpsc::UnboundedSender<WatcherEvent>) -> Result<(), TransportError> {
        let tokens = self.subscribe(events)?;
        self.tokens = Some(tokens);
        if let Err(e) = self.watcher.Start() {
            let _ = self.unsubscribe();
            return Err(e.into());
        }
        info!("Device watcher started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        let stopped = self.watcher.Status().and_then(|status| {
            if status == DeviceWatcherStatus::Started
                || status == DeviceWatcherStatus::EnumerationCompleted
            {
                self.watcher.Stop()
            } else {
                Ok(())
            }
        });
        if let Err(e) = &stopped {
            warn!("Failed to stop device watcher: {}", e);
        }
        // Handlers hold the event sender; dropping them ends the stream
        let unsubscribed = self.unsubscribe();
        stopped.map_err(TransportError::from).and(unsubscribed)
    }
}

impl Drop for WinRtDeviceWatcher {
    fn drop(&mut self) {
        if self.tokens.is_some() {
            let _ = self.stop();
        }
    }
}
