//! GATT Transport Abstraction
//!
//! The connection manager and device directory talk to the platform BLE
//! stack only through these traits. Every enumeration and read goes to the
//! device itself, never to a cached attribute table.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The platform call itself failed
    #[error("platform error: {0}")]
    Platform(String),
    /// The call completed but the device answered with a non-success status
    #[error("GATT operation returned status {0}")]
    Status(String),
}

/// Entry point into the platform's GATT client
#[async_trait]
pub trait GattBackend: Send + Sync {
    /// Resolve a platform device identifier to a live peripheral.
    ///
    /// `Ok(None)` means the platform knows no such device right now
    /// (powered off, out of range, or a stale identifier).
    async fn open_peripheral(
        &self,
        device_id: &str,
    ) -> Result<Option<Box<dyn GattPeripheral>>, TransportError>;
}

#[async_trait]
pub trait GattPeripheral: Send + Sync {
    /// All primary services, read from the device
    async fn services(&self) -> Result<Vec<Box<dyn GattService>>, TransportError>;

    /// Release the peripheral. Must tolerate being called more than once.
    fn close(&self);
}

#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// All characteristics of this service, read from the device
    async fn characteristics(&self) -> Result<Vec<Arc<dyn GattCharacteristic>>, TransportError>;

    /// Release the GATT session that owns this service
    fn close_session(&self);

    fn close(&self);
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// Read the current value from the device
    async fn read_value(&self) -> Result<Vec<u8>, TransportError>;

    /// Write with response; a non-success status is an error
    async fn write_value(&self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Raw notifications from a platform device watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    Added { id: String, name: String },
    Removed { id: String },
    EnumerationCompleted,
    Stopped,
}

/// A platform enumeration of nearby, unpaired BLE peripherals
pub trait DeviceWatcher: Send {
    /// Begin enumerating. Events are delivered on `events` from whatever
    /// thread the platform uses; this call must not block on enumeration.
    fn start(&mut self, events: mpsc::UnboundedSender<WatcherEvent>) -> Result<(), TransportError>;

    /// Stop enumerating and drop every handler that holds `events`.
    fn stop(&mut self) -> Result<(), TransportError>;
}

pub trait DiscoveryBackend: Send + Sync {
    fn create_watcher(&self) -> Result<Box<dyn DeviceWatcher>, TransportError>;
}
