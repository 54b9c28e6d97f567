//! BLE Connection Module
//!
//! Owns the lifecycle of the calibrator link: resolve the device, locate the
//! calibrator service and characteristic, run read/write round trips over
//! it, and release everything again.

use crate::domain::models::ConnectionState;
use crate::error::CommunicationError;
use crate::infrastructure::bluetooth::protocol::{Frame, CALIBRATOR_UUID};
use crate::infrastructure::bluetooth::transport::{
    GattBackend, GattCharacteristic, GattPeripheral, GattService, TransportError,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Upper bound for any single platform round trip
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("no BLE device has been selected")]
    NoDeviceConfigured,
    #[error("could not reach device {0}; is it powered on?")]
    DeviceUnreachable(String),
    #[error("calibrator service not found on the device")]
    ServiceNotFound,
    #[error("calibrator characteristic not found on the device")]
    CharacteristicNotFound,
    #[error("a connection attempt is already in progress")]
    InProgress,
    #[error("already connected to {0}")]
    AlreadyConnected(String),
    #[error("connection attempt was abandoned by a disconnect")]
    Cancelled,
    #[error("{step} timed out after {timeout:?}")]
    TimedOut {
        step: &'static str,
        timeout: Duration,
    },
    #[error("{step} failed: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

/// Opaque token for one established connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    id: u64,
    device_id: String,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Platform references held for one connection.
///
/// Released characteristic first, then the service's session, the service,
/// and finally the peripheral. Releasing twice is a no-op.
#[derive(Default)]
struct Resources {
    characteristic: Option<Arc<dyn GattCharacteristic>>,
    service: Option<Box<dyn GattService>>,
    peripheral: Option<Box<dyn GattPeripheral>>,
}

impl Resources {
    fn release(&mut self) {
        self.characteristic.take();
        if let Some(service) = self.service.take() {
            service.close_session();
            service.close();
        }
        if let Some(peripheral) = self.peripheral.take() {
            peripheral.close();
        }
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.release();
    }
}

struct Link {
    handle: ConnectionHandle,
    resources: Mutex<Resources>,
    closed: watch::Sender<bool>,
}

impl Link {
    fn new(handle: ConnectionHandle, resources: Resources) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            handle,
            resources: Mutex::new(resources),
            closed,
        }
    }

    fn characteristic(&self) -> Option<Arc<dyn GattCharacteristic>> {
        lock(&self.resources).characteristic.clone()
    }

    fn close(&self) {
        self.closed.send_replace(true);
        lock(&self.resources).release();
    }
}

enum Slot {
    Disconnected,
    Connecting { id: u64, cancel: watch::Sender<bool> },
    /// Abandoned by `disconnect` but not yet unwound
    Cancelling(u64),
    Connected(Arc<Link>),
}

/// Puts the slot back to `Disconnected` if a connect attempt ends without
/// installing its link, including when the connect future is dropped.
struct Attempt<'a> {
    slot: &'a Mutex<Slot>,
    id: u64,
}

impl Attempt<'_> {
    fn is_live(&self, slot: &Slot) -> bool {
        matches!(slot, Slot::Connecting { id, .. } if *id == self.id)
    }

    fn is_current(&self, slot: &Slot) -> bool {
        self.is_live(slot) || matches!(slot, Slot::Cancelling(id) if *id == self.id)
    }

    fn is_abandoned(&self) -> bool {
        !self.is_live(&lock(self.slot))
    }

    fn complete(self, link: Arc<Link>) -> Result<(), ConnectError> {
        let mut slot = lock(self.slot);
        if !self.is_live(&slot) {
            drop(slot);
            link.close();
            return Err(ConnectError::Cancelled);
        }
        *slot = Slot::Connected(link);
        Ok(())
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if self.is_current(&slot) {
            *slot = Slot::Disconnected;
        }
    }
}

/// Connection manager for a single calibrator
pub struct ConnectionManager {
    backend: Arc<dyn GattBackend>,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn GattBackend>) -> Self {
        Self::with_timeout(backend, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(backend: Arc<dyn GattBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            slot: Mutex::new(Slot::Disconnected),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &*lock(&self.slot) {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting { .. } | Slot::Cancelling(_) => ConnectionState::Connecting,
            Slot::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn current(&self) -> Option<ConnectionHandle> {
        self.link().map(|link| link.handle.clone())
    }

    /// Connect to a device by platform identifier.
    ///
    /// Only one attempt may be in flight; a second call while connecting, or
    /// while an abandoned attempt is still unwinding, is rejected with
    /// [`ConnectError::InProgress`].
    pub async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, ConnectError> {
        if device_id.is_empty() {
            return Err(ConnectError::NoDeviceConfigured);
        }

        let (cancel, cancelled) = watch::channel(false);
        let id = {
            let mut slot = lock(&self.slot);
            match &*slot {
                Slot::Connected(link) if link.handle.device_id == device_id => {
                    debug!("Already connected to {}", device_id);
                    return Ok(link.handle.clone());
                }
                Slot::Connected(link) => {
                    return Err(ConnectError::AlreadyConnected(
                        link.handle.device_id.clone(),
                    ));
                }
                Slot::Connecting { .. } | Slot::Cancelling(_) => {
                    warn!("Rejecting connect to {}: attempt in progress", device_id);
                    return Err(ConnectError::InProgress);
                }
                Slot::Disconnected => {}
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            *slot = Slot::Connecting { id, cancel };
            id
        };

        info!("Connecting to calibrator {}", device_id);
        let attempt = Attempt {
            slot: &self.slot,
            id,
        };

        let resources = self
            .acquire(device_id, &cancelled)
            .await
            .map_err(|e| {
                if attempt.is_abandoned() {
                    ConnectError::Cancelled
                } else {
                    e
                }
            })
            .inspect_err(|e| {
                warn!("Connection to {} failed: {}", device_id, e);
            })?;

        let handle = ConnectionHandle {
            id,
            device_id: device_id.to_string(),
        };
        attempt.complete(Arc::new(Link::new(handle.clone(), resources)))?;

        info!("Connected to calibrator {}", device_id);
        Ok(handle)
    }

    /// Resolve peripheral, service, and characteristic in that order.
    /// Anything acquired before a failure is released when `resources` drops.
    async fn acquire(
        &self,
        device_id: &str,
        cancelled: &watch::Receiver<bool>,
    ) -> Result<Resources, ConnectError> {
        let mut resources = Resources::default();

        let peripheral = self
            .step(
                "device lookup",
                cancelled,
                self.backend.open_peripheral(device_id),
            )
            .await?
            .ok_or_else(|| ConnectError::DeviceUnreachable(device_id.to_string()))?;
        let peripheral = resources.peripheral.insert(peripheral);

        let services = self
            .step("service discovery", cancelled, peripheral.services())
            .await?;
        debug!("Found {} services", services.len());
        let service = services
            .into_iter()
            .find(|service| service.uuid() == CALIBRATOR_UUID)
            .ok_or(ConnectError::ServiceNotFound)?;
        let service = resources.service.insert(service);
        info!("Found calibrator service");

        let characteristics = self
            .step("characteristic discovery", cancelled, service.characteristics())
            .await?;
        debug!("Found {} characteristics", characteristics.len());
        let characteristic = characteristics
            .into_iter()
            .find(|characteristic| characteristic.uuid() == CALIBRATOR_UUID)
            .ok_or(ConnectError::CharacteristicNotFound)?;
        resources.characteristic = Some(characteristic);
        info!("Found calibrator characteristic");

        Ok(resources)
    }

    async fn step<T>(
        &self,
        step: &'static str,
        cancelled: &watch::Receiver<bool>,
        request: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, ConnectError> {
        tokio::select! {
            biased;
            _ = wait_closed(cancelled.clone()) => {
                debug!("{} abandoned", step);
                Err(ConnectError::Cancelled)
            }
            result = tokio::time::timeout(self.timeout, request) => match result {
                Ok(result) => result.map_err(|source| ConnectError::Transport { step, source }),
                Err(_) => Err(ConnectError::TimedOut {
                    step,
                    timeout: self.timeout,
                }),
            },
        }
    }

    /// Release the current connection, or abandon an attempt in progress.
    /// Never fails; calling it while disconnected does nothing.
    ///
    /// An abandoned attempt stops at its next platform step and returns
    /// [`ConnectError::Cancelled`]. Until it has unwound, new connects are
    /// rejected.
    pub fn disconnect(&self) {
        let mut slot = lock(&self.slot);
        let previous = std::mem::replace(&mut *slot, Slot::Disconnected);
        match previous {
            Slot::Connected(link) => {
                drop(slot);
                info!("Disconnecting from {}", link.handle.device_id);
                link.close();
                info!("Disconnected from device");
            }
            Slot::Connecting { id, cancel } => {
                *slot = Slot::Cancelling(id);
                drop(slot);
                info!("Abandoning connection attempt");
                cancel.send_replace(true);
            }
            Slot::Cancelling(id) => {
                *slot = Slot::Cancelling(id);
                debug!("Connection attempt already abandoned");
            }
            Slot::Disconnected => debug!("Already disconnected"),
        }
    }

    /// Read the characteristic value from the device
    pub async fn read(&self) -> Result<Vec<u8>, LinkError> {
        self.round_trip(|characteristic| async move { characteristic.read_value().await })
            .await
    }

    /// Write a frame to the characteristic
    pub async fn write(&self, frame: Frame) -> Result<(), LinkError> {
        debug!("Writing frame {:02X?}", frame);
        self.round_trip(move |characteristic| async move {
            characteristic.write_value(&frame).await
        })
        .await
    }

    async fn round_trip<T, F, Fut>(&self, request: F) -> Result<T, LinkError>
    where
        F: FnOnce(Arc<dyn GattCharacteristic>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let link = self.link().ok_or(LinkError::NotConnected)?;
        let characteristic = link.characteristic().ok_or(LinkError::NotConnected)?;
        let closed = link.closed.subscribe();

        tokio::select! {
            result = tokio::time::timeout(self.timeout, request(characteristic)) => match result {
                Ok(result) => result.map_err(|e| CommunicationError::from(e).into()),
                Err(_) => Err(CommunicationError::TimedOut(self.timeout).into()),
            },
            _ = wait_closed(closed) => {
                warn!("Request interrupted by disconnect");
                Err(CommunicationError::Interrupted.into())
            }
        }
    }

    fn link(&self) -> Option<Arc<Link>> {
        match &*lock(&self.slot) {
            Slot::Connected(link) => Some(link.clone()),
            _ => None,
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::{FakeCalibrator, DEVICE_ID};
    use uuid::Uuid;

    fn manager(fake: &FakeCalibrator) -> ConnectionManager {
        ConnectionManager::new(Arc::new(fake.clone()))
    }

    #[tokio::test]
    async fn test_connect_resolves_characteristic() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);

        let handle = manager.connect(DEVICE_ID).await.unwrap();

        assert_eq!(handle.device_id(), DEVICE_ID);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.current(), Some(handle));
        assert_eq!(fake.snapshot(|s| s.opens), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_device_id() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);

        assert_eq!(
            manager.connect("").await,
            Err(ConnectError::NoDeviceConfigured)
        );
        assert_eq!(fake.snapshot(|s| s.opens), 0);
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.reachable = false);
        let manager = manager(&fake);

        assert_eq!(
            manager.connect(DEVICE_ID).await,
            Err(ConnectError::DeviceUnreachable(DEVICE_ID.to_string()))
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_device_id_is_unreachable() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);

        let result = manager.connect("BluetoothLE#stale").await;

        assert!(matches!(result, Err(ConnectError::DeviceUnreachable(_))));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_missing_service_releases_peripheral() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.service_uuids = vec![Uuid::from_u128(0x180f)]);
        let manager = manager(&fake);

        assert_eq!(
            manager.connect(DEVICE_ID).await,
            Err(ConnectError::ServiceNotFound)
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(fake.snapshot(|s| s.released.clone()), vec!["peripheral"]);
    }

    #[tokio::test]
    async fn test_missing_characteristic_releases_service_and_peripheral() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.characteristic_uuids = vec![]);
        let manager = manager(&fake);

        assert_eq!(
            manager.connect(DEVICE_ID).await,
            Err(ConnectError::CharacteristicNotFound)
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            fake.snapshot(|s| s.released.clone()),
            vec!["session", "service", "peripheral"]
        );
    }

    #[tokio::test]
    async fn test_service_discovery_failure() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.fail_service_discovery = true);
        let manager = manager(&fake);

        let result = manager.connect(DEVICE_ID).await;

        assert!(matches!(
            result,
            Err(ConnectError::Transport {
                step: "service discovery",
                ..
            })
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(fake.snapshot(|s| s.released.clone()), vec!["peripheral"]);
    }

    #[tokio::test]
    async fn test_disconnect_releases_in_order() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();

        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            fake.snapshot(|s| s.released.clone()),
            vec!["characteristic", "session", "service", "peripheral"]
        );
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();

        manager.disconnect();
        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(fake.snapshot(|s| s.released.len()), 4);
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);

        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(fake.snapshot(|s| s.released.is_empty()));
    }

    #[tokio::test]
    async fn test_connect_again_to_same_device_is_noop() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);

        let first = manager.connect(DEVICE_ID).await.unwrap();
        let second = manager.connect(DEVICE_ID).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.snapshot(|s| s.opens), 1);
    }

    #[tokio::test]
    async fn test_connect_to_other_device_while_connected() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();

        assert_eq!(
            manager.connect("BluetoothLE#other").await,
            Err(ConnectError::AlreadyConnected(DEVICE_ID.to_string()))
        );
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_concurrent_connect_rejected() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.open_delay = Some(Duration::from_millis(100)));
        let manager = manager(&fake);

        let (first, second) = tokio::join!(manager.connect(DEVICE_ID), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(manager.state(), ConnectionState::Connecting);
            manager.connect(DEVICE_ID).await
        });

        assert!(first.is_ok());
        assert_eq!(second, Err(ConnectError::InProgress));
        assert_eq!(fake.snapshot(|s| s.opens), 1);
    }

    #[tokio::test]
    async fn test_disconnect_abandons_connect_in_progress() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.open_delay = Some(Duration::from_millis(100)));
        let manager = manager(&fake);

        let started = tokio::time::Instant::now();
        let (result, _) = tokio::join!(manager.connect(DEVICE_ID), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.disconnect();
        });

        assert_eq!(result, Err(ConnectError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(80));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(fake.snapshot(|s| s.released.is_empty()));
    }

    #[tokio::test]
    async fn test_reconnect_rejected_until_abandoned_attempt_unwinds() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.open_delay = Some(Duration::from_millis(200)));
        let manager = manager(&fake);

        let (first, second) = tokio::join!(manager.connect(DEVICE_ID), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.disconnect();
            assert_eq!(manager.state(), ConnectionState::Connecting);
            manager.connect(DEVICE_ID).await
        });

        assert_eq!(first, Err(ConnectError::Cancelled));
        assert_eq!(second, Err(ConnectError::InProgress));
        assert_eq!(fake.snapshot(|s| s.opens), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        fake.update(|s| s.open_delay = None);
        manager.connect(DEVICE_ID).await.unwrap();
        assert_eq!(fake.snapshot(|s| s.opens), 2);
    }

    #[tokio::test]
    async fn test_disconnect_during_service_discovery_releases_peripheral() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.stall_service_discovery = true);
        let manager = manager(&fake);

        let (result, _) = tokio::join!(manager.connect(DEVICE_ID), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.disconnect();
            manager.disconnect();
        });

        assert_eq!(result, Err(ConnectError::Cancelled));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(fake.snapshot(|s| s.released.clone()), vec!["peripheral"]);
    }

    #[tokio::test]
    async fn test_dropped_connect_returns_to_disconnected() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.open_delay = Some(Duration::from_secs(5)));
        let manager = manager(&fake);

        let result =
            tokio::time::timeout(Duration::from_millis(20), manager.connect(DEVICE_ID)).await;

        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.open_delay = Some(Duration::from_secs(5)));
        let manager =
            ConnectionManager::with_timeout(Arc::new(fake.clone()), Duration::from_millis(20));

        let result = manager.connect(DEVICE_ID).await;

        assert!(matches!(
            result,
            Err(ConnectError::TimedOut {
                step: "device lookup",
                ..
            })
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);

        assert_eq!(manager.read().await, Err(LinkError::NotConnected));
        assert_eq!(
            manager.write([0x01, 0x00]).await,
            Err(LinkError::NotConnected)
        );
        assert_eq!(fake.snapshot(|s| s.reads), 0);
        assert!(fake.snapshot(|s| s.writes.is_empty()));
    }

    #[tokio::test]
    async fn test_operations_after_disconnect_fail() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();
        manager.disconnect();

        assert_eq!(manager.read().await, Err(LinkError::NotConnected));
        assert_eq!(fake.snapshot(|s| s.reads), 0);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let fake = FakeCalibrator::new();
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();

        manager.write([0x01, 0x00]).await.unwrap();

        assert_eq!(fake.snapshot(|s| s.writes.clone()), vec![vec![0x01, 0x00]]);
        assert_eq!(manager.read().await.unwrap(), vec![0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_write_failure_status() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.fail_writes = true);
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();

        let result = manager.write([0x00, 0x00]).await;

        assert!(matches!(
            result,
            Err(LinkError::Communication(CommunicationError::Transport(
                TransportError::Status(_)
            )))
        ));
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_interrupts_read_in_flight() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.stall_reads = true);
        let manager = manager(&fake);
        manager.connect(DEVICE_ID).await.unwrap();

        let (result, _) = tokio::join!(manager.read(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.disconnect();
        });

        assert_eq!(
            result,
            Err(LinkError::Communication(CommunicationError::Interrupted))
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let fake = FakeCalibrator::new();
        fake.update(|s| s.stall_reads = true);
        let timeout = Duration::from_millis(30);
        let manager = ConnectionManager::with_timeout(Arc::new(fake.clone()), timeout);
        manager.connect(DEVICE_ID).await.unwrap();

        assert_eq!(
            manager.read().await,
            Err(LinkError::Communication(CommunicationError::TimedOut(
                timeout
            )))
        );
        assert!(manager.is_connected());
    }
}
