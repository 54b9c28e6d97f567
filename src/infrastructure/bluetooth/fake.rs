//! In-memory calibrator and device watcher for unit tests

use crate::infrastructure::bluetooth::protocol::{opcode, CALIBRATOR_UUID};
use crate::infrastructure::bluetooth::transport::{
    DeviceWatcher, DiscoveryBackend, GattBackend, GattCharacteristic, GattPeripheral, GattService,
    TransportError, WatcherEvent,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const DEVICE_ID: &str = "BluetoothLE#BluetoothLE00:11:22:33:44:55-aa:bb:cc:dd:ee:ff";

pub struct FakeState {
    pub reachable: bool,
    pub service_uuids: Vec<Uuid>,
    pub characteristic_uuids: Vec<Uuid>,
    pub status: Vec<u8>,
    pub writes: Vec<Vec<u8>>,
    pub reads: usize,
    pub opens: usize,
    pub open_delay: Option<Duration>,
    pub fail_service_discovery: bool,
    pub stall_service_discovery: bool,
    pub fail_writes: bool,
    pub fail_reads: bool,
    pub stall_reads: bool,
    pub released: Vec<&'static str>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            reachable: true,
            service_uuids: vec![Uuid::from_u128(0x1800), CALIBRATOR_UUID],
            characteristic_uuids: vec![CALIBRATOR_UUID],
            status: vec![0x00, 0x00],
            writes: Vec::new(),
            reads: 0,
            opens: 0,
            open_delay: None,
            fail_service_discovery: false,
            stall_service_discovery: false,
            fail_writes: false,
            fail_reads: false,
            stall_reads: false,
            released: Vec::new(),
        }
    }
}

/// A calibrator whose firmware reports "on" for any non-zero opcode
#[derive(Clone, Default)]
pub struct FakeCalibrator {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn snapshot<R>(&self, f: impl FnOnce(&FakeState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl GattBackend for FakeCalibrator {
    async fn open_peripheral(
        &self,
        device_id: &str,
    ) -> Result<Option<Box<dyn GattPeripheral>>, TransportError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reachable = self.snapshot(|s| s.reachable);
        if !reachable || device_id != DEVICE_ID {
            return Ok(None);
        }
        Ok(Some(Box::new(FakePeripheral {
            state: self.state.clone(),
        })))
    }
}

struct FakePeripheral {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl GattPeripheral for FakePeripheral {
    async fn services(&self) -> Result<Vec<Box<dyn GattService>>, TransportError> {
        let stall = self.state.lock().unwrap().stall_service_discovery;
        if stall {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        if state.fail_service_discovery {
            return Err(TransportError::Status("Unreachable".to_string()));
        }
        Ok(state
            .service_uuids
            .iter()
            .map(|uuid| {
                Box::new(FakeService {
                    uuid: *uuid,
                    state: self.state.clone(),
                }) as Box<dyn GattService>
            })
            .collect())
    }

    fn close(&self) {
        self.state.lock().unwrap().released.push("peripheral");
    }
}

struct FakeService {
    uuid: Uuid,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl GattService for FakeService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn characteristics(&self) -> Result<Vec<Arc<dyn GattCharacteristic>>, TransportError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .characteristic_uuids
            .iter()
            .map(|uuid| {
                Arc::new(FakeCharacteristic {
                    uuid: *uuid,
                    state: self.state.clone(),
                }) as Arc<dyn GattCharacteristic>
            })
            .collect())
    }

    fn close_session(&self) {
        self.state.lock().unwrap().released.push("session");
    }

    fn close(&self) {
        self.state.lock().unwrap().released.push("service");
    }
}

struct FakeCharacteristic {
    uuid: Uuid,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read_value(&self) -> Result<Vec<u8>, TransportError> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            state.reads += 1;
            if state.fail_reads {
                return Err(TransportError::Status("Unreachable".to_string()));
            }
            state.stall_reads
        };
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(self.state.lock().unwrap().status.clone())
    }

    async fn write_value(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(TransportError::Status("ProtocolError".to_string()));
        }
        state.writes.push(payload.to_vec());
        let lit = payload.first().is_some_and(|op| *op != opcode::OFF);
        state.status = vec![u8::from(lit), 0x00];
        Ok(())
    }
}

impl Drop for FakeCharacteristic {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.released.push("characteristic");
        }
    }
}

/// Replays a fixed list of watcher events as soon as it is started
#[derive(Clone, Default)]
pub struct ScriptedDiscovery {
    pub script: Vec<WatcherEvent>,
    pub fail_create: bool,
    pub fail_start: bool,
    pub stops: Arc<AtomicUsize>,
}

impl ScriptedDiscovery {
    pub fn new(script: Vec<WatcherEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl DiscoveryBackend for ScriptedDiscovery {
    fn create_watcher(&self) -> Result<Box<dyn DeviceWatcher>, TransportError> {
        if self.fail_create {
            return Err(TransportError::Platform("Bluetooth radio is off".to_string()));
        }
        Ok(Box::new(ScriptedWatcher {
            script: self.script.clone(),
            fail_start: self.fail_start,
            stops: self.stops.clone(),
            events: None,
        }))
    }
}

struct ScriptedWatcher {
    script: Vec<WatcherEvent>,
    fail_start: bool,
    stops: Arc<AtomicUsize>,
    events: Option<mpsc::UnboundedSender<WatcherEvent>>,
}

impl DeviceWatcher for ScriptedWatcher {
    fn start(&mut self, events: mpsc::UnboundedSender<WatcherEvent>) -> Result<(), TransportError> {
        if self.fail_start {
            return Err(TransportError::Platform("watcher aborted".to_string()));
        }
        for event in self.script.drain(..) {
            let _ = events.send(event);
        }
        self.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events = None;
        Ok(())
    }
}
