//! BLE Scanner Module
//!
//! Enumerates nearby, unpaired BLE peripherals so an operator can pick the
//! calibrator. Discovery is advisory: nothing here is needed to connect to a
//! device whose identifier is already known.

use crate::domain::models::{DeviceRecord, DiscoveryEvent};
use crate::infrastructure::bluetooth::transport::{DeviceWatcher, DiscoveryBackend, WatcherEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Starts discovery sessions against the platform watcher
pub struct DeviceDirectory {
    backend: Arc<dyn DiscoveryBackend>,
}

impl DeviceDirectory {
    pub fn new(backend: Arc<dyn DiscoveryBackend>) -> Self {
        Self { backend }
    }

    /// Start a discovery session. Returns immediately; results arrive
    /// through [`DiscoverySession::next_event`].
    ///
    /// A watcher that cannot be created or started yields a session that
    /// reports `Stopped` with no devices.
    pub fn start_discovery(&self) -> DiscoverySession {
        let (sender, events) = mpsc::unbounded_channel();

        let watcher = match self.backend.create_watcher() {
            Ok(mut watcher) => match watcher.start(sender) {
                Ok(()) => {
                    info!("Scanning for BLE devices...");
                    Some(watcher)
                }
                Err(e) => {
                    warn!("Failed to start device watcher: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to create device watcher: {}", e);
                None
            }
        };

        DiscoverySession::new(watcher, events)
    }
}

/// One enumeration pass.
///
/// Keeps the set of devices seen so far: devices without a display name are
/// never surfaced, and a repeated add for a known identifier is ignored.
pub struct DiscoverySession {
    watcher: Option<Box<dyn DeviceWatcher>>,
    events: mpsc::UnboundedReceiver<WatcherEvent>,
    devices: BTreeMap<String, String>,
    finished: bool,
}

impl DiscoverySession {
    fn new(
        watcher: Option<Box<dyn DeviceWatcher>>,
        mut events: mpsc::UnboundedReceiver<WatcherEvent>,
    ) -> Self {
        if watcher.is_none() {
            events.close();
        }
        Self {
            watcher,
            events,
            devices: BTreeMap::new(),
            finished: false,
        }
    }

    /// Next discovery event. `Stopped` is always the last event, after which
    /// this returns `None`.
    pub async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        while !self.finished {
            let Some(event) = self.events.recv().await else {
                self.finished = true;
                return Some(DiscoveryEvent::Stopped);
            };
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
        None
    }

    fn apply(&mut self, event: WatcherEvent) -> Option<DiscoveryEvent> {
        match event {
            WatcherEvent::Added { id, name } => {
                if name.trim().is_empty() || self.devices.contains_key(&id) {
                    return None;
                }
                debug!("Found device {} ({})", name, id);
                self.devices.insert(id.clone(), name.clone());
                Some(DiscoveryEvent::DeviceFound(DeviceRecord { id, name }))
            }
            WatcherEvent::Removed { id } => {
                self.devices.remove(&id)?;
                debug!("Lost device {}", id);
                Some(DiscoveryEvent::DeviceLost(id))
            }
            WatcherEvent::EnumerationCompleted => Some(DiscoveryEvent::EnumerationComplete),
            WatcherEvent::Stopped => {
                self.finished = true;
                Some(DiscoveryEvent::Stopped)
            }
        }
    }

    /// Run until the initial enumeration completes, then stop watching and
    /// return what was found, sorted by name.
    pub async fn collect_devices(&mut self) -> Vec<DeviceRecord> {
        while let Some(event) = self.next_event().await {
            if matches!(
                event,
                DiscoveryEvent::EnumerationComplete | DiscoveryEvent::Stopped
            ) {
                break;
            }
        }
        self.stop();
        self.devices()
    }

    /// Devices currently known to this session, sorted by name
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self
            .devices
            .iter()
            .map(|(id, name)| DeviceRecord {
                id: id.clone(),
                name: name.clone(),
            })
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        devices
    }

    /// Whether the platform watcher has been released
    pub fn is_stopped(&self) -> bool {
        self.watcher.is_none()
    }

    /// Stop the platform watcher. Events already delivered can still be
    /// read, followed by `Stopped`. Calling this again does nothing.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            if let Err(e) = watcher.stop() {
                debug!("Device watcher did not stop cleanly: {}", e);
            }
        }
        self.events.close();
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        self.stop();
    }
}
