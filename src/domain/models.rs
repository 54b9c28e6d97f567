use serde::{Deserialize, Serialize};

/// A BLE peripheral seen during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Opaque platform device identifier
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceFound(DeviceRecord),
    DeviceLost(String),
    EnumerationComplete,
    Stopped,
}
