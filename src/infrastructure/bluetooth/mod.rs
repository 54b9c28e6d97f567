//! Bluetooth Module
//!
//! Provides BLE communication with the spectral calibrator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  CalibratorController                    │
//! │   (switch state machine - domain::calibrator)            │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Device  │  │ - Resolve  │  │ - UUID   │
//! │   watcher │  │ - GATT     │  │ - Frames │
//! │           │  │   access   │  │ - Status │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       └──────┬───────┘
//!              ▼
//!      ┌──────────────┐
//!      │  Transport   │
//!      │ (WinRT GATT) │
//!      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Calibrator UUID, command frames, and status parsing
//! - [`scanner`] - Unpaired BLE device discovery
//! - [`connection`] - Device resolution, GATT access, and teardown
//! - [`transport`] - Platform traits the other modules are written against
//! - `winrt` - Windows Runtime implementation of the transport (Windows only)

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub mod fake;
