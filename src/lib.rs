//! Driver for a BLE spectral-calibration lamp exposed as a single switch.

pub mod domain;
pub mod driver;
pub mod error;
pub mod infrastructure;

pub use driver::SpectralCalibrator;
pub use error::CalibratorError;
