//! Switch device surface consumed by host integrations.
//!
//! Mirrors a "switch" device in an observatory automation API: one boolean
//! switch with an analog view, plus named custom actions. Every call blocks
//! until the device has answered.

use crate::error::CalibratorError;

pub const DEVICE_NAME: &str = "Spectral Calibrator";
pub const SWITCH_DESCRIPTION: &str = "Turns the spectral calibrator ON or OFF";
pub const INTERFACE_VERSION: i16 = 2;

/// Custom action that starts an on/off cycling run.
/// The parameter is an integer duty cycle between 0 and 100.
pub const ACTION_SET_DUTY_CYCLE: &str = "SetDutyCycle";

pub trait SwitchDevice {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn driver_info(&self) -> String;
    fn driver_version(&self) -> String;
    fn interface_version(&self) -> i16;

    fn connected(&self) -> bool;

    /// `true` connects to the configured device and waits for the handshake;
    /// `false` releases the connection. Setting the current value is a no-op.
    fn set_connected(&self, connected: bool) -> Result<(), CalibratorError>;

    fn supported_actions(&self) -> Vec<String>;
    fn action(&self, name: &str, parameters: &str) -> Result<String, CalibratorError>;

    fn command_blind(&self, command: &str, raw: bool) -> Result<(), CalibratorError>;
    fn command_bool(&self, command: &str, raw: bool) -> Result<bool, CalibratorError>;
    fn command_string(&self, command: &str, raw: bool) -> Result<String, CalibratorError>;

    fn max_switch(&self) -> i16;
    fn get_switch_name(&self, id: i16) -> Result<String, CalibratorError>;
    fn set_switch_name(&self, id: i16, name: &str) -> Result<(), CalibratorError>;
    fn get_switch_description(&self, id: i16) -> Result<String, CalibratorError>;
    fn can_write(&self, id: i16) -> Result<bool, CalibratorError>;

    fn get_switch(&self, id: i16) -> Result<bool, CalibratorError>;
    fn set_switch(&self, id: i16, state: bool) -> Result<(), CalibratorError>;

    fn min_switch_value(&self, id: i16) -> Result<f64, CalibratorError>;
    fn max_switch_value(&self, id: i16) -> Result<f64, CalibratorError>;
    fn switch_step(&self, id: i16) -> Result<f64, CalibratorError>;
    fn get_switch_value(&self, id: i16) -> Result<f64, CalibratorError>;
    fn set_switch_value(&self, id: i16, value: f64) -> Result<(), CalibratorError>;
}
