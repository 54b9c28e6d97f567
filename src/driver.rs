//! Blocking calibrator driver.
//!
//! Wraps the async [`CalibratorController`] behind the synchronous
//! [`SwitchDevice`] surface. Each call runs its transport round trips to
//! completion on a private runtime before returning, so a state change is
//! visible on the device as soon as the call returns.

use crate::domain::calibrator::{
    validate_id, CalibratorController, MAX_SWITCH, SWITCH_OFF_VALUE, SWITCH_ON_VALUE,
};
use crate::domain::models::DeviceRecord;
use crate::domain::settings::SettingsService;
use crate::domain::switch::{
    SwitchDevice, ACTION_SET_DUTY_CYCLE, DEVICE_NAME, INTERFACE_VERSION, SWITCH_DESCRIPTION,
};
use crate::error::CalibratorError;
use crate::infrastructure::bluetooth::connection::{ConnectError, ConnectionManager};
use crate::infrastructure::bluetooth::protocol::DutyCycle;
use crate::infrastructure::bluetooth::transport::GattBackend;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub struct SpectralCalibrator {
    controller: CalibratorController,
    settings: Arc<Mutex<SettingsService>>,
    runtime: tokio::runtime::Runtime,
}

impl SpectralCalibrator {
    pub fn new(
        backend: Arc<dyn GattBackend>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> anyhow::Result<Self> {
        let timeout = {
            let settings = settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            settings.get().command_timeout()
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            controller: CalibratorController::new(ConnectionManager::with_timeout(
                backend, timeout,
            )),
            settings,
            runtime,
        })
    }

    pub fn controller(&self) -> &CalibratorController {
        &self.controller
    }

    /// The device `set_connected(true)` will connect to
    pub fn selected_device(&self) -> Option<DeviceRecord> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get()
            .device()
    }

    /// Remember and persist a new device. Takes effect on the next connect.
    pub fn select_device(&self, device: &DeviceRecord) -> anyhow::Result<()> {
        if self.connected() {
            warn!("Device changed while connected; reconnect to use it");
        }
        self.settings
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))?
            .select_device(device)
    }

    /// Start an on/off cycling run at `percent` duty cycle
    pub fn set_duty_cycle(&self, percent: u8) -> Result<(), CalibratorError> {
        self.block_on(self.controller.set_duty_cycle(percent))
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn check_connected(&self, operation: &'static str) -> Result<(), CalibratorError> {
        if !self.connected() {
            return Err(CalibratorError::NotConnected(operation));
        }
        Ok(())
    }
}

impl SwitchDevice for SpectralCalibrator {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn description(&self) -> &str {
        DEVICE_NAME
    }

    fn driver_info(&self) -> String {
        format!("{} Version {}", DEVICE_NAME, self.driver_version())
    }

    fn driver_version(&self) -> String {
        format!(
            "{}.{}",
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR")
        )
    }

    fn interface_version(&self) -> i16 {
        INTERFACE_VERSION
    }

    fn connected(&self) -> bool {
        self.controller.is_connected()
    }

    fn set_connected(&self, connected: bool) -> Result<(), CalibratorError> {
        if connected == self.connected() {
            return Ok(());
        }

        if !connected {
            self.controller.disconnect();
            return Ok(());
        }

        let device = self
            .selected_device()
            .ok_or(ConnectError::NoDeviceConfigured)?;
        info!("Connecting to {} ({})", device.name, device.id);
        self.block_on(self.controller.connect(&device.id))?;
        Ok(())
    }

    fn supported_actions(&self) -> Vec<String> {
        vec![ACTION_SET_DUTY_CYCLE.to_string()]
    }

    fn action(&self, name: &str, parameters: &str) -> Result<String, CalibratorError> {
        if !name.eq_ignore_ascii_case(ACTION_SET_DUTY_CYCLE) {
            warn!("Action {} is not implemented by this driver", name);
            return Err(CalibratorError::ActionNotImplemented(name.to_string()));
        }

        let value: i64 = parameters.trim().parse().map_err(|_| {
            CalibratorError::invalid_value(
                ACTION_SET_DUTY_CYCLE,
                format!("'{parameters}'"),
                "an integer",
            )
        })?;
        let duty = DutyCycle::try_from(value).map_err(|_| {
            CalibratorError::invalid_value(ACTION_SET_DUTY_CYCLE, value, "0 to 100")
        })?;

        self.set_duty_cycle(duty.percent())?;
        Ok(String::new())
    }

    fn command_blind(&self, _command: &str, _raw: bool) -> Result<(), CalibratorError> {
        self.check_connected("CommandBlind")?;
        Err(CalibratorError::NotImplemented("CommandBlind"))
    }

    fn command_bool(&self, _command: &str, _raw: bool) -> Result<bool, CalibratorError> {
        self.check_connected("CommandBool")?;
        Err(CalibratorError::NotImplemented("CommandBool"))
    }

    fn command_string(&self, _command: &str, _raw: bool) -> Result<String, CalibratorError> {
        self.check_connected("CommandString")?;
        Err(CalibratorError::NotImplemented("CommandString"))
    }

    fn max_switch(&self) -> i16 {
        MAX_SWITCH
    }

    fn get_switch_name(&self, id: i16) -> Result<String, CalibratorError> {
        validate_id("GetSwitchName", id)?;
        Ok(DEVICE_NAME.to_string())
    }

    fn set_switch_name(&self, id: i16, _name: &str) -> Result<(), CalibratorError> {
        validate_id("SetSwitchName", id)?;
        Err(CalibratorError::NotImplemented("SetSwitchName"))
    }

    fn get_switch_description(&self, id: i16) -> Result<String, CalibratorError> {
        validate_id("GetSwitchDescription", id)?;
        Ok(SWITCH_DESCRIPTION.to_string())
    }

    fn can_write(&self, id: i16) -> Result<bool, CalibratorError> {
        validate_id("CanWrite", id)?;
        Ok(true)
    }

    fn get_switch(&self, id: i16) -> Result<bool, CalibratorError> {
        self.block_on(self.controller.get_switch(id))
    }

    fn set_switch(&self, id: i16, state: bool) -> Result<(), CalibratorError> {
        self.block_on(self.controller.set_switch(id, state))
    }

    fn min_switch_value(&self, id: i16) -> Result<f64, CalibratorError> {
        validate_id("MinSwitchValue", id)?;
        Ok(SWITCH_OFF_VALUE)
    }

    fn max_switch_value(&self, id: i16) -> Result<f64, CalibratorError> {
        validate_id("MaxSwitchValue", id)?;
        Ok(SWITCH_ON_VALUE)
    }

    fn switch_step(&self, id: i16) -> Result<f64, CalibratorError> {
        validate_id("SwitchStep", id)?;
        Ok(SWITCH_ON_VALUE - SWITCH_OFF_VALUE)
    }

    fn get_switch_value(&self, id: i16) -> Result<f64, CalibratorError> {
        self.block_on(self.controller.get_switch_value(id))
    }

    fn set_switch_value(&self, id: i16, value: f64) -> Result<(), CalibratorError> {
        self.block_on(self.controller.set_switch_value(id, value))
    }
}

impl Drop for SpectralCalibrator {
    fn drop(&mut self) {
        self.controller.disconnect();
    }
}
