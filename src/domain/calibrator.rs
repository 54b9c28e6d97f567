//! Calibrator switch state machine.
//!
//! The lamp is `Off`, `On`, or `Cycling(duty)`, but the firmware only reports
//! lit or not lit. A running cycle therefore reads back as "on" until the
//! device finishes it, and this controller reports exactly what the device
//! says instead of remembering which command it last sent.

use crate::error::CalibratorError;
use crate::infrastructure::bluetooth::connection::{ConnectionHandle, ConnectionManager, LinkError};
use crate::infrastructure::bluetooth::protocol::{self, DutyCycle, SwitchCommand};
use tracing::{debug, info};

/// Number of switches exposed by the calibrator
pub const MAX_SWITCH: i16 = 1;

pub const SWITCH_ON_VALUE: f64 = 1.0;
pub const SWITCH_OFF_VALUE: f64 = 0.0;

/// Largest value `set_switch_value` accepts. Hosts that drive the switch as
/// a percentage may send anything up to 100; it still only means "on".
pub const SWITCH_VALUE_LIMIT: f64 = 100.0;

pub struct CalibratorController {
    connection: ConnectionManager,
}

impl CalibratorController {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, CalibratorError> {
        Ok(self.connection.connect(device_id).await?)
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Whether the device currently reports itself lit
    pub async fn get_switch(&self, id: i16) -> Result<bool, CalibratorError> {
        const OPERATION: &str = "GetSwitch";
        validate_id(OPERATION, id)?;

        let payload = self
            .connection
            .read()
            .await
            .map_err(|e| link_failure(OPERATION, e))?;
        let lit = protocol::decode_status(&payload)
            .map_err(|e| CalibratorError::communication(OPERATION, e))?;
        debug!("Device reports {}", if lit { "on" } else { "off" });
        Ok(lit)
    }

    pub async fn set_switch(&self, id: i16, state: bool) -> Result<(), CalibratorError> {
        const OPERATION: &str = "SetSwitch";
        validate_id(OPERATION, id)?;

        let command = if state {
            SwitchCommand::On
        } else {
            SwitchCommand::Off
        };
        self.send(OPERATION, command).await
    }

    /// Start an on/off cycling run
    pub async fn set_duty_cycle(&self, percent: u8) -> Result<(), CalibratorError> {
        const OPERATION: &str = "SetDutyCycle";
        let duty = DutyCycle::new(percent)
            .map_err(|_| CalibratorError::invalid_value(OPERATION, percent, "0 to 100"))?;

        self.send(OPERATION, SwitchCommand::Cycle(duty)).await
    }

    pub async fn get_switch_value(&self, id: i16) -> Result<f64, CalibratorError> {
        validate_id("GetSwitchValue", id)?;
        let lit = self.get_switch(id).await?;
        Ok(if lit { SWITCH_ON_VALUE } else { SWITCH_OFF_VALUE })
    }

    /// Any non-zero value up to [`SWITCH_VALUE_LIMIT`] turns the lamp on
    pub async fn set_switch_value(&self, id: i16, value: f64) -> Result<(), CalibratorError> {
        const OPERATION: &str = "SetSwitchValue";
        validate_id(OPERATION, id)?;
        if !value.is_finite() || !(SWITCH_OFF_VALUE..=SWITCH_VALUE_LIMIT).contains(&value) {
            return Err(CalibratorError::invalid_value(
                OPERATION,
                value,
                format!("Switch({id}) range {SWITCH_OFF_VALUE} to {SWITCH_VALUE_LIMIT}"),
            ));
        }

        self.set_switch(id, value != SWITCH_OFF_VALUE).await
    }

    async fn send(
        &self,
        operation: &'static str,
        command: SwitchCommand,
    ) -> Result<(), CalibratorError> {
        info!("{}: sending {:?}", operation, command);
        self.connection
            .write(protocol::encode(command))
            .await
            .map_err(|e| link_failure(operation, e))
    }
}

/// Reject any switch id other than 0
pub fn validate_id(operation: &'static str, id: i16) -> Result<(), CalibratorError> {
    if !(0..MAX_SWITCH).contains(&id) {
        debug!(
            "{}: switch {} not available, range is 0 to {}",
            operation,
            id,
            MAX_SWITCH - 1
        );
        return Err(CalibratorError::invalid_value(
            operation,
            id,
            format!("0 to {}", MAX_SWITCH - 1),
        ));
    }
    Ok(())
}

fn link_failure(operation: &'static str, error: LinkError) -> CalibratorError {
    match error {
        LinkError::NotConnected => CalibratorError::NotConnected(operation),
        LinkError::Communication(source) => CalibratorError::communication(operation, source),
    }
}
