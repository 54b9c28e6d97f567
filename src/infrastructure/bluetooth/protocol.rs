//! Spectral Calibrator Protocol
//!
//! This module contains the wire format used to command the calibrator.
//! The device exposes a single GATT characteristic that is both the command
//! sink and the status source, and every payload on it is a fixed 2-byte frame.

use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

/// Calibrator BLE Service UUID.
/// The read/write characteristic inside the service carries the same UUID.
pub const CALIBRATOR_UUID: Uuid = Uuid::from_u128(0xf2d9de7d_6a59_40a3_bb7f_0c31970529bf);

/// Length of every command and status frame
pub const FRAME_LEN: usize = 2;

/// Upper bound of the duty cycle argument, in percent
pub const MAX_DUTY_CYCLE: u8 = 100;

/// Command opcodes understood by the firmware (byte 0 of a frame)
pub mod opcode {
    /// Turn the lamp off, aborting any running cycle
    pub const OFF: u8 = 0x00;
    /// Turn the lamp on steadily
    pub const ON: u8 = 0x01;
    /// Start an on/off cycle, byte 1 is the duty cycle
    pub const CYCLE: u8 = 0x02;
}

/// A raw frame: `[opcode, argument]`
pub type Frame = [u8; FRAME_LEN];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected status length: {0} (expected 2)")]
    UnexpectedLength(usize),
    #[error("duty cycle must be an integer between 0 and 100, got {0}")]
    DutyCycleOutOfRange(i64),
}

/// Percentage of each period the lamp stays lit during a cycling run.
///
/// Always within `0..=100`; the only way to build one is through the
/// validating constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DutyCycle(u8);

impl DutyCycle {
    pub fn new(percent: u8) -> Result<Self, CodecError> {
        if percent > MAX_DUTY_CYCLE {
            return Err(CodecError::DutyCycleOutOfRange(i64::from(percent)));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for DutyCycle {
    type Error = CodecError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| CodecError::DutyCycleOutOfRange(value))
            .and_then(Self::new)
    }
}

/// High level switch commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    Off,
    On,
    Cycle(DutyCycle),
}

impl SwitchCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Off => opcode::OFF,
            Self::On => opcode::ON,
            Self::Cycle(_) => opcode::CYCLE,
        }
    }

    /// The argument byte; zero for commands that take none
    pub fn argument(&self) -> u8 {
        match self {
            Self::Cycle(duty) => duty.percent(),
            Self::Off | Self::On => 0x00,
        }
    }
}

/// Encode a command into its wire frame
pub fn encode(command: SwitchCommand) -> Frame {
    [command.opcode(), command.argument()]
}

/// Decode a status payload read back from the characteristic.
///
/// Returns `true` when the device reports itself lit. A running cycle is
/// reported the same way as a steady "on", so callers cannot tell them apart.
pub fn decode_status(payload: &[u8]) -> Result<bool, CodecError> {
    trace!("Raw status: {:02X?}", payload);

    match payload {
        [state, _argument] => Ok(*state != 0),
        _ => Err(CodecError::UnexpectedLength(payload.len())),
    }
}
