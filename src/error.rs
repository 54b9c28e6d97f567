use crate::infrastructure::bluetooth::connection::ConnectError;
use crate::infrastructure::bluetooth::protocol::CodecError;
use crate::infrastructure::bluetooth::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// A read or write round trip that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommunicationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device did not answer within {0:?}")]
    TimedOut(Duration),
    #[error("connection was closed while the request was in flight")]
    Interrupted,
    #[error("malformed status: {0}")]
    Malformed(#[from] CodecError),
}

/// Errors surfaced to users of the calibrator switch
#[derive(Debug, Error)]
pub enum CalibratorError {
    #[error("{operation}: invalid value {value} (expected {expected})")]
    InvalidValue {
        operation: &'static str,
        value: String,
        expected: String,
    },
    #[error("{0}: not connected")]
    NotConnected(&'static str),
    #[error("failed to connect: {0}")]
    ConnectionFailed(#[from] ConnectError),
    #[error("{operation}: failed to communicate with the device: {source}")]
    DeviceCommunication {
        operation: &'static str,
        #[source]
        source: CommunicationError,
    },
    #[error("{0} is not implemented by this driver")]
    NotImplemented(&'static str),
    #[error("action {0} is not implemented by this driver")]
    ActionNotImplemented(String),
}

impl CalibratorError {
    pub fn invalid_value(
        operation: &'static str,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            operation,
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    pub fn communication(operation: &'static str, source: impl Into<CommunicationError>) -> Self {
        Self::DeviceCommunication {
            operation,
            source: source.into(),
        }
    }
}
