use crate::codec::Opcode;
use crate::manager::DeviceId;
use crate::session::HandleState;
use nusb::transfer::TransferError;
use std::io;
use thiserror::Error;

/// The primary error type for the `labbrick-lib` library.
#[derive(Error, Debug)]
pub enum LabBrickError {
    #[error("Lab Brick device not found. Is it still connected?")]
    DeviceNotFound,

    #[error("No device registered under id {0}")]
    UnknownDevice(DeviceId),

    #[error("Device {device} is {state}, operation not allowed")]
    InvalidState { device: DeviceId, state: HandleState },

    #[error("{quantity} value {value} outside [{min}, {max}]")]
    OutOfRange {
        quantity: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Timeout waiting for device response")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device rejected {opcode:?} (reason {reason:#04x})")]
    Nak { opcode: Opcode, reason: u8 },

    #[error("{operation} is not supported by {model}")]
    NotSupported { operation: &'static str, model: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LabBrickError {
    /// True for failures of the transport itself (I/O or USB transfer).
    pub fn is_io(&self) -> bool {
        matches!(self, LabBrickError::Io(_) | LabBrickError::Transfer(_))
    }

    /// Transport failures and timeouts leave the handle unusable until re-opened.
    pub(crate) fn degrades_handle(&self) -> bool {
        self.is_io() || matches!(self, LabBrickError::Timeout(_))
    }

    pub(crate) fn out_of_range(quantity: &'static str, value: impl Into<i64>, min: impl Into<i64>, max: impl Into<i64>) -> Self {
        LabBrickError::OutOfRange {
            quantity,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LabBrickError>;
