//! Error types for the BMI088 accelerometer acquisition engine

use std::time::Duration;

use embedded_hal::spi::ErrorKind;
use thiserror::Error;

use crate::registers::Register;

/// Transport-level failure reported by the SPI device
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("SPI bus error: {0:?}")]
pub struct BusError(pub ErrorKind);

impl BusError {
    /// Classify any `embedded-hal` SPI error
    pub fn from_spi<E: embedded_hal::spi::Error>(err: E) -> Self {
        BusError(err.kind())
    }
}

/// Error type for accelerometer operations
#[derive(Error, Debug)]
pub enum AccelError {
    /// SPI transport error
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Invalid ACC_CHIP_ID response
    #[error("Invalid ACC_CHIP_ID response: expected 0x1E, got 0x{0:02X}")]
    InvalidChipId(u8),

    /// Soft reset never settled
    #[error("Initialization timed out after {0:?}")]
    InitializationTimeout(Duration),

    /// Register read back with unexpected bits
    #[error("Register {register:?} mismatch: read 0x{actual:02X}, expected set 0x{set_bits:02X} clear 0x{clear_bits:02X}")]
    ConfigMismatch {
        register: Register,
        actual: u8,
        set_bits: u8,
        clear_bits: u8,
    },

    /// Bulk transfer returned a buffer of the wrong size
    #[error("Data transfer error: expected {expected} bytes, transferred {actual}")]
    TransferError { expected: usize, actual: usize },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Sample storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The acquisition thread is gone
    #[error("Acquisition task is not running")]
    TaskStopped,
}

/// Result type for accelerometer operations
pub type Result<T> = std::result::Result<T, AccelError>;
