//! Acquisition configuration and the register table derived from it

use std::time::Duration;

use crate::error::{AccelError, Result};
use crate::registers::*;
use crate::state::RecoveryPolicy;
use crate::verifier::RegisterConfigEntry;

/// Measurement range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelRange {
    G3,
    G6,
    G12,
    G24,
}

impl AccelRange {
    /// ACC_RANGE register code
    pub const fn code(self) -> u8 {
        match self {
            AccelRange::G3 => 0x00,
            AccelRange::G6 => 0x01,
            AccelRange::G12 => 0x02,
            AccelRange::G24 => 0x03,
        }
    }

    /// Full-scale range in g: 2^(code + 1) * 1.5
    pub fn g(self) -> f32 {
        (1u32 << (self.code() + 1)) as f32 * 1.5
    }

    /// m/s^2 per LSB
    pub fn scale(self) -> f32 {
        CONSTANTS_ONE_G * self.g() / 32768.0
    }

    pub fn from_g(g: u32) -> Result<Self> {
        match g {
            3 => Ok(AccelRange::G3),
            6 => Ok(AccelRange::G6),
            12 => Ok(AccelRange::G12),
            24 => Ok(AccelRange::G24),
            _ => Err(AccelError::InvalidParameter(format!(
                "Range must be 3, 6, 12 or 24 g, got {}",
                g
            ))),
        }
    }
}

/// Output data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDataRate {
    Hz12_5,
    Hz25,
    Hz50,
    Hz100,
    Hz200,
    Hz400,
    Hz800,
    Hz1600,
}

impl OutputDataRate {
    /// ACC_CONF bits 3:0
    pub const fn code(self) -> u8 {
        match self {
            OutputDataRate::Hz12_5 => 0x05,
            OutputDataRate::Hz25 => 0x06,
            OutputDataRate::Hz50 => 0x07,
            OutputDataRate::Hz100 => 0x08,
            OutputDataRate::Hz200 => 0x09,
            OutputDataRate::Hz400 => 0x0A,
            OutputDataRate::Hz800 => 0x0B,
            OutputDataRate::Hz1600 => 0x0C,
        }
    }

    pub fn hz(self) -> f32 {
        match self {
            OutputDataRate::Hz12_5 => 12.5,
            OutputDataRate::Hz25 => 25.0,
            OutputDataRate::Hz50 => 50.0,
            OutputDataRate::Hz100 => 100.0,
            OutputDataRate::Hz200 => 200.0,
            OutputDataRate::Hz400 => 400.0,
            OutputDataRate::Hz800 => 800.0,
            OutputDataRate::Hz1600 => 1600.0,
        }
    }

    /// Time between two consecutive FIFO samples
    pub fn sample_interval(self) -> Duration {
        Duration::from_nanos((1e9 / self.hz() as f64) as u64)
    }

    pub fn from_hz(hz: u32) -> Result<Self> {
        match hz {
            12 | 13 => Ok(OutputDataRate::Hz12_5),
            25 => Ok(OutputDataRate::Hz25),
            50 => Ok(OutputDataRate::Hz50),
            100 => Ok(OutputDataRate::Hz100),
            200 => Ok(OutputDataRate::Hz200),
            400 => Ok(OutputDataRate::Hz400),
            800 => Ok(OutputDataRate::Hz800),
            1600 => Ok(OutputDataRate::Hz1600),
            _ => Err(AccelError::InvalidParameter(format!(
                "Output data rate must be one of 12.5, 25, 50, 100, 200, 400, 800, 1600 Hz, got {}",
                hz
            ))),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub range: AccelRange,
    pub odr: OutputDataRate,
    /// How often the FIFO is drained
    pub transfer_rate_hz: u32,
    /// Frames the device FIFO can hold
    pub fifo_capacity: usize,
    /// Largest batch the consumer accepts
    pub consumer_capacity: usize,
    /// Whether INT1 is wired to a data-ready source
    pub data_ready: bool,
    /// Minimum spacing of round-robin register checks (zero: every tick)
    pub register_check_interval: Duration,
    pub temperature_interval: Duration,
    pub reset_settle: Duration,
    pub reset_timeout: Duration,
    /// Upper bound for [`crate::Bmi088Accel::initialize`]
    pub init_timeout: Duration,
    pub max_configure_attempts: u32,
    pub max_consecutive_bus_errors: u32,
    pub max_consecutive_bad_transfers: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            range: AccelRange::G24,
            odr: OutputDataRate::Hz1600,
            transfer_rate_hz: 400,
            fifo_capacity: FIFO_MAX_SAMPLES,
            consumer_capacity: 32,
            data_ready: false,
            register_check_interval: Duration::from_millis(100),
            temperature_interval: Duration::from_secs(1),
            reset_settle: Duration::from_millis(1),
            reset_timeout: Duration::from_millis(1000),
            init_timeout: Duration::from_secs(3),
            max_configure_attempts: 10,
            max_consecutive_bus_errors: 10,
            max_consecutive_bad_transfers: 3,
        }
    }
}

impl AcquisitionConfig {
    /// Check ranges before the engine touches the bus
    pub fn validate(&self) -> Result<()> {
        let odr_hz = self.odr.hz() as u32;
        if self.transfer_rate_hz == 0 || self.transfer_rate_hz > odr_hz {
            return Err(AccelError::InvalidParameter(format!(
                "Transfer rate must be 1-{} Hz, got {}",
                odr_hz, self.transfer_rate_hz
            )));
        }

        if self.fifo_capacity == 0 || self.fifo_capacity > FIFO_MAX_SAMPLES {
            return Err(AccelError::InvalidParameter(format!(
                "FIFO capacity must be 1-{} samples, got {}",
                FIFO_MAX_SAMPLES, self.fifo_capacity
            )));
        }

        if self.consumer_capacity == 0 {
            return Err(AccelError::InvalidParameter(
                "Consumer capacity must be at least 1 sample".to_string(),
            ));
        }

        if self.reset_timeout < self.reset_settle {
            return Err(AccelError::InvalidParameter(format!(
                "Reset timeout {:?} is shorter than settle time {:?}",
                self.reset_timeout, self.reset_settle
            )));
        }

        if self.max_configure_attempts == 0 {
            return Err(AccelError::InvalidParameter(
                "Configure attempt ceiling must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Largest number of frames moved in one bulk transfer
    pub fn transfer_capacity(&self) -> usize {
        self.fifo_capacity.min(self.consumer_capacity)
    }

    /// Frames expected per watermark / timer period
    pub fn samples_per_transfer(&self) -> usize {
        let per_transfer = (self.odr.hz() / self.transfer_rate_hz.max(1) as f32) as usize;
        per_transfer.clamp(1, self.transfer_capacity().max(1))
    }

    /// Expected time for the FIFO to reach the watermark
    pub fn transfer_interval(&self) -> Duration {
        self.odr.sample_interval() * self.samples_per_transfer() as u32
    }

    pub fn watermark_bytes(&self) -> u16 {
        (self.samples_per_transfer() * FIFO_FRAME_SIZE) as u16
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_configure_attempts: self.max_configure_attempts,
            max_consecutive_bus_errors: self.max_consecutive_bus_errors,
            max_consecutive_bad_transfers: self.max_consecutive_bad_transfers,
        }
    }

    /// Target device state, applied in order
    pub fn register_table(&self) -> Vec<RegisterConfigEntry> {
        let watermark = self.watermark_bytes();

        let mut table = vec![
            RegisterConfigEntry::new(Register::AccPwrConf, 0, ACC_PWR_SAVE),
            RegisterConfigEntry::new(Register::AccPwrCtrl, ACC_ENABLE, 0),
            RegisterConfigEntry::exact(Register::AccConf, ACC_BWP_NORMAL | self.odr.code()),
            RegisterConfigEntry::new(
                Register::AccRange,
                self.range.code(),
                0x03 & !self.range.code(),
            ),
            RegisterConfigEntry::exact(Register::FifoWtm0, (watermark & 0xFF) as u8),
            RegisterConfigEntry::exact(Register::FifoWtm1, ((watermark >> 8) & 0x1F) as u8),
            RegisterConfigEntry::new(
                Register::FifoConfig0,
                FIFO_CONFIG_0_BIT1_ALWAYS | FIFO_MODE,
                0,
            ),
            RegisterConfigEntry::new(
                Register::FifoConfig1,
                FIFO_ACC_EN | FIFO_CONFIG_1_BIT4_ALWAYS,
                FIFO_INT1_INPUT_EN | FIFO_INT2_INPUT_EN,
            ),
        ];

        if self.data_ready {
            table.push(RegisterConfigEntry::new(
                Register::Int1IoConf,
                INT1_OUT | INT1_LVL,
                INT1_OD | INT1_IN,
            ));
            table.push(RegisterConfigEntry::new(Register::Int1Int2MapData, INT1_FWM, 0));
        }

        table
    }
}
