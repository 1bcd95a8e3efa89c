//! BMI088 accelerometer register map and FIFO wire constants

/// Read flag OR-ed into the first SPI byte
pub const DIR_READ: u8 = 0x80;

/// Expected ACC_CHIP_ID value
pub const CHIP_ID: u8 = 0x1E;

// ACC_SOFTRESET commands
pub const SOFTRESET_CMD: u8 = 0xB6;
pub const FIFO_FLUSH_CMD: u8 = 0xB0;

/// Accelerometer register addresses
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    AccChipId = 0x00,
    TempMsb = 0x22,
    TempLsb = 0x23,
    FifoLength0 = 0x24,
    FifoLength1 = 0x25,
    FifoData = 0x26,
    AccConf = 0x40,
    AccRange = 0x41,
    FifoWtm0 = 0x46,
    FifoWtm1 = 0x47,
    FifoConfig0 = 0x48,
    FifoConfig1 = 0x49,
    Int1IoConf = 0x53,
    Int1Int2MapData = 0x58,
    AccPwrConf = 0x7C,
    AccPwrCtrl = 0x7D,
    AccSoftreset = 0x7E,
}

impl Register {
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

// ACC_PWR_CONF
pub const ACC_PWR_SAVE: u8 = 0x03;

// ACC_PWR_CTRL
pub const ACC_ENABLE: u8 = 0x04;

// ACC_CONF: bandwidth in bits 7:4, ODR in bits 3:0
pub const ACC_BWP_NORMAL: u8 = 0xA0;

// FIFO_CONFIG_0
pub const FIFO_CONFIG_0_BIT1_ALWAYS: u8 = 0x02;
pub const FIFO_MODE: u8 = 0x01; // stream mode when clear, FIFO mode when set

// FIFO_CONFIG_1
pub const FIFO_ACC_EN: u8 = 0x40;
pub const FIFO_CONFIG_1_BIT4_ALWAYS: u8 = 0x10;
pub const FIFO_INT1_INPUT_EN: u8 = 0x08;
pub const FIFO_INT2_INPUT_EN: u8 = 0x04;

// INT1_IO_CONF
pub const INT1_IN: u8 = 0x10;
pub const INT1_OUT: u8 = 0x08;
pub const INT1_OD: u8 = 0x04;
pub const INT1_LVL: u8 = 0x02;

// INT1_INT2_MAP_DATA
pub const INT1_FWM: u8 = 0x02;

/// FIFO size in bytes
pub const FIFO_SIZE: usize = 1024;

/// Bytes per accelerometer frame (header + X/Y/Z)
pub const FIFO_FRAME_SIZE: usize = 7;

/// Command and dummy byte preceding every read payload
pub const TRANSFER_HEADER_SIZE: usize = 2;

/// Accelerometer frames that fit in the FIFO
pub const FIFO_MAX_SAMPLES: usize = FIFO_SIZE / FIFO_FRAME_SIZE; // 146

/// FIFO frame headers
pub mod header {
    /// Accelerometer frame, low two bits carry INT1/INT2 tags
    pub const ACCEL: u8 = 0x84;
    pub const ACCEL_MASK: u8 = 0xFC;
    pub const SKIP: u8 = 0x40;
    pub const SENSOR_TIME: u8 = 0x44;
    pub const CONFIG_CHANGE: u8 = 0x48;
    pub const DROP: u8 = 0x50;
    /// Returned when reading past the end of the FIFO
    pub const NOT_READY: u8 = 0x80;
}

pub const CONSTANTS_ONE_G: f32 = 9.80665;
