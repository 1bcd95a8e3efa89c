//! Register and bulk transfers over an `embedded-hal` SPI device

use embedded_hal::spi::SpiDevice;

use crate::error::BusError;
use crate::registers::{Register, DIR_READ, TRANSFER_HEADER_SIZE};

/// SPI transaction layer for the accelerometer die.
///
/// Every read is `[cmd | 0x80, dummy, payload...]`. The scratch buffer is
/// sized once for the largest FIFO transfer and reused. Errors are returned
/// as-is; retry policy belongs to the caller.
pub struct Bmi088Bus<SPI> {
    spi: SPI,
    scratch: Vec<u8>,
}

impl<SPI: SpiDevice> Bmi088Bus<SPI> {
    /// Wrap `spi` with room for `max_payload` bytes per read
    pub fn new(spi: SPI, max_payload: usize) -> Self {
        Self {
            spi,
            scratch: vec![0u8; TRANSFER_HEADER_SIZE + max_payload],
        }
    }

    /// Read a single register
    pub fn read_register(&mut self, reg: Register) -> Result<u8, BusError> {
        let mut buf = [reg.addr() | DIR_READ, 0, 0];
        self.spi.transfer_in_place(&mut buf).map_err(BusError::from_spi)?;
        Ok(buf[2])
    }

    /// Write a single register
    pub fn write_register(&mut self, reg: Register, value: u8) -> Result<(), BusError> {
        self.spi.write(&[reg.addr(), value]).map_err(BusError::from_spi)
    }

    /// Read `len` consecutive registers starting at `reg`
    pub fn read_burst(&mut self, reg: Register, len: usize) -> Result<&[u8], BusError> {
        let buf = self.bulk_transfer(reg, len)?;
        Ok(&buf[TRANSFER_HEADER_SIZE..])
    }

    /// One read transaction of `len` payload bytes.
    ///
    /// The returned slice includes the command/dummy header, so callers can
    /// validate the whole transfer length before indexing frames.
    pub fn bulk_transfer(&mut self, reg: Register, len: usize) -> Result<&[u8], BusError> {
        let total = TRANSFER_HEADER_SIZE + len;
        if self.scratch.len() < total {
            self.scratch.resize(total, 0);
        }

        let buf = &mut self.scratch[..total];
        buf.fill(0);
        buf[0] = reg.addr() | DIR_READ;

        self.spi.transfer_in_place(buf).map_err(BusError::from_spi)?;
        Ok(&self.scratch[..total])
    }

    /// Give the SPI device back
    pub fn release(self) -> SPI {
        self.spi
    }
}
