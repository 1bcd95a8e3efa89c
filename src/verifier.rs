//! Register configuration table and continuous self-verification

use embedded_hal::spi::SpiDevice;
use log::{debug, warn};

use crate::bus::Bmi088Bus;
use crate::counters::Counters;
use crate::error::{AccelError, BusError, Result};
use crate::registers::Register;

/// One desired register state: bits that must be set and bits that must be clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterConfigEntry {
    pub register: Register,
    pub set_bits: u8,
    pub clear_bits: u8,
}

impl RegisterConfigEntry {
    /// # Panics
    /// If `set_bits` and `clear_bits` overlap.
    pub const fn new(register: Register, set_bits: u8, clear_bits: u8) -> Self {
        assert!(set_bits & clear_bits == 0, "set and clear bits overlap");
        Self {
            register,
            set_bits,
            clear_bits,
        }
    }

    /// Entry that pins every bit of the register to `value`
    pub const fn exact(register: Register, value: u8) -> Self {
        Self::new(register, value, !value)
    }

    /// All 8 bits are specified, so the current value does not matter
    pub fn is_exact(&self) -> bool {
        self.set_bits | self.clear_bits == 0xFF
    }

    /// Value to write given the current register contents
    pub fn apply(&self, current: u8) -> u8 {
        (current & !self.clear_bits) | self.set_bits
    }

    pub fn matches(&self, value: u8) -> bool {
        (value & self.set_bits) == self.set_bits && (value & self.clear_bits) == 0
    }
}

/// Result of one round-robin check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCheck {
    Passed(Register),
    Mismatch { register: Register, actual: u8 },
}

/// Applies the table and verifies it one register per call
#[derive(Debug, Clone)]
pub struct ConfigVerifier {
    table: Vec<RegisterConfigEntry>,
    cursor: usize,
}

impl ConfigVerifier {
    /// # Errors
    /// * `AccelError::InvalidParameter` - if `table` is empty
    pub fn new(table: Vec<RegisterConfigEntry>) -> Result<Self> {
        if table.is_empty() {
            return Err(AccelError::InvalidParameter(
                "register table must not be empty".to_string(),
            ));
        }
        Ok(Self { table, cursor: 0 })
    }

    pub fn table(&self) -> &[RegisterConfigEntry] {
        &self.table
    }

    /// Index of the entry the next [`check_next`](Self::check_next) reads
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Write every entry in table order, then read all of them back.
    ///
    /// Every mismatching register is counted; the first one is returned.
    pub fn configure<SPI: SpiDevice>(
        &self,
        bus: &mut Bmi088Bus<SPI>,
        counters: &Counters,
    ) -> Result<()> {
        for entry in &self.table {
            let current = if entry.is_exact() {
                0
            } else {
                bus.read_register(entry.register)?
            };
            bus.write_register(entry.register, entry.apply(current))?;
        }

        let mut first_mismatch = None;
        for entry in &self.table {
            let actual = bus.read_register(entry.register)?;
            if !entry.matches(actual) {
                counters.bad_register.increment();
                warn!(
                    "{:?}: read 0x{:02X}, expected set 0x{:02X} clear 0x{:02X}",
                    entry.register, actual, entry.set_bits, entry.clear_bits
                );
                first_mismatch.get_or_insert(AccelError::ConfigMismatch {
                    register: entry.register,
                    actual,
                    set_bits: entry.set_bits,
                    clear_bits: entry.clear_bits,
                });
            }
        }

        match first_mismatch {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read back the entry under the cursor.
    ///
    /// The cursor only advances when the register passes, so after a
    /// reconfiguration the drifted register is the first one re-checked.
    pub fn check_next<SPI: SpiDevice>(
        &mut self,
        bus: &mut Bmi088Bus<SPI>,
        counters: &Counters,
    ) -> std::result::Result<RegisterCheck, BusError> {
        let entry = self.table[self.cursor];
        let actual = bus.read_register(entry.register)?;
        if entry.matches(actual) {
            self.cursor = (self.cursor + 1) % self.table.len();
            Ok(RegisterCheck::Passed(entry.register))
        } else {
            counters.bad_register.increment();
            debug!("{:?} drifted to 0x{:02X}", entry.register, actual);
            Ok(RegisterCheck::Mismatch {
                register: entry.register,
                actual,
            })
        }
    }
}
