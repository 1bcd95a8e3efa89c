//! Simulated BMI088 accelerometer behind an `embedded-hal` SPI device (tests only)

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

use crate::registers::{header, Register, CHIP_ID, DIR_READ, FIFO_FLUSH_CMD, SOFTRESET_CMD};

struct SimState {
    regs: [u8; 128],
    fifo: VecDeque<u8>,
    stuck: HashMap<u8, u8>,
    fifo_length: Option<u16>,
    chip_id: u8,
    fail_next: u32,
    fail_always: bool,
    transactions: usize,
    fifo_data_reads: usize,
    fifo_flushes: usize,
    soft_resets: usize,
    writes: Vec<(u8, u8)>,
}

impl SimState {
    fn new() -> Self {
        let mut state = Self {
            regs: [0; 128],
            fifo: VecDeque::new(),
            stuck: HashMap::new(),
            fifo_length: None,
            chip_id: CHIP_ID,
            fail_next: 0,
            fail_always: false,
            transactions: 0,
            fifo_data_reads: 0,
            fifo_flushes: 0,
            soft_resets: 0,
            writes: Vec::new(),
        };
        state.power_on_defaults();
        state
    }

    fn power_on_defaults(&mut self) {
        self.regs = [0; 128];
        self.regs[Register::AccPwrConf.addr() as usize] = 0x03;
        self.regs[Register::AccConf.addr() as usize] = 0xA8;
        self.regs[Register::AccRange.addr() as usize] = 0x01;
        self.regs[Register::FifoWtm0.addr() as usize] = 0x02;
        self.regs[Register::FifoConfig0.addr() as usize] = 0x02;
        self.regs[Register::FifoConfig1.addr() as usize] = 0x10;
        self.fifo.clear();
    }

    fn fifo_len(&self) -> u16 {
        self.fifo_length.unwrap_or(self.fifo.len() as u16)
    }

    fn read(&mut self, addr: u8) -> u8 {
        if let Some(&value) = self.stuck.get(&addr) {
            return value;
        }
        match addr {
            a if a == Register::AccChipId.addr() => self.chip_id,
            a if a == Register::FifoLength0.addr() => (self.fifo_len() & 0xFF) as u8,
            a if a == Register::FifoLength1.addr() => ((self.fifo_len() >> 8) & 0x3F) as u8,
            a if a == Register::FifoData.addr() => {
                self.fifo.pop_front().unwrap_or(header::NOT_READY)
            }
            a => self.regs[a as usize],
        }
    }

    fn write(&mut self, addr: u8, value: u8) {
        self.writes.push((addr, value));
        if addr == Register::AccSoftreset.addr() {
            match value {
                SOFTRESET_CMD => {
                    self.soft_resets += 1;
                    self.power_on_defaults();
                }
                FIFO_FLUSH_CMD => {
                    self.fifo_flushes += 1;
                    self.fifo.clear();
                }
                _ => {}
            }
            return;
        }
        self.regs[addr as usize & 0x7F] = value;
    }

    fn transfer(&mut self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        let cmd = buf[0];
        if cmd & DIR_READ == 0 {
            if buf.len() >= 2 {
                self.write(cmd, buf[1]);
            }
            return;
        }

        let start = cmd & 0x7F;
        if start == Register::FifoData.addr() {
            self.fifo_data_reads += 1;
        }
        if buf.len() > 1 {
            buf[1] = 0xFF; // dummy byte
        }
        for (i, byte) in buf.iter_mut().enumerate().skip(2) {
            let addr = if start == Register::FifoData.addr() {
                start
            } else {
                start + (i - 2) as u8
            };
            *byte = self.read(addr);
        }
    }
}

/// SPI side of the simulator, moved into the driver
pub struct SimSpi {
    state: Arc<Mutex<SimState>>,
}

/// Test side of the simulator
#[derive(Clone)]
pub struct Bmi088Sim {
    state: Arc<Mutex<SimState>>,
}

impl ErrorType for SimSpi {
    type Error = ErrorKind;
}

impl SpiDevice for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
        let mut s = self.state.lock().unwrap();
        s.transactions += 1;
        if s.fail_always {
            return Err(ErrorKind::Other);
        }
        if s.fail_next > 0 {
            s.fail_next -= 1;
            return Err(ErrorKind::Other);
        }

        for op in operations.iter_mut() {
            match op {
                Operation::Write(buf) => {
                    if buf.len() >= 2 {
                        s.write(buf[0], buf[1]);
                    }
                }
                Operation::TransferInPlace(buf) => s.transfer(buf),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Bmi088Sim {
    pub fn new() -> (SimSpi, Bmi088Sim) {
        let state = Arc::new(Mutex::new(SimState::new()));
        (SimSpi { state: state.clone() }, Bmi088Sim { state })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Queue accelerometer frames in the FIFO
    pub fn push_frames(&self, frames: &[[i16; 3]]) {
        let mut s = self.lock();
        for frame in frames {
            s.fifo.push_back(header::ACCEL);
            for axis in frame {
                s.fifo.extend(axis.to_le_bytes());
            }
        }
    }

    /// Queue raw FIFO bytes
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.lock().fifo.extend(bytes.iter().copied());
    }

    /// Report a fixed FIFO length instead of the queued byte count
    pub fn set_fifo_length(&self, bytes: Option<u16>) {
        self.lock().fifo_length = bytes;
    }

    /// Pin a register to `value`, ignoring writes
    pub fn set_stuck(&self, reg: Register, value: u8) {
        self.lock().stuck.insert(reg.addr(), value);
    }

    pub fn clear_stuck(&self, reg: Register) {
        self.lock().stuck.remove(&reg.addr());
    }

    /// Overwrite a register as if it drifted
    pub fn corrupt(&self, reg: Register, value: u8) {
        self.lock().regs[reg.addr() as usize] = value;
    }

    pub fn set_chip_id(&self, id: u8) {
        self.lock().chip_id = id;
    }

    pub fn set_temperature(&self, msb: u8, lsb: u8) {
        let mut s = self.lock();
        s.regs[Register::TempMsb.addr() as usize] = msb;
        s.regs[Register::TempLsb.addr() as usize] = lsb;
    }

    /// Fail the next `count` transactions
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    pub fn fail_always(&self, fail: bool) {
        self.lock().fail_always = fail;
    }

    pub fn register(&self, reg: Register) -> u8 {
        self.lock().regs[reg.addr() as usize]
    }

    pub fn transactions(&self) -> usize {
        self.lock().transactions
    }

    pub fn fifo_data_reads(&self) -> usize {
        self.lock().fifo_data_reads
    }

    pub fn fifo_flushes(&self) -> usize {
        self.lock().fifo_flushes
    }

    pub fn soft_resets(&self) -> usize {
        self.lock().soft_resets
    }

    pub fn writes_to(&self, reg: Register) -> usize {
        self.lock().writes.iter().filter(|(addr, _)| *addr == reg.addr()).count()
    }
}
