//! BMI088 accelerometer acquisition engine
//!
//! [`Bmi088Accel`] owns the bus, the register table, the state machine and
//! every timestamp. It is driven one [`tick`](Bmi088Accel::tick) at a time,
//! either by [`crate::task::spawn`] or directly by a caller that owns its own
//! scheduling.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use embedded_hal::spi::SpiDevice;
use log::{debug, error, info, trace, warn};

use crate::bus::Bmi088Bus;
use crate::config::AcquisitionConfig;
use crate::consumer::{SampleBatch, SampleConsumer};
use crate::counters::{CounterSnapshot, Counters};
use crate::error::{AccelError, BusError, Result};
use crate::fifo::{self, FifoLevel};
use crate::registers::{Register, CHIP_ID, FIFO_FLUSH_CMD, FIFO_FRAME_SIZE, SOFTRESET_CMD};
use crate::state::{transition, AcquisitionState, Effects, Event, RecoveryPolicy, Transition};
use crate::verifier::{ConfigVerifier, RegisterCheck};

/// Delay before retrying a failed configuration
const CONFIGURE_RETRY: Duration = Duration::from_millis(10);

/// When the engine wants its next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once, `Duration` from now
    After(Duration),
    /// Periodically, measured from the previous deadline
    Interval(Duration),
    /// Only on an external command
    Idle,
}

/// Pending-sample hand-off between a data-ready source and the engine.
///
/// [`signal`](Self::signal) is two atomic stores and never touches the bus,
/// so it is safe to call from an interrupt handler or a GPIO thread. The edge
/// time it records becomes the capture time of the batch read for it.
#[derive(Debug, Clone)]
pub struct DataReadyLine {
    pending: Arc<AtomicU16>,
    edge_nanos: Arc<AtomicU64>,
    epoch: Instant,
    samples_per_watermark: u16,
}

impl DataReadyLine {
    fn new(samples_per_watermark: u16) -> Self {
        Self {
            pending: Arc::new(AtomicU16::new(0)),
            edge_nanos: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
            samples_per_watermark,
        }
    }

    /// The FIFO reached its watermark just now
    pub fn signal(&self) {
        self.signal_at(Instant::now());
    }

    /// The FIFO reached its watermark at `edge`, for sources that timestamp
    /// the interrupt themselves
    pub fn signal_at(&self, edge: Instant) {
        let nanos = edge.saturating_duration_since(self.epoch).as_nanos();
        self.edge_nanos
            .store(u64::try_from(nanos).unwrap_or(u64::MAX), Ordering::Release);
        self.pending.store(self.samples_per_watermark, Ordering::Release);
    }

    pub fn pending(&self) -> u16 {
        self.pending.load(Ordering::Acquire)
    }

    /// Pending count and edge time of the latest signal, if any.
    ///
    /// The edge is stored before the count, so a non-zero count always comes
    /// with an edge at least as new as the one that set it.
    fn take(&self) -> Option<(u16, Instant)> {
        match self.pending.swap(0, Ordering::AcqRel) {
            0 => None,
            pending => {
                let nanos = self.edge_nanos.load(Ordering::Acquire);
                Some((pending, self.epoch + Duration::from_nanos(nanos)))
            }
        }
    }

    fn clear(&self) {
        self.pending.store(0, Ordering::Release);
    }
}

/// Outcome of one FIFO_READ cycle, before it is turned into an [`Event`]
#[derive(Clone, Copy)]
enum Cycle {
    Published(usize),
    Empty,
    Overflow,
    BadTransfer,
    Bus(BusError),
}

/// Snapshot of engine state for a diagnostics dump
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub captured_at: DateTime<Local>,
    pub state: AcquisitionState,
    pub data_ready_enabled: bool,
    pub transfer_interval: Duration,
    pub samples_per_transfer: usize,
    pub register_cursor: usize,
    pub configure_attempts: u32,
    pub last_temperature: Option<f32>,
    pub last_error: Option<String>,
    pub counters: CounterSnapshot,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BMI088 accelerometer @ {}", self.captured_at.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        writeln!(f, "  state:         {}", self.state)?;
        writeln!(
            f,
            "  mode:          {}",
            if self.data_ready_enabled { "data-ready" } else { "timer" }
        )?;
        writeln!(
            f,
            "  transfer:      {} samples every {:?}",
            self.samples_per_transfer, self.transfer_interval
        )?;
        writeln!(f, "  check cursor:  {}", self.register_cursor)?;
        match self.last_temperature {
            Some(t) => writeln!(f, "  temperature:   {:.2} C", t)?,
            None => writeln!(f, "  temperature:   n/a")?,
        }
        if let Some(err) = &self.last_error {
            writeln!(f, "  last error:    {}", err)?;
        }
        write!(f, "{}", self.counters)
    }
}

/// BMI088 accelerometer driven through a FIFO acquisition state machine
pub struct Bmi088Accel<SPI, C> {
    bus: Bmi088Bus<SPI>,
    consumer: C,
    config: AcquisitionConfig,
    policy: RecoveryPolicy,
    verifier: ConfigVerifier,
    state: AcquisitionState,
    counters: Arc<Counters>,
    data_ready: DataReadyLine,
    data_ready_enabled: bool,

    reset_timestamp: Option<Instant>,
    last_config_check: Option<Instant>,
    last_data_ready: Option<Instant>,
    temperature_update: Option<Instant>,

    configure_attempts: u32,
    consecutive_bus_errors: u32,
    consecutive_bad_transfers: u32,
    last_cycle_failed: bool,
    last_temperature: Option<f32>,
    last_error: Option<String>,
}

impl<SPI: SpiDevice, C: SampleConsumer> Bmi088Accel<SPI, C> {
    /// Create an engine in the RESET state.
    ///
    /// No bus traffic happens until the first tick.
    ///
    /// # Errors
    /// * `AccelError::InvalidParameter` - if `config` does not validate
    pub fn new(spi: SPI, consumer: C, config: AcquisitionConfig) -> Result<Self> {
        config.validate()?;

        let bus = Bmi088Bus::new(spi, config.transfer_capacity() * FIFO_FRAME_SIZE);
        let verifier = ConfigVerifier::new(config.register_table())?;
        let data_ready = DataReadyLine::new(config.samples_per_transfer() as u16);

        Ok(Self {
            bus,
            consumer,
            policy: config.recovery_policy(),
            verifier,
            state: AcquisitionState::Reset,
            counters: Arc::new(Counters::default()),
            data_ready,
            data_ready_enabled: false,
            reset_timestamp: None,
            last_config_check: None,
            last_data_ready: None,
            temperature_update: None,
            configure_attempts: 0,
            consecutive_bus_errors: 0,
            consecutive_bad_transfers: 0,
            last_cycle_failed: false,
            last_temperature: None,
            last_error: None,
            config,
        })
    }

    /// Drive ticks until the engine reaches FIFO_READ.
    ///
    /// # Errors
    /// * `AccelError::InitializationTimeout` - if the device does not come up
    ///   within `init_timeout`, or the soft reset never settles
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == AcquisitionState::Stopped {
            self.start();
        }

        let started = Instant::now();
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(started);
            if elapsed > self.config.init_timeout {
                self.apply(Event::StopRequested, now);
                self.apply(Event::StopAcknowledged, now);
                return Err(AccelError::InitializationTimeout(elapsed));
            }

            let schedule = self.tick(now)?;
            match (self.state, schedule) {
                (AcquisitionState::FifoRead, _) => return Ok(()),
                (_, Schedule::After(delay)) | (_, Schedule::Interval(delay)) => {
                    thread::sleep(delay)
                }
                (_, Schedule::Idle) => return Err(AccelError::TaskStopped),
            }
        }
    }

    /// Run one step of the state machine at time `now`.
    ///
    /// Bus failures, bad frames and register drift are handled here and show
    /// up only in the counters. The only error returned is a reset that never
    /// settled, after which the engine is STOPPED.
    pub fn tick(&mut self, now: Instant) -> Result<Schedule> {
        let event = match self.state {
            AcquisitionState::Reset => self.run_reset(now),
            AcquisitionState::WaitForReset => self.run_wait_for_reset(now),
            AcquisitionState::Configure => self.run_configure(),
            AcquisitionState::FifoRead => self.run_fifo_read(now),
            AcquisitionState::RequestStop => Event::StopAcknowledged,
            AcquisitionState::Stopped => return Ok(Schedule::Idle),
        };

        self.apply(event, now);

        if event == Event::ResetTimedOut {
            return Err(AccelError::InitializationTimeout(self.config.reset_timeout));
        }
        Ok(self.schedule())
    }

    /// Ask the engine to stop at its next tick
    pub fn request_stop(&mut self) {
        self.apply(Event::StopRequested, Instant::now());
    }

    /// Leave STOPPED and start over from a soft reset
    pub fn start(&mut self) {
        self.apply(Event::StartRequested, Instant::now());
    }

    /// Soft reset the device and clear all counters
    pub fn reset(&mut self) {
        self.apply(Event::ResetRequested, Instant::now());
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Shared handle to the accounting counters
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Handle for whatever watches the INT1 pin
    pub fn data_ready_line(&self) -> DataReadyLine {
        self.data_ready.clone()
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            captured_at: Local::now(),
            state: self.state,
            data_ready_enabled: self.data_ready_enabled,
            transfer_interval: self.config.transfer_interval(),
            samples_per_transfer: self.config.samples_per_transfer(),
            register_cursor: self.verifier.cursor(),
            configure_attempts: self.configure_attempts,
            last_temperature: self.last_temperature,
            last_error: self.last_error.clone(),
            counters: self.counters.snapshot(),
        }
    }

    /// Tear down and hand back the SPI device and the consumer
    pub fn release(self) -> (SPI, C) {
        (self.bus.release(), self.consumer)
    }

    fn run_reset(&mut self, now: Instant) -> Event {
        match self.bus.write_register(Register::AccSoftreset, SOFTRESET_CMD) {
            Ok(()) => {
                self.reset_timestamp = Some(now);
                Event::ResetIssued
            }
            Err(e) => {
                warn!("Soft reset failed: {}", e);
                self.last_error = Some(e.to_string());
                Event::ResetFailed
            }
        }
    }

    /// The first read after a reset also switches the die back to SPI mode,
    /// so an early wrong chip ID is expected and simply polled again.
    fn run_wait_for_reset(&mut self, now: Instant) -> Event {
        let since_reset = self
            .reset_timestamp
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));

        if since_reset < self.config.reset_settle {
            return Event::ResetPending;
        }

        match self.bus.read_register(Register::AccChipId) {
            Ok(CHIP_ID) => {
                debug!("Chip ID confirmed after {:?}", since_reset);
                return Event::ResetSettled;
            }
            Ok(id) => {
                trace!("ACC_CHIP_ID read 0x{:02X}", id);
                self.last_error = Some(AccelError::InvalidChipId(id).to_string());
            }
            Err(e) => {
                trace!("ACC_CHIP_ID read failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }

        if since_reset >= self.config.reset_timeout {
            Event::ResetTimedOut
        } else {
            Event::ResetPending
        }
    }

    fn run_configure(&mut self) -> Event {
        match self.verifier.configure(&mut self.bus, &self.counters) {
            Ok(()) => {
                self.configure_attempts = 0;
                Event::Configured {
                    data_ready: self.config.data_ready,
                }
            }
            Err(e) => {
                self.configure_attempts += 1;
                warn!("Configure attempt {} failed: {}", self.configure_attempts, e);
                self.last_error = Some(e.to_string());
                Event::ConfigureFailed {
                    attempts: self.configure_attempts,
                }
            }
        }
    }

    fn run_fifo_read(&mut self, now: Instant) -> Event {
        let signalled = self.data_ready.take().filter(|_| self.data_ready_enabled);

        if self.register_check_due(now) {
            self.last_config_check = Some(now);
            match self.verifier.check_next(&mut self.bus, &self.counters) {
                Ok(RegisterCheck::Passed(_)) => {}
                Ok(RegisterCheck::Mismatch { register, actual }) => {
                    warn!("{:?} read back 0x{:02X}, reconfiguring", register, actual);
                    self.last_error = Some(format!("{:?} drifted to 0x{:02X}", register, actual));
                    return Event::RegisterMismatch;
                }
                Err(e) => return self.finish_cycle(Cycle::Bus(e), now),
            }
        }

        let cycle = match signalled {
            Some((pending, edge)) => {
                if let Some(last) = self.last_data_ready {
                    self.counters.drdy_interval.record(edge.saturating_duration_since(last));
                }
                self.last_data_ready = Some(edge);

                // A late tick cannot trust the watermark count any more
                if now.saturating_duration_since(edge) <= self.config.transfer_interval() / 2 {
                    let samples = (pending as usize).min(self.config.transfer_capacity());
                    self.fifo_read(edge, samples)
                } else {
                    debug!(
                        "Data-ready edge is {:?} old, polling FIFO",
                        now.saturating_duration_since(edge)
                    );
                    self.poll_fifo(now)
                }
            }
            None => {
                if self.data_ready_enabled && self.data_ready_stalled(now) {
                    self.counters.drdy_missed.increment();
                    debug!(
                        "No data-ready for {:?}, polling FIFO",
                        self.config.transfer_interval() * 2
                    );
                }
                self.poll_fifo(now)
            }
        };

        self.finish_cycle(cycle, now)
    }

    /// Read the FIFO fill level and drain whatever it reports
    fn poll_fifo(&mut self, now: Instant) -> Cycle {
        match self.read_fifo_count() {
            Ok(FifoLevel::Samples(samples)) => self.fifo_read(now, samples),
            Ok(FifoLevel::Empty) => {
                self.counters.fifo_empty.increment();
                Cycle::Empty
            }
            Ok(FifoLevel::Overflow { samples }) => {
                self.counters.fifo_overflow.increment();
                warn!("FIFO overflow ({} samples), flushing", samples);
                match self.fifo_reset() {
                    Ok(()) => Cycle::Overflow,
                    Err(e) => Cycle::Bus(e),
                }
            }
            Err(e) => Cycle::Bus(e),
        }
    }

    fn register_check_due(&self, now: Instant) -> bool {
        let interval = self.config.register_check_interval;
        interval.is_zero()
            || self.last_cycle_failed
            || self
                .last_config_check
                .map_or(true, |t| now.saturating_duration_since(t) >= interval)
    }

    fn data_ready_stalled(&self, now: Instant) -> bool {
        let last = self.last_data_ready.unwrap_or(now);
        now.saturating_duration_since(last) >= self.config.transfer_interval() * 2
    }

    /// Update streaks and turn the cycle outcome into an event
    fn finish_cycle(&mut self, cycle: Cycle, now: Instant) -> Event {
        match cycle {
            Cycle::Published(_) | Cycle::Empty | Cycle::Overflow => {
                if let Cycle::Published(n) = cycle {
                    trace!("Published {} samples", n);
                }
                self.consecutive_bus_errors = 0;
                if !matches!(cycle, Cycle::Overflow) {
                    self.consecutive_bad_transfers = 0;
                }
                self.last_cycle_failed = matches!(cycle, Cycle::Overflow);
                if !self.last_cycle_failed {
                    self.update_temperature(now);
                }
                Event::FifoHealthy
            }
            Cycle::BadTransfer => {
                self.consecutive_bus_errors = 0;
                self.consecutive_bad_transfers += 1;
                self.last_cycle_failed = true;
                Event::BadTransfer {
                    consecutive: self.consecutive_bad_transfers,
                }
            }
            Cycle::Bus(e) => {
                self.consecutive_bus_errors += 1;
                self.last_cycle_failed = true;
                debug!("FIFO cycle bus error ({} in a row): {}", self.consecutive_bus_errors, e);
                self.last_error = Some(e.to_string());
                Event::BusFailure {
                    consecutive: self.consecutive_bus_errors,
                }
            }
        }
    }

    fn read_fifo_count(&mut self) -> std::result::Result<FifoLevel, BusError> {
        let len = self.bus.read_burst(Register::FifoLength0, 2)?;
        let bytes = fifo::fifo_length_bytes(len[0], len[1]);
        Ok(fifo::classify_fifo_length(
            bytes,
            self.config.fifo_capacity,
            self.config.consumer_capacity,
        ))
    }

    /// One bulk FIFO transfer of `samples` frames, published as one batch.
    /// The newest sample is stamped with `capture`.
    fn fifo_read(&mut self, capture: Instant, samples: usize) -> Cycle {
        let started = Instant::now();
        let parsed = match self.bus.bulk_transfer(Register::FifoData, samples * FIFO_FRAME_SIZE) {
            Ok(buf) => fifo::parse_fifo(buf, samples),
            Err(e) => return Cycle::Bus(e),
        };
        self.counters.transfer.record(started.elapsed());

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                self.counters.bad_transfer.increment();
                warn!("{}", e);
                return Cycle::BadTransfer;
            }
        };

        let interval = self.config.odr.sample_interval();
        let published = parsed.raw.len();
        if published > 0 {
            let scale = self.config.range.scale();
            let samples = fifo::to_samples(&parsed.raw, capture, interval, scale);
            self.consumer.publish(SampleBatch {
                samples,
                interval,
                sensor_time: parsed.sensor_time,
            });
        }

        if let Some(bad) = parsed.bad_frame {
            self.counters.bad_transfer.increment();
            debug!(
                "Bad FIFO header 0x{:02X} at byte {}, kept {} of {} samples",
                bad.header, bad.offset, published, samples
            );
            return Cycle::BadTransfer;
        }

        Cycle::Published(published)
    }

    /// Flush the device FIFO and forget any pending data-ready count
    fn fifo_reset(&mut self) -> std::result::Result<(), BusError> {
        self.counters.fifo_reset.increment();
        self.data_ready.clear();
        self.consecutive_bad_transfers = 0;
        self.bus.write_register(Register::AccSoftreset, FIFO_FLUSH_CMD)
    }

    fn update_temperature(&mut self, now: Instant) {
        let due = self
            .temperature_update
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.temperature_interval);
        if !due {
            return;
        }
        self.temperature_update = Some(now);

        match self.bus.read_burst(Register::TempMsb, 2) {
            Ok(raw) => {
                let celsius = fifo::temperature_celsius(raw[0], raw[1]);
                self.last_temperature = Some(celsius);
                self.consumer.update_temperature(celsius);
            }
            Err(e) => debug!("Temperature read failed: {}", e),
        }
    }

    /// Run the pure transition and apply its effects
    fn apply(&mut self, event: Event, now: Instant) {
        let previous = self.state;
        let Transition { next, effects } = transition(previous, event, &self.policy);

        if effects.contains(Effects::RESET_COUNTERS) {
            self.counters.reset();
        }
        if effects.contains(Effects::DISABLE_DATA_READY) && self.data_ready_enabled {
            self.data_ready_enabled = false;
            debug!("Data-ready disabled");
        }
        if effects.contains(Effects::INIT_FAILED) {
            error!(
                "Accelerometer did not come out of reset within {:?}",
                self.config.reset_timeout
            );
        }
        if effects.contains(Effects::RESET_FIFO) {
            if let Err(e) = self.fifo_reset() {
                warn!("FIFO reset failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
        if effects.contains(Effects::ENABLE_DATA_READY) {
            self.data_ready.clear();
            self.data_ready_enabled = true;
            self.last_data_ready = Some(now);
        }

        if next == previous {
            return;
        }

        debug!("{} -> {} ({:?})", previous, next, event);
        self.state = next;

        match next {
            AcquisitionState::Reset => {
                if previous == AcquisitionState::FifoRead {
                    warn!("Resetting accelerometer after {:?}", event);
                }
                self.configure_attempts = 0;
                self.consecutive_bus_errors = 0;
                self.consecutive_bad_transfers = 0;
                self.data_ready.clear();
            }
            AcquisitionState::FifoRead => {
                self.consecutive_bus_errors = 0;
                self.consecutive_bad_transfers = 0;
                self.last_cycle_failed = false;
                self.last_config_check = Some(now);
                info!(
                    "Accelerometer configured: {} g, {} Hz, {} samples every {:?} ({})",
                    self.config.range.g(),
                    self.config.odr.hz(),
                    self.config.samples_per_transfer(),
                    self.config.transfer_interval(),
                    if self.data_ready_enabled { "data-ready" } else { "timer" }
                );
            }
            AcquisitionState::Stopped => {
                self.data_ready.clear();
                info!("Accelerometer acquisition stopped");
            }
            _ => {}
        }
    }

    fn schedule(&self) -> Schedule {
        match self.state {
            AcquisitionState::Reset | AcquisitionState::WaitForReset => {
                Schedule::After(self.config.reset_settle)
            }
            AcquisitionState::Configure => Schedule::After(CONFIGURE_RETRY),
            AcquisitionState::FifoRead if self.data_ready_enabled => {
                Schedule::After(self.config.transfer_interval() * 2)
            }
            AcquisitionState::FifoRead => Schedule::Interval(self.config.transfer_interval()),
            AcquisitionState::RequestStop => Schedule::After(Duration::ZERO),
            AcquisitionState::Stopped => Schedule::Idle,
        }
    }
}
