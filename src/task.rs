//! Acquisition thread management
//!
//! One thread owns the engine and runs every tick. Data-ready notifications
//! and control commands reach it as messages on a single bounded channel; the
//! fallback timer is the channel's receive timeout.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use embedded_hal::spi::SpiDevice;
use log::{debug, error, info};

use crate::bmi088::{Bmi088Accel, DataReadyLine, Diagnostics, Schedule};
use crate::consumer::SampleConsumer;
use crate::counters::Counters;
use crate::error::{AccelError, Result};

/// Bound of the wake-up channel
const WAKE_QUEUE: usize = 16;

enum Command {
    Start,
    Stop,
    Reset,
    PrintInfo(Sender<Diagnostics>),
    Shutdown,
}

enum Wake {
    DataReady,
    Command(Command),
}

/// Data-ready entry point for an interrupt or GPIO watcher.
///
/// [`notify`](Self::notify) never blocks and never runs driver code. If the
/// wake queue is full the pending count is still stored and picked up by the
/// next tick.
#[derive(Clone)]
pub struct DataReadySignal {
    line: DataReadyLine,
    wake: SyncSender<Wake>,
}

impl DataReadySignal {
    pub fn notify(&self) {
        self.line.signal();
        match self.wake.try_send(Wake::DataReady) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!("Data-ready after acquisition thread exit")
            }
        }
    }
}

/// Handle to a running acquisition thread
pub struct AcquisitionHandle {
    tx: SyncSender<Wake>,
    line: DataReadyLine,
    counters: Arc<Counters>,
    thread: Option<JoinHandle<()>>,
}

/// Move `engine` onto its own thread and start ticking immediately
pub fn spawn<SPI, C>(engine: Bmi088Accel<SPI, C>) -> AcquisitionHandle
where
    SPI: SpiDevice + Send + 'static,
    C: SampleConsumer + 'static,
{
    let (tx, rx) = mpsc::sync_channel(WAKE_QUEUE);
    let line = engine.data_ready_line();
    let counters = engine.counters();

    let thread = thread::spawn(move || {
        run_acquisition_thread(engine, rx);
    });

    AcquisitionHandle {
        tx,
        line,
        counters,
        thread: Some(thread),
    }
}

impl AcquisitionHandle {
    /// Restart from a soft reset after a stop
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Stop at the next tick
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Soft reset the device and clear counters
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Synchronous diagnostics dump from the acquisition thread
    pub fn print_info(&self) -> Result<Diagnostics> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::PrintInfo(reply_tx))?;
        reply_rx.recv().map_err(|_| AccelError::TaskStopped)
    }

    pub fn data_ready_signal(&self) -> DataReadySignal {
        DataReadySignal {
            line: self.line.clone(),
            wake: self.tx.clone(),
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Check if the thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the thread and wait for it
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Wake::Command(command))
            .map_err(|_| AccelError::TaskStopped)
    }

    fn shutdown_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(Wake::Command(Command::Shutdown));
            if thread.join().is_err() {
                error!("Acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Acquisition thread main loop
fn run_acquisition_thread<SPI, C>(mut engine: Bmi088Accel<SPI, C>, rx: Receiver<Wake>)
where
    SPI: SpiDevice,
    C: SampleConsumer,
{
    info!("Acquisition thread started");
    let mut deadline = Some(Instant::now());

    loop {
        let wake = match deadline {
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    None
                } else {
                    match rx.recv_timeout(at - now) {
                        Ok(wake) => Some(wake),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
            None => match rx.recv() {
                Ok(wake) => Some(wake),
                Err(_) => break,
            },
        };

        if let Some(Wake::Command(command)) = wake {
            match command {
                Command::Start => engine.start(),
                Command::Stop => engine.request_stop(),
                Command::Reset => engine.reset(),
                Command::PrintInfo(reply) => {
                    let _ = reply.send(engine.diagnostics());
                    continue;
                }
                Command::Shutdown => break,
            }
            deadline = Some(Instant::now());
            continue;
        }

        let now = Instant::now();
        deadline = match engine.tick(now) {
            Ok(schedule) => next_deadline(schedule, deadline, now),
            Err(e) => {
                error!("Acquisition halted: {}", e);
                None
            }
        };
    }

    engine.request_stop();
    let _ = engine.tick(Instant::now());
    info!("Acquisition thread exiting");
}

/// Periodic schedules advance from the previous deadline so they do not drift.
/// When running behind, the next tick happens immediately.
fn next_deadline(schedule: Schedule, previous: Option<Instant>, now: Instant) -> Option<Instant> {
    match schedule {
        Schedule::After(delay) => Some(now + delay),
        Schedule::Interval(period) => {
            let next = previous.unwrap_or(now) + period;
            Some(next.max(now))
        }
        Schedule::Idle => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionConfig;
    use crate::consumer::{ChannelConsumer, SampleMessage};
    use crate::sim::Bmi088Sim;
    use crate::state::AcquisitionState;
    use std::time::Duration;

    fn wait_for_state(handle: &AcquisitionHandle, state: AcquisitionState) {
        let until = Instant::now() + Duration::from_secs(2);
        while Instant::now() < until {
            if handle.print_info().unwrap().state == state {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("never reached {}", state);
    }

    #[test]
    fn test_next_deadline() {
        let now = Instant::now();
        let period = Duration::from_millis(2);
        assert_eq!(next_deadline(Schedule::After(period), None, now), Some(now + period));
        assert_eq!(next_deadline(Schedule::Idle, Some(now), now), None);

        // drift-free when on time
        let previous = now - Duration::from_millis(1);
        assert_eq!(
            next_deadline(Schedule::Interval(period), Some(previous), now),
            Some(previous + period)
        );

        // behind schedule: run right away
        let late = now - Duration::from_millis(10);
        assert_eq!(next_deadline(Schedule::Interval(period), Some(late), now), Some(now));
    }

    #[test]
    fn test_thread_streams_and_stops() {
        let (spi, sim) = Bmi088Sim::new();
        let (tx, rx) = mpsc::channel();
        let engine =
            Bmi088Accel::new(spi, ChannelConsumer::new(tx), AcquisitionConfig::default()).unwrap();
        let handle = spawn(engine);

        wait_for_state(&handle, AcquisitionState::FifoRead);
        sim.push_frames(&[[10, 20, 30]; 3]);

        let batch = loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                SampleMessage::Batch(batch) => break batch,
                SampleMessage::Temperature(_) => {}
            }
        };
        assert_eq!(batch.len(), 3);

        handle.stop().unwrap();
        wait_for_state(&handle, AcquisitionState::Stopped);
        let reads = sim.fifo_data_reads();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sim.fifo_data_reads(), reads);

        handle.start().unwrap();
        wait_for_state(&handle, AcquisitionState::FifoRead);
        assert_eq!(sim.soft_resets(), 2);

        handle.shutdown();
    }

    #[test]
    fn test_data_ready_signal_wakes_thread() {
        let (spi, sim) = Bmi088Sim::new();
        let config = AcquisitionConfig {
            data_ready: true,
            ..Default::default()
        };
        let engine = Bmi088Accel::new(spi, Vec::new(), config).unwrap();
        let handle = spawn(engine);
        wait_for_state(&handle, AcquisitionState::FifoRead);

        sim.push_frames(&[[1, 1, 1]; 4]);
        let signal = handle.data_ready_signal();
        signal.notify();

        let counters = handle.counters();
        let until = Instant::now() + Duration::from_secs(2);
        while counters.snapshot().drdy_interval.count == 0 && Instant::now() < until {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(counters.snapshot().drdy_interval.count >= 1);
        assert!(handle.print_info().unwrap().data_ready_enabled);
    }

    #[test]
    fn test_init_timeout_leaves_thread_idle() {
        let (spi, sim) = Bmi088Sim::new();
        sim.set_chip_id(0x00);
        let config = AcquisitionConfig {
            reset_timeout: Duration::from_millis(5),
            ..Default::default()
        };
        let engine = Bmi088Accel::new(spi, Vec::new(), config).unwrap();
        let handle = spawn(engine);

        wait_for_state(&handle, AcquisitionState::Stopped);
        assert!(handle.is_running());
        assert!(handle.print_info().unwrap().last_error.is_some());
    }

    #[test]
    fn test_commands_fail_after_shutdown() {
        let (spi, _sim) = Bmi088Sim::new();
        let engine = Bmi088Accel::new(spi, Vec::new(), AcquisitionConfig::default()).unwrap();
        let mut handle = spawn(engine);
        handle.shutdown_inner();
        assert!(!handle.is_running());
        assert!(matches!(handle.stop(), Err(AccelError::TaskStopped)));
        assert!(matches!(handle.print_info(), Err(AccelError::TaskStopped)));
    }
}
