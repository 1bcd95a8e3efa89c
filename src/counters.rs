//! Failure and timing accounting shared with observers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Count, total, min and max of recorded durations, in microseconds
#[derive(Debug)]
pub struct DurationStats {
    count: AtomicU64,
    total_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for DurationStats {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }
}

impl DurationStats {
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DurationSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let min_us = self.min_us.load(Ordering::Relaxed);
        DurationSnapshot {
            count,
            total_us: self.total_us.load(Ordering::Relaxed),
            min_us: if count == 0 { 0 } else { min_us },
            max_us: self.max_us.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_us.store(0, Ordering::Relaxed);
        self.min_us.store(u64::MAX, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DurationSnapshot {
    pub count: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl DurationSnapshot {
    pub fn mean_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_us / self.count
        }
    }
}

impl fmt::Display for DurationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} events, mean {} us, min {} us, max {} us",
            self.count,
            self.mean_us(),
            self.min_us,
            self.max_us
        )
    }
}

/// Engine accounting.
///
/// Written only by the acquisition task. Other threads hold an `Arc` and
/// take snapshots. Cleared only on an externally requested device reset.
#[derive(Debug, Default)]
pub struct Counters {
    pub transfer: DurationStats,
    pub bad_register: Counter,
    pub bad_transfer: Counter,
    pub fifo_empty: Counter,
    pub fifo_overflow: Counter,
    pub fifo_reset: Counter,
    pub drdy_missed: Counter,
    pub drdy_interval: DurationStats,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            transfer: self.transfer.snapshot(),
            bad_register: self.bad_register.get(),
            bad_transfer: self.bad_transfer.get(),
            fifo_empty: self.fifo_empty.get(),
            fifo_overflow: self.fifo_overflow.get(),
            fifo_reset: self.fifo_reset.get(),
            drdy_missed: self.drdy_missed.get(),
            drdy_interval: self.drdy_interval.snapshot(),
        }
    }

    pub(crate) fn reset(&self) {
        self.transfer.reset();
        self.bad_register.reset();
        self.bad_transfer.reset();
        self.fifo_empty.reset();
        self.fifo_overflow.reset();
        self.fifo_reset.reset();
        self.drdy_missed.reset();
        self.drdy_interval.reset();
    }
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub transfer: DurationSnapshot,
    pub bad_register: u64,
    pub bad_transfer: u64,
    pub fifo_empty: u64,
    pub fifo_overflow: u64,
    pub fifo_reset: u64,
    pub drdy_missed: u64,
    pub drdy_interval: DurationSnapshot,
}

impl CounterSnapshot {
    /// Sum of the failure counters
    pub fn errors(&self) -> u64 {
        self.bad_register + self.bad_transfer + self.fifo_overflow + self.drdy_missed
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  transfer:      {}", self.transfer)?;
        writeln!(f, "  bad register:  {}", self.bad_register)?;
        writeln!(f, "  bad transfer:  {}", self.bad_transfer)?;
        writeln!(f, "  fifo empty:    {}", self.fifo_empty)?;
        writeln!(f, "  fifo overflow: {}", self.fifo_overflow)?;
        writeln!(f, "  fifo reset:    {}", self.fifo_reset)?;
        writeln!(f, "  drdy missed:   {}", self.drdy_missed)?;
        write!(f, "  drdy interval: {}", self.drdy_interval)
    }
}
