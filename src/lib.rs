//! FIFO acquisition engine for the BMI088 accelerometer over SPI
//!
//! This library drains the accelerometer's on-chip FIFO through any
//! `embedded-hal` 1.0 [`SpiDevice`](embedded_hal::spi::SpiDevice), keeps the
//! device configuration continuously verified, and hands timestamped batches
//! of m/s² samples to a [`SampleConsumer`].
//!
//! # Quick Start
//!
//! ## Driving ticks yourself
//! ```no_run
//! use bmi088_accel_acquisition::{AcquisitionConfig, Bmi088Accel, SampleBatch};
//! use std::time::Instant;
//! # fn open_spi() -> embedded_hal_spi_stub::Spi { unimplemented!() }
//! # mod embedded_hal_spi_stub {
//! #     pub struct Spi;
//! #     impl embedded_hal::spi::ErrorType for Spi { type Error = embedded_hal::spi::ErrorKind; }
//! #     impl embedded_hal::spi::SpiDevice for Spi {
//! #         fn transaction(&mut self, _: &mut [embedded_hal::spi::Operation<'_, u8>]) -> Result<(), Self::Error> { Ok(()) }
//! #     }
//! # }
//!
//! let mut accel = Bmi088Accel::new(open_spi(), Vec::<SampleBatch>::new(), AcquisitionConfig::default())?;
//! accel.initialize()?;
//!
//! for _ in 0..100 {
//!     accel.tick(Instant::now())?;
//!     std::thread::sleep(accel.config().transfer_interval());
//! }
//!
//! let total: usize = accel.consumer().iter().map(|b| b.len()).sum();
//! println!("Collected {} samples", total);
//! # Ok::<(), bmi088_accel_acquisition::AccelError>(())
//! ```
//!
//! ## Background acquisition thread
//! ```no_run
//! use bmi088_accel_acquisition::{
//!     task, AcquisitionConfig, Bmi088Accel, ChannelConsumer, SampleMessage,
//! };
//! use std::sync::mpsc;
//! # fn open_spi() -> embedded_hal_spi_stub::Spi { unimplemented!() }
//! # mod embedded_hal_spi_stub {
//! #     pub struct Spi;
//! #     impl embedded_hal::spi::ErrorType for Spi { type Error = embedded_hal::spi::ErrorKind; }
//! #     impl embedded_hal::spi::SpiDevice for Spi {
//! #         fn transaction(&mut self, _: &mut [embedded_hal::spi::Operation<'_, u8>]) -> Result<(), Self::Error> { Ok(()) }
//! #     }
//! # }
//!
//! let (tx, rx) = mpsc::channel();
//! let config = AcquisitionConfig { data_ready: true, ..Default::default() };
//! let accel = Bmi088Accel::new(open_spi(), ChannelConsumer::new(tx), config)?;
//! let handle = task::spawn(accel);
//!
//! // Call from whatever watches the INT1 pin
//! let drdy = handle.data_ready_signal();
//! drdy.notify();
//!
//! for message in rx.iter().take(10) {
//!     match message {
//!         SampleMessage::Batch(batch) => {
//!             let last = batch.samples.last().unwrap();
//!             println!("{} samples, newest |a| = {:.2} m/s²", batch.len(), last.magnitude());
//!         }
//!         SampleMessage::Temperature(celsius) => println!("die at {:.1} C", celsius),
//!     }
//! }
//!
//! println!("{}", handle.print_info()?);
//! handle.shutdown();
//! # Ok::<(), bmi088_accel_acquisition::AccelError>(())
//! ```

pub mod bmi088;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod counters;
pub mod error;
pub mod fifo;
pub mod registers;
pub mod state;
pub mod task;
pub mod verifier;

#[cfg(feature = "storage")]
pub mod hdf5_format;

#[cfg(test)]
mod sim;

// Re-export public API
pub use bmi088::{Bmi088Accel, DataReadyLine, Diagnostics, Schedule};
pub use config::{AccelRange, AcquisitionConfig, OutputDataRate};
pub use consumer::{ChannelConsumer, SampleBatch, SampleConsumer, SampleMessage};
pub use counters::{CounterSnapshot, Counters};
pub use error::{AccelError, BusError, Result};
pub use fifo::AccelSample;
pub use state::AcquisitionState;
pub use task::{AcquisitionHandle, DataReadySignal};

#[cfg(feature = "storage")]
pub use hdf5_format::{Hdf5Reader, Hdf5Writer, Metadata, StoredSample};
