//! Downstream sample consumers

use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::fifo::AccelSample;

/// One validated FIFO transfer, oldest sample first
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub samples: Vec<AccelSample>,
    /// Spacing between consecutive samples
    pub interval: Duration,
    /// Sensor time frame that trailed the batch, if any
    pub sensor_time: Option<u32>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Receiver of acquired data.
///
/// Called from the acquisition thread. Batches are never revised once
/// published and never empty.
pub trait SampleConsumer: Send {
    fn publish(&mut self, batch: SampleBatch);

    /// Periodic die temperature in degrees Celsius
    fn update_temperature(&mut self, _celsius: f32) {}
}

impl SampleConsumer for Vec<SampleBatch> {
    fn publish(&mut self, batch: SampleBatch) {
        self.push(batch);
    }
}

/// What a [`ChannelConsumer`] sends downstream
#[derive(Debug, Clone, PartialEq)]
pub enum SampleMessage {
    Batch(SampleBatch),
    Temperature(f32),
}

/// Forwards batches and temperature readings over an mpsc channel
pub struct ChannelConsumer {
    tx: Sender<SampleMessage>,
    disconnected: bool,
}

impl ChannelConsumer {
    pub fn new(tx: Sender<SampleMessage>) -> Self {
        Self {
            tx,
            disconnected: false,
        }
    }

    fn send(&mut self, message: SampleMessage) {
        if self.tx.send(message).is_err() && !self.disconnected {
            log::warn!("Sample receiver dropped, discarding further data");
            self.disconnected = true;
        }
    }
}

impl SampleConsumer for ChannelConsumer {
    fn publish(&mut self, batch: SampleBatch) {
        self.send(SampleMessage::Batch(batch));
    }

    fn update_temperature(&mut self, celsius: f32) {
        self.send(SampleMessage::Temperature(celsius));
    }
}
