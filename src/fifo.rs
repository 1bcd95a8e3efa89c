//! FIFO length classification, frame parsing and sample timestamping
//!
//! Everything here is pure: the engine reads the bytes, these functions
//! decide what they mean.

use std::time::{Duration, Instant};

use crate::error::{AccelError, Result};
use crate::registers::{header, FIFO_FRAME_SIZE, FIFO_SIZE, TRANSFER_HEADER_SIZE};

/// One accelerometer sample in m/s^2
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub timestamp: Instant,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    /// Magnitude of the acceleration vector
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// What the FIFO_LENGTH registers say is waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoLevel {
    Empty,
    /// Frames to transfer, already clamped to the transfer capacity
    Samples(usize),
    /// More data than the device can hold; never parsed
    Overflow { samples: usize },
}

/// Combine FIFO_LENGTH_0/1 into the 14-bit byte count
pub fn fifo_length_bytes(lsb: u8, msb: u8) -> u16 {
    u16::from_le_bytes([lsb, msb & 0x3F])
}

/// Classify a FIFO byte count.
///
/// `device_capacity` bounds what the FIFO may legitimately hold, anything
/// above it is an overflow. `consumer_capacity` only limits how much is taken
/// in one transfer; the rest stays queued for the next cycle.
pub fn classify_fifo_length(
    bytes: u16,
    device_capacity: usize,
    consumer_capacity: usize,
) -> FifoLevel {
    let samples = bytes as usize / FIFO_FRAME_SIZE;

    if bytes as usize >= FIFO_SIZE || samples > device_capacity {
        FifoLevel::Overflow { samples }
    } else if samples == 0 {
        FifoLevel::Empty
    } else {
        FifoLevel::Samples(samples.min(consumer_capacity))
    }
}

/// Where a batch stopped being trustworthy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadFrame {
    /// Payload offset of the offending header
    pub offset: usize,
    pub header: u8,
}

/// Decoded contents of one bulk FIFO transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFifo {
    /// Raw X/Y/Z of every frame before the first bad one, oldest first
    pub raw: Vec<[i16; 3]>,
    pub bad_frame: Option<BadFrame>,
    /// Last sensor-time frame seen, 24 bits
    pub sensor_time: Option<u32>,
}

/// Walk the frames of a bulk transfer buffer.
///
/// `buf` still carries the command and dummy byte. Its length must be exactly
/// `2 + expected_frames * 7`, anything else is rejected before indexing.
pub fn parse_fifo(buf: &[u8], expected_frames: usize) -> Result<ParsedFifo> {
    let expected = TRANSFER_HEADER_SIZE + expected_frames * FIFO_FRAME_SIZE;
    if buf.len() != expected {
        return Err(AccelError::TransferError {
            expected,
            actual: buf.len(),
        });
    }

    let payload = &buf[TRANSFER_HEADER_SIZE..];
    let mut parsed = ParsedFifo {
        raw: Vec::with_capacity(expected_frames),
        ..Default::default()
    };

    let mut offset = 0;
    while offset < payload.len() {
        let tag = payload[offset];
        let remaining = payload.len() - offset;

        let frame_len = if tag & header::ACCEL_MASK == header::ACCEL {
            FIFO_FRAME_SIZE
        } else {
            match tag {
                header::SKIP | header::CONFIG_CHANGE | header::DROP => 2,
                header::SENSOR_TIME => 4,
                _ => {
                    parsed.bad_frame = Some(BadFrame { offset, header: tag });
                    break;
                }
            }
        };

        // Truncated by the end of the transfer
        if remaining < frame_len {
            break;
        }

        let frame = &payload[offset..offset + frame_len];
        match tag {
            header::SENSOR_TIME => {
                parsed.sensor_time = Some(u32::from_le_bytes([frame[1], frame[2], frame[3], 0]));
            }
            t if t & header::ACCEL_MASK == header::ACCEL => {
                parsed.raw.push([
                    i16::from_le_bytes([frame[1], frame[2]]),
                    i16::from_le_bytes([frame[3], frame[4]]),
                    i16::from_le_bytes([frame[5], frame[6]]),
                ]);
            }
            _ => {}
        }
        offset += frame_len;
    }

    Ok(parsed)
}

/// Timestamp of sample `index` out of `count`, given the capture time of the
/// newest one: `capture - (count - 1 - index) * interval`
pub fn sample_timestamp(
    capture: Instant,
    index: usize,
    count: usize,
    interval: Duration,
) -> Instant {
    let age = count.saturating_sub(1).saturating_sub(index) as u32;
    capture.checked_sub(interval * age).unwrap_or(capture)
}

/// Scale and timestamp raw frames, oldest first
pub fn to_samples(
    raw: &[[i16; 3]],
    capture: Instant,
    interval: Duration,
    scale: f32,
) -> Vec<AccelSample> {
    let count = raw.len();
    raw.iter()
        .enumerate()
        .map(|(i, [x, y, z])| AccelSample {
            timestamp: sample_timestamp(capture, i, count, interval),
            x: *x as f32 * scale,
            y: *y as f32 * scale,
            z: *z as f32 * scale,
        })
        .collect()
}

/// Convert TEMP_MSB/TEMP_LSB to degrees Celsius
pub fn temperature_celsius(msb: u8, lsb: u8) -> f32 {
    let mut raw = (msb as i16) * 8 + (lsb >> 5) as i16;
    if raw > 1023 {
        raw -= 2048;
    }
    raw as f32 * 0.125 + 23.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(x: i16, y: i16, z: i16) -> Vec<u8> {
        let mut f = vec![header::ACCEL];
        f.extend(x.to_le_bytes());
        f.extend(y.to_le_bytes());
        f.extend(z.to_le_bytes());
        f
    }

    fn transfer(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0xA6, 0xFF];
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_fifo_length_masks_upper_bits() {
        assert_eq!(fifo_length_bytes(0x23, 0x00), 35);
        assert_eq!(fifo_length_bytes(0x00, 0xC4), 0x0400);
        assert_eq!(fifo_length_bytes(0xFF, 0xFF), 0x3FFF);
    }

    #[test]
    fn test_classify_happy_path() {
        assert_eq!(classify_fifo_length(35, 10, 20), FifoLevel::Samples(5));
        assert_eq!(classify_fifo_length(0, 10, 20), FifoLevel::Empty);
        // partial frame only
        assert_eq!(classify_fifo_length(6, 10, 20), FifoLevel::Empty);
    }

    #[test]
    fn test_classify_overflow() {
        assert_eq!(classify_fifo_length(105, 10, 20), FifoLevel::Overflow { samples: 15 });
        assert_eq!(
            classify_fifo_length(FIFO_SIZE as u16, 146, 146),
            FifoLevel::Overflow { samples: 146 }
        );
    }

    #[test]
    fn test_classify_monotonic_and_bounded() {
        let (device, consumer) = (10, 6);
        let mut previous = 0;
        for bytes in 0..=(device * FIFO_FRAME_SIZE + 6) as u16 {
            let samples = match classify_fifo_length(bytes, device, consumer) {
                FifoLevel::Empty => 0,
                FifoLevel::Samples(n) => n,
                FifoLevel::Overflow { .. } => panic!("overflow at {} bytes", bytes),
            };
            assert!(samples >= previous);
            assert!(samples <= device.min(consumer));
            previous = samples;
        }
    }

    #[test]
    fn test_parse_frames() {
        let mut payload = frame(1, -2, 3);
        payload.extend(frame(100, 200, -300));
        let parsed = parse_fifo(&transfer(&payload), 2).unwrap();
        assert_eq!(parsed.raw, vec![[1, -2, 3], [100, 200, -300]]);
        assert_eq!(parsed.bad_frame, None);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let buf = transfer(&frame(1, 2, 3));
        assert!(matches!(
            parse_fifo(&buf, 2),
            Err(AccelError::TransferError { expected: 16, actual: 9 })
        ));
    }

    #[test]
    fn test_interrupt_tag_bits_accepted() {
        let mut payload = frame(5, 6, 7);
        payload[0] = header::ACCEL | 0x03;
        let parsed = parse_fifo(&transfer(&payload), 1).unwrap();
        assert_eq!(parsed.raw, vec![[5, 6, 7]]);
    }

    #[test]
    fn test_bad_frame_truncates_batch() {
        let mut payload = frame(1, 1, 1);
        payload.extend(frame(2, 2, 2));
        payload.extend([header::NOT_READY; 7]);
        payload.extend(frame(4, 4, 4));

        let parsed = parse_fifo(&transfer(&payload), 4).unwrap();
        assert_eq!(parsed.raw, vec![[1, 1, 1], [2, 2, 2]]);
        assert_eq!(
            parsed.bad_frame,
            Some(BadFrame { offset: 14, header: header::NOT_READY })
        );
    }

    #[test]
    fn test_unknown_header_is_bad() {
        let mut payload = vec![0x12; 7];
        payload.extend(frame(1, 2, 3));
        let parsed = parse_fifo(&transfer(&payload), 2).unwrap();
        assert!(parsed.raw.is_empty());
        assert_eq!(parsed.bad_frame.map(|b| b.offset), Some(0));
    }

    #[test]
    fn test_control_frames_consumed() {
        let mut payload = vec![header::SKIP, 0x01, header::DROP, 0x00];
        payload.extend(frame(9, 8, 7));
        payload.extend([header::SENSOR_TIME, 0x34, 0x12, 0x00]);
        payload.extend([header::CONFIG_CHANGE, 0x01]);
        payload.extend([header::SKIP, 0x00, header::SKIP, 0x00]);
        assert_eq!(payload.len(), 3 * FIFO_FRAME_SIZE);
        let parsed = parse_fifo(&transfer(&payload), 3).unwrap();
        assert_eq!(parsed.raw, vec![[9, 8, 7]]);
        assert_eq!(parsed.sensor_time, Some(0x1234));
        assert_eq!(parsed.bad_frame, None);
    }

    #[test]
    fn test_truncated_frame_ends_without_error() {
        let mut payload = vec![header::SKIP, 0x00];
        payload.extend(frame(1, 2, 3));
        payload.extend(&frame(4, 5, 6)[..5]);
        let parsed = parse_fifo(&transfer(&payload), 2).unwrap();
        assert_eq!(parsed.raw, vec![[1, 2, 3]]);
        assert_eq!(parsed.bad_frame, None);
    }

    #[test]
    fn test_timestamp_distribution() {
        let capture = Instant::now();
        let interval = Duration::from_micros(625);
        let raw = vec![[0i16; 3]; 4];
        let samples = to_samples(&raw, capture, interval, 1.0);

        assert_eq!(samples[3].timestamp, capture);
        for (k, sample) in samples.iter().enumerate() {
            assert_eq!(capture - sample.timestamp, interval * (3 - k) as u32);
        }
    }

    #[test]
    fn test_scaling() {
        let scale = crate::AccelRange::G24.scale();
        let samples = to_samples(&[[32767, -32768, 0]], Instant::now(), Duration::ZERO, scale);
        assert!((samples[0].x - 24.0 * 9.80665).abs() < 0.01);
        assert!((samples[0].y + 24.0 * 9.80665).abs() < 0.01);
        assert_eq!(samples[0].z, 0.0);
    }

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(temperature_celsius(0x00, 0x00), 23.0);
        assert_eq!(temperature_celsius(0x03, 0x20), 26.125);
        assert_eq!(temperature_celsius(0x7F, 0xE0), 150.875);
        assert_eq!(temperature_celsius(0xFF, 0xE0), 22.875);
        assert_eq!(temperature_celsius(0x80, 0x00), -105.0);
    }
}
