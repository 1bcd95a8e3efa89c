//! HDF5 file format for accelerometer data storage
//!
//! Provides a writer that plugs in as a [`SampleConsumer`] and a reader for
//! getting the data back out.

use std::path::Path;
use std::time::{Duration, Instant};

use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group};
use log::error;

use crate::config::AcquisitionConfig;
use crate::consumer::{SampleBatch, SampleConsumer};
use crate::error::{AccelError, Result};

const FORMAT_VERSION: &str = "1.0";
const CHUNK_SIZE: usize = 1024;
const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Accelerometer sample as stored on disk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredSample {
    /// Seconds since the writer was created
    pub timestamp: f64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Metadata stored in HDF5 file
#[derive(Debug, Clone)]
pub struct Metadata {
    pub start_time: String, // ISO 8601 timestamp
    pub odr_hz: f64,
    pub range_g: f64,
    pub transfer_rate_hz: f64,
    pub version: String,
}

fn storage_err(what: &str, e: impl std::fmt::Display) -> AccelError {
    AccelError::Storage(format!("{}: {}", what, e))
}

fn unicode(value: &str) -> Result<VarLenUnicode> {
    value
        .parse::<VarLenUnicode>()
        .map_err(|e| storage_err("Invalid attribute string", e))
}

struct DatasetHandles {
    timestamps: Dataset,
    accel_x: Dataset,
    accel_y: Dataset,
    accel_z: Dataset,
}

/// HDF5 writer for accelerometer batches
pub struct Hdf5Writer {
    file: File,
    datasets: DatasetHandles,
    temperature_timestamps: Dataset,
    temperature: Dataset,
    start_time: Instant,
    last_flush: Instant,
    sample_count: usize,
    temperature_count: usize,
    write_errors: usize,
}

impl Hdf5Writer {
    /// Create a new HDF5 file, recording the acquisition settings as metadata
    pub fn create<P: AsRef<Path>>(path: P, config: &AcquisitionConfig) -> Result<Self> {
        let file = File::create(path).map_err(|e| storage_err("Failed to create HDF5 file", e))?;

        let metadata_group = file
            .create_group("metadata")
            .map_err(|e| storage_err("Failed to create metadata group", e))?;

        let start_time = chrono::Local::now().to_rfc3339();
        Self::write_string_attr(&metadata_group, "start_time", &start_time)?;
        Self::write_f64_attr(&metadata_group, "odr_hz", config.odr.hz() as f64)?;
        Self::write_f64_attr(&metadata_group, "range_g", config.range.g() as f64)?;
        Self::write_f64_attr(&metadata_group, "transfer_rate_hz", config.transfer_rate_hz as f64)?;
        Self::write_string_attr(&metadata_group, "version", FORMAT_VERSION)?;

        let data_group = file
            .create_group("accel_data")
            .map_err(|e| storage_err("Failed to create accel_data group", e))?;

        let datasets = DatasetHandles {
            timestamps: Self::create_dataset::<f64>(&data_group, "timestamps")?,
            accel_x: Self::create_dataset::<f32>(&data_group, "accel_x")?,
            accel_y: Self::create_dataset::<f32>(&data_group, "accel_y")?,
            accel_z: Self::create_dataset::<f32>(&data_group, "accel_z")?,
        };

        let temp_group = file
            .create_group("temperature")
            .map_err(|e| storage_err("Failed to create temperature group", e))?;
        let temperature_timestamps = Self::create_dataset::<f64>(&temp_group, "timestamps")?;
        let temperature = Self::create_dataset::<f32>(&temp_group, "celsius")?;

        let now = Instant::now();
        Ok(Self {
            file,
            datasets,
            temperature_timestamps,
            temperature,
            start_time: now,
            last_flush: now,
            sample_count: 0,
            temperature_count: 0,
            write_errors: 0,
        })
    }

    fn write_string_attr(group: &Group, name: &str, value: &str) -> Result<()> {
        let value = unicode(value)?;
        group
            .new_attr::<VarLenUnicode>()
            .create(name)
            .and_then(|attr| attr.write_scalar(&value))
            .map_err(|e| storage_err(&format!("Failed to write {}", name), e))
    }

    fn write_f64_attr(group: &Group, name: &str, value: f64) -> Result<()> {
        group
            .new_attr::<f64>()
            .create(name)
            .and_then(|attr| attr.write_scalar(&value))
            .map_err(|e| storage_err(&format!("Failed to write {}", name), e))
    }

    /// Create a resizable, chunked, compressed dataset
    fn create_dataset<T: hdf5::H5Type>(group: &Group, name: &str) -> Result<Dataset> {
        group
            .new_dataset::<T>()
            .shape((0..,))
            .chunk((CHUNK_SIZE,))
            .deflate(4)
            .create(name)
            .map_err(|e| storage_err(&format!("Failed to create dataset {}", name), e))
    }

    /// Seconds between writer creation and `at`, negative if earlier
    fn relative_secs(&self, at: Instant) -> f64 {
        match at.checked_duration_since(self.start_time) {
            Some(after) => after.as_secs_f64(),
            None => -self.start_time.duration_since(at).as_secs_f64(),
        }
    }

    /// Append one batch
    pub fn append_batch(&mut self, batch: &SampleBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let new_size = self.sample_count + batch.len();

        let timestamps: Vec<f64> = batch
            .samples
            .iter()
            .map(|s| self.relative_secs(s.timestamp))
            .collect();
        let accel_x: Vec<f32> = batch.samples.iter().map(|s| s.x).collect();
        let accel_y: Vec<f32> = batch.samples.iter().map(|s| s.y).collect();
        let accel_z: Vec<f32> = batch.samples.iter().map(|s| s.z).collect();

        Self::append_to_dataset(&self.datasets.timestamps, new_size, &timestamps)?;
        Self::append_to_dataset(&self.datasets.accel_x, new_size, &accel_x)?;
        Self::append_to_dataset(&self.datasets.accel_y, new_size, &accel_y)?;
        Self::append_to_dataset(&self.datasets.accel_z, new_size, &accel_z)?;

        self.sample_count = new_size;
        Ok(())
    }

    /// Append one temperature reading, timestamped now
    pub fn append_temperature(&mut self, celsius: f32) -> Result<()> {
        let new_size = self.temperature_count + 1;
        let timestamp = self.relative_secs(Instant::now());
        Self::append_to_dataset(&self.temperature_timestamps, new_size, &[timestamp])?;
        Self::append_to_dataset(&self.temperature, new_size, &[celsius])?;
        self.temperature_count = new_size;
        Ok(())
    }

    fn append_to_dataset<T: hdf5::H5Type>(
        dataset: &Dataset,
        new_size: usize,
        data: &[T],
    ) -> Result<()> {
        dataset
            .resize((new_size,))
            .map_err(|e| storage_err("Failed to resize dataset", e))?;

        let start = new_size - data.len();
        dataset
            .write_slice(data, start..)
            .map_err(|e| storage_err("Failed to write to dataset", e))
    }

    /// Flush data to disk
    pub fn flush(&mut self) -> Result<()> {
        self.last_flush = Instant::now();
        self.file.flush().map_err(|e| storage_err("Failed to flush HDF5 file", e))
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Batches or readings that could not be written
    pub fn write_errors(&self) -> usize {
        self.write_errors
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn record_failure(&mut self, e: AccelError) {
        self.write_errors += 1;
        error!("HDF5 write failed: {}", e);
    }
}

impl SampleConsumer for Hdf5Writer {
    fn publish(&mut self, batch: SampleBatch) {
        if let Err(e) = self.append_batch(&batch) {
            self.record_failure(e);
            return;
        }
        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            if let Err(e) = self.flush() {
                self.record_failure(e);
            }
        }
    }

    fn update_temperature(&mut self, celsius: f32) {
        if let Err(e) = self.append_temperature(celsius) {
            self.record_failure(e);
        }
    }
}

impl Drop for Hdf5Writer {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            error!("Final HDF5 flush failed: {}", e);
        }
    }
}

/// HDF5 reader for collected accelerometer data
pub struct Hdf5Reader {
    #[allow(dead_code)]
    file: File,
    datasets: DatasetHandles,
    metadata: Metadata,
}

impl Hdf5Reader {
    /// Open an existing HDF5 file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(|e| storage_err("Failed to open HDF5 file", e))?;
        let metadata = Self::read_metadata(&file)?;

        let data_group = file
            .group("accel_data")
            .map_err(|e| storage_err("Failed to open accel_data group", e))?;
        let open = |name: &str| {
            data_group
                .dataset(name)
                .map_err(|e| storage_err(&format!("Failed to open {} dataset", name), e))
        };

        let datasets = DatasetHandles {
            timestamps: open("timestamps")?,
            accel_x: open("accel_x")?,
            accel_y: open("accel_y")?,
            accel_z: open("accel_z")?,
        };

        Ok(Self {
            file,
            datasets,
            metadata,
        })
    }

    fn read_metadata(file: &File) -> Result<Metadata> {
        let group = file
            .group("metadata")
            .map_err(|e| storage_err("Failed to open metadata group", e))?;

        let read_string = |name: &str| {
            group
                .attr(name)
                .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
                .map(|s| s.to_string())
                .map_err(|e| storage_err(&format!("Failed to read {}", name), e))
        };
        let read_f64 = |name: &str| {
            group
                .attr(name)
                .and_then(|attr| attr.read_scalar::<f64>())
                .map_err(|e| storage_err(&format!("Failed to read {}", name), e))
        };

        Ok(Metadata {
            start_time: read_string("start_time")?,
            odr_hz: read_f64("odr_hz")?,
            range_g: read_f64("range_g")?,
            transfer_rate_hz: read_f64("transfer_rate_hz")?,
            version: read_string("version")?,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn total_samples(&self) -> usize {
        self.datasets.timestamps.size()
    }

    /// Read a range of samples
    pub fn read_range(&self, start: usize, count: usize) -> Result<Vec<StoredSample>> {
        let total = self.total_samples();
        if start >= total {
            return Ok(Vec::new());
        }
        let end = start + count.min(total - start);

        let timestamps = Self::read_slice::<f64>(&self.datasets.timestamps, start, end)?;
        let accel_x = Self::read_slice::<f32>(&self.datasets.accel_x, start, end)?;
        let accel_y = Self::read_slice::<f32>(&self.datasets.accel_y, start, end)?;
        let accel_z = Self::read_slice::<f32>(&self.datasets.accel_z, start, end)?;

        Ok(timestamps
            .into_iter()
            .zip(accel_x)
            .zip(accel_y)
            .zip(accel_z)
            .map(|(((timestamp, x), y), z)| StoredSample { timestamp, x, y, z })
            .collect())
    }

    fn read_slice<T: hdf5::H5Type>(dataset: &Dataset, start: usize, end: usize) -> Result<Vec<T>> {
        dataset
            .read_slice_1d::<T, _>(start..end)
            .map(|array| array.to_vec())
            .map_err(|e| storage_err("Failed to read dataset", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::AccelSample;

    #[test]
    fn test_write_then_read_back() {
        let path = std::env::temp_dir().join(format!("bmi088-test-{}.h5", std::process::id()));
        let config = AcquisitionConfig::default();

        let mut writer = Hdf5Writer::create(&path, &config).unwrap();
        let now = Instant::now();
        let batch = SampleBatch {
            samples: (0..4)
                .map(|i| AccelSample {
                    timestamp: now + Duration::from_micros(625 * i),
                    x: i as f32,
                    y: -(i as f32),
                    z: 9.81,
                })
                .collect(),
            interval: Duration::from_micros(625),
            sensor_time: None,
        };
        writer.publish(batch.clone());
        writer.publish(batch);
        writer.update_temperature(24.5);
        assert_eq!(writer.sample_count(), 8);
        assert_eq!(writer.write_errors(), 0);
        drop(writer);

        let reader = Hdf5Reader::open(&path).unwrap();
        assert_eq!(reader.metadata().odr_hz, 1600.0);
        assert_eq!(reader.metadata().range_g, 24.0);
        assert_eq!(reader.total_samples(), 8);

        let samples = reader.read_range(2, 3).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].x, 2.0);
        assert_eq!(samples[0].y, -2.0);
        assert!(samples[1].timestamp > samples[0].timestamp);
        assert!(reader.read_range(8, 1).unwrap().is_empty());

        let _ = std::fs::remove_file(&path);
    }
}
