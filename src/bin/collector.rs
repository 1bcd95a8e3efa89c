//! BMI088 Accelerometer Data Collector
//!
//! Streams the accelerometer FIFO over Linux spidev, prints a status line
//! every second and, with the `storage` feature, writes to an HDF5 file.
//!
//! Usage:
//!   collector --device /dev/spidev0.0 --range 24 --odr 1600 --rate 400 --duration 60

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bmi088_accel_acquisition::{
    task, AccelRange, AcquisitionConfig, Bmi088Accel, ChannelConsumer, OutputDataRate,
    SampleMessage,
};
use clap::Parser;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::SpidevDevice;
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "Collect BMI088 accelerometer data over SPI", long_about = None)]
struct Args {
    /// spidev node the accelerometer chip select is wired to
    #[arg(long, default_value = "/dev/spidev0.0")]
    device: String,

    /// SPI clock in Hz (BMI088 supports up to 10 MHz)
    #[arg(long, default_value = "10000000")]
    speed: u32,

    /// Measurement range in g: 3, 6, 12 or 24
    #[arg(short = 'g', long, default_value = "24")]
    range: u32,

    /// Output data rate in Hz: 12, 25, 50, 100, 200, 400, 800 or 1600
    #[arg(long, default_value = "1600")]
    odr: u32,

    /// FIFO drain rate in Hz
    #[arg(short, long, default_value = "400")]
    rate: u32,

    /// Duration in seconds (optional, runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Output HDF5 file path
    #[cfg(feature = "storage")]
    #[arg(short, long)]
    output: Option<std::path::PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = AcquisitionConfig {
        range: AccelRange::from_g(args.range)?,
        odr: OutputDataRate::from_hz(args.odr)?,
        transfer_rate_hz: args.rate,
        ..Default::default()
    };
    config.validate()?;

    println!("BMI088 Accelerometer Collector");
    println!("==============================");
    println!("Device: {} @ {} Hz", args.device, args.speed);
    println!("Range: {} g", config.range.g());
    println!("ODR: {} Hz", config.odr.hz());
    println!(
        "Transfer: {} samples every {:?}",
        config.samples_per_transfer(),
        config.transfer_interval()
    );
    match args.duration {
        Some(duration) => println!("Duration: {} seconds", duration),
        None => println!("Duration: continuous (Ctrl+C to stop)"),
    }
    println!();

    let mut spi = SpidevDevice::open(&args.device)
        .map_err(|e| format!("Failed to open {}: {:?}", args.device, e))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(args.speed)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.0.configure(&options)?;

    #[cfg(feature = "storage")]
    let mut writer = match &args.output {
        Some(path) => {
            println!("Output file: {}", path.display());
            Some(bmi088_accel_acquisition::Hdf5Writer::create(path, &config)?)
        }
        None => None,
    };

    let (tx, rx) = mpsc::channel();
    let mut accel = Bmi088Accel::new(spi, ChannelConsumer::new(tx), config)?;

    println!("Initializing sensor...");
    accel.initialize()?;
    println!("Sensor initialized!\n");

    let handle = task::spawn(accel);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping collection...");
        r.store(false, Ordering::SeqCst);
    })?;

    let collection_start = Instant::now();
    let end_time = args.duration.map(|d| collection_start + Duration::from_secs(d));
    let mut last_status = Instant::now();
    let mut total_samples = 0usize;
    let mut latest = None;
    let mut temperature = None;

    while running.load(Ordering::SeqCst) {
        if end_time.is_some_and(|end| Instant::now() >= end) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(SampleMessage::Batch(batch)) => {
                total_samples += batch.len();
                latest = batch.samples.last().copied();

                #[cfg(feature = "storage")]
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.append_batch(&batch) {
                        warn!("Write error: {}", e);
                    }
                }
            }
            Ok(SampleMessage::Temperature(celsius)) => {
                temperature = Some(celsius);

                #[cfg(feature = "storage")]
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.append_temperature(celsius) {
                        warn!("Write error: {}", e);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Acquisition thread exited");
                break;
            }
        }

        if last_status.elapsed() >= Duration::from_secs(1) {
            last_status = Instant::now();
            let counters = handle.counters().snapshot();
            let rate = total_samples as f64 / collection_start.elapsed().as_secs_f64();
            match latest {
                Some(s) => println!(
                    "{:8} samples ({:7.1} Hz)  x {:+8.3}  y {:+8.3}  z {:+8.3} m/s² {} errors {}",
                    total_samples,
                    rate,
                    s.x,
                    s.y,
                    s.z,
                    temperature.map_or_else(|| "-- C".to_string(), |t| format!("{:.1} C", t)),
                    counters.errors()
                ),
                None => println!("{:8} samples, waiting for data...", total_samples),
            }
        }
    }

    handle.stop()?;
    let diagnostics = handle.print_info()?;
    handle.shutdown();

    #[cfg(feature = "storage")]
    if let Some(mut w) = writer {
        w.flush()?;
        info!(
            "Wrote {} samples over {:.1} s ({} write errors)",
            w.sample_count(),
            w.elapsed_secs(),
            w.write_errors()
        );
    }

    let elapsed = collection_start.elapsed().as_secs_f64();
    println!("\nCollection complete!");
    println!("Total samples: {}", total_samples);
    println!("Elapsed time: {:.2} seconds", elapsed);
    println!("Actual sample rate: {:.1} Hz", total_samples as f64 / elapsed);
    println!("\n{}", diagnostics);
    info!("Collector finished");

    Ok(())
}
