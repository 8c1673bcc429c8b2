//! Neurocam Binary
//!
//! Captures camera video, burns the headset's attention/meditation values
//! into each frame, keeps the latest annotated frame on a display channel,
//! and optionally records the annotated stream to a segment file.
//!
//! ## Usage
//!
//! ```bash
//! # Capture from the default camera, record to ./video1.ncv
//! neurocam
//!
//! # Pick the camera and output path
//! NEUROCAM_DEVICE=/dev/video2 neurocam --output session.ncv
//!
//! # Capture without writing a file
//! neurocam --no-record
//!
//! # Print detected cameras as JSON and exit
//! neurocam --list-devices
//!
//! # Development without hardware (needs --features test-source)
//! neurocam --test-source
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use neurocam::{
    display_channel, CameraCaptureConfig, CapturePipeline, FfmpegCapture, FixedDestination,
    PipelineConfig, SegmentFileEncoder, SensorChannel,
};

#[cfg(feature = "test-source")]
use neurocam::{SimulatedSensor, TestSource, TestSourceConfig};

/// Runtime configuration from environment/args
struct Config {
    /// Camera device node; None picks the first enumerated camera
    device: Option<String>,
    /// Recording destination
    output: PathBuf,
    /// Capture settings
    width: u32,
    height: u32,
    fps: u32,
    /// Use the synthetic source instead of a real camera
    test_source: bool,
    /// Write a recording alongside the live display
    record: bool,
    /// Scan for a headset on start
    enable_sensor: bool,
    /// Print detected cameras and exit
    list_devices: bool,
}

impl Config {
    fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let device = std::env::var("NEUROCAM_DEVICE").ok();

        let output = flag_value(&args, "--output")
            .map(PathBuf::from)
            .or_else(|| std::env::var("NEUROCAM_OUTPUT").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("video1.ncv"));

        let width: u32 = std::env::var("NEUROCAM_WIDTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1280);

        let height: u32 = std::env::var("NEUROCAM_HEIGHT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(720);

        let fps: u32 = std::env::var("NEUROCAM_FPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(25);

        let test_source = args.iter().any(|arg| arg == "--test-source");
        let record = !args.iter().any(|arg| arg == "--no-record");
        let enable_sensor = !args.iter().any(|arg| arg == "--no-sensor");
        let list_devices = args.iter().any(|arg| arg == "--list-devices");

        Self {
            device,
            output,
            width,
            height,
            fps,
            test_source,
            record,
            enable_sensor,
            list_devices,
        }
    }
}

/// Value following `flag` in the argument list, if present.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neurocam=info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env();

    if config.list_devices {
        let devices = neurocam::list_devices();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    // No device named: use the first enumerated camera
    let device = match config.device.clone() {
        Some(device) => device,
        None => neurocam::list_devices()
            .first()
            .map(|d| d.id.clone())
            .unwrap_or_else(|| "/dev/video0".to_string()),
    };

    info!("Neurocam starting");
    info!("  Device: {}", device);
    info!("  Video: {}x{} @ {}fps", config.width, config.height, config.fps);
    info!(
        "  Recording: {}",
        if config.record {
            config.output.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!("  Sensor: {}", if config.enable_sensor { "enabled" } else { "disabled" });
    info!("  Test source: {}", config.test_source);

    let (display, mut display_rx) = display_channel();
    let mut pipeline = CapturePipeline::new(
        PipelineConfig {
            frame_rate: config.fps,
            ..Default::default()
        },
        Arc::new(display),
    );

    if config.test_source {
        #[cfg(feature = "test-source")]
        {
            info!("Using synthetic test frames");
            pipeline.select_source(Box::new(TestSource::new(TestSourceConfig {
                fps: config.fps,
                ..Default::default()
            })));
        }
        #[cfg(not(feature = "test-source"))]
        anyhow::bail!("Test source not enabled. Rebuild with --features test-source");
    } else {
        pipeline.select_source(Box::new(FfmpegCapture::new(CameraCaptureConfig {
            device,
            width: config.width,
            height: config.height,
            fps: config.fps,
            ..Default::default()
        })));
    }

    if config.enable_sensor {
        #[cfg(feature = "test-source")]
        {
            info!("Using simulated headset");
            pipeline.attach_sensor(Box::new(SimulatedSensor::new()));
        }
        #[cfg(not(feature = "test-source"))]
        warn!("No headset driver compiled in, overlay values stay at defaults");
    }

    pipeline.attach_encoder(Box::new(SegmentFileEncoder::new()));

    let mut destination = if config.record {
        FixedDestination::path(config.output.clone())
    } else {
        FixedDestination::declined()
    };

    // Graceful shutdown infrastructure
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    // Stand-in for a viewer window: drain the latest-frame channel
    let display_cancel = cancel.clone();
    tracker.spawn(async move {
        let mut frames_shown = 0u64;
        loop {
            tokio::select! {
                _ = display_cancel.cancelled() => {
                    info!("Display task: shutting down");
                    break;
                }
                changed = display_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = display_rx.borrow_and_update().clone();
                    match latest {
                        Some(frame) => {
                            frames_shown += 1;
                            if frames_shown % 100 == 0 {
                                debug!(
                                    "Displayed frame {}: {}x{}",
                                    frame.sequence, frame.width, frame.height
                                );
                            }
                        }
                        None => debug!("Display cleared"),
                    }
                }
            }
        }
        debug!("Display task ended after {} frames", frames_shown);
    });

    // Close the tracker so wait() can complete once all tasks finish
    tracker.close();

    pipeline.start(&mut destination).await?;
    let reader = pipeline.sensor_reader();

    let mut stats_interval = interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, stopping capture...");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = pipeline.stats();
                let sensor_info = if let Some(ref r) = reader {
                    format!(
                        ", attention={:.0}, meditation={:.0}, signal={:.0}",
                        r.read(SensorChannel::Attention),
                        r.read(SensorChannel::Meditation),
                        r.read(SensorChannel::SignalQuality)
                    )
                } else {
                    String::new()
                };
                info!(
                    "Stats: {:?}, {} frames, {} recorded, {} recorder failures{}",
                    pipeline.state(),
                    stats.frames_processed,
                    stats.frames_recorded,
                    stats.recorder_failures,
                    sensor_info
                );
            }
        }
    }

    pipeline.stop().await;
    cancel.cancel();

    // Wait for all tracked tasks to finish (with timeout)
    if tokio::time::timeout(Duration::from_secs(5), tracker.wait())
        .await
        .is_err()
    {
        warn!("Shutdown timed out after 5s, some tasks may not have finished");
    } else {
        info!("All tasks shut down cleanly");
    }

    Ok(())
}
