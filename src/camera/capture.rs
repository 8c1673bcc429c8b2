//! Camera capture via an ffmpeg subprocess.
//!
//! Spawns `ffmpeg` reading the V4L2 device and emitting raw frames on
//! stdout; a blocking reader slices the byte stream into frames and
//! forwards them over a bounded channel.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{CameraError, VideoSource};
use crate::core::{Frame, PixelFormat};

/// Capture configuration for a V4L2 device.
#[derive(Debug, Clone)]
pub struct CameraCaptureConfig {
    /// Device node, e.g. `/dev/video0`
    pub device: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second requested from the device
    pub fps: u32,
    /// Pixel format requested from ffmpeg
    pub format: PixelFormat,
}

impl Default for CameraCaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            format: PixelFormat::Rgb24,
        }
    }
}

/// Handle to a running ffmpeg capture process.
pub struct FfmpegCapture {
    config: CameraCaptureConfig,
    child: Option<Child>,
}

impl FfmpegCapture {
    pub fn new(config: CameraCaptureConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    pub fn config(&self) -> &CameraCaptureConfig {
        &self.config
    }
}

impl VideoSource for FfmpegCapture {
    fn start(&mut self) -> Result<mpsc::Receiver<Frame>, CameraError> {
        if self.child.is_some() {
            return Err(CameraError::AlreadyStarted);
        }

        let config = self.config.clone();
        let args = build_args(&config);

        info!(
            "Starting ffmpeg capture on {}: {}x{} @ {}fps",
            config.device, config.width, config.height, config.fps
        );
        debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CameraError::Start {
                device: config.device.clone(),
                message: format!("failed to spawn ffmpeg: {e}"),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| CameraError::Start {
            device: config.device.clone(),
            message: "failed to capture ffmpeg stdout".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(config.fps.max(1) as usize); // Buffer ~1 second

        // Blocking reader slices stdout into frames
        tokio::task::spawn_blocking(move || {
            read_frame_stream(stdout, tx, &config);
        });

        self.child = Some(child);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("Stopping camera capture");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// ffmpeg argument list for raw frame output on stdout.
fn build_args(config: &CameraCaptureConfig) -> Vec<String> {
    let pix_fmt = match config.format {
        PixelFormat::Rgb24 => "rgb24",
        PixelFormat::Rgba32 => "rgba",
    };
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "v4l2".to_string(),
        "-video_size".to_string(),
        format!("{}x{}", config.width, config.height),
        "-framerate".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        config.device.clone(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        pix_fmt.to_string(),
        "-".to_string(),
    ]
}

/// Read fixed-size frames from `reader` until EOF or the receiver goes
/// away, stamping each with its sequence and capture offset.
fn read_frame_stream<R: Read>(
    mut reader: R,
    tx: mpsc::Sender<Frame>,
    config: &CameraCaptureConfig,
) {
    let frame_len =
        config.width as usize * config.height as usize * config.format.bytes_per_pixel();
    let start = Instant::now();
    let mut sequence = 0u64;

    loop {
        let mut buf = vec![0u8; frame_len];
        if let Err(e) = reader.read_exact(&mut buf) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                info!("Camera stream ended (EOF)");
            } else {
                error!("Error reading camera stream: {}", e);
            }
            break;
        }

        let frame = Frame::new(config.width, config.height, config.format, buf.into())
            .with_sequence(sequence)
            .with_timestamp(start.elapsed().as_micros() as u64);
        sequence += 1;

        if sequence % 100 == 0 {
            debug!("Camera capture: {} frames", sequence);
        }

        if tx.blocking_send(frame).is_err() {
            info!("Frame receiver dropped, stopping capture");
            break;
        }
    }

    info!("Camera capture finished after {} frames", sequence);
}
