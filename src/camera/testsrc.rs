//! Synthetic video source for development without a camera.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CameraError, VideoSource};
use crate::core::{Frame, PixelFormat};

/// Configuration for the synthetic source.
#[derive(Debug, Clone)]
pub struct TestSourceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl Default for TestSourceConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 25,
            format: PixelFormat::Rgb24,
        }
    }
}

/// Generates a moving gradient pattern at a fixed rate.
pub struct TestSource {
    config: TestSourceConfig,
    cancel: Option<CancellationToken>,
}

impl TestSource {
    pub fn new(config: TestSourceConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }
}

impl VideoSource for TestSource {
    fn start(&mut self) -> Result<mpsc::Receiver<Frame>, CameraError> {
        if self.cancel.is_some() {
            return Err(CameraError::AlreadyStarted);
        }

        let config = self.config.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (tx, rx) = mpsc::channel(config.fps.max(1) as usize);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_micros(1_000_000 / config.fps.max(1) as u64));
            let start = tokio::time::Instant::now();
            let mut sequence = 0u64;

            info!(
                "Test video source started: {}x{} @ {}fps",
                config.width, config.height, config.fps
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Test source cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let frame = pattern_frame(&config, sequence)
                            .with_timestamp(start.elapsed().as_micros() as u64);
                        if tx.send(frame).await.is_err() {
                            info!("Test source receiver dropped");
                            break;
                        }
                        sequence += 1;
                    }
                }
            }

            info!("Test video source stopped after {} frames", sequence);
        });

        self.cancel = Some(cancel);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deterministic moving gradient; pixel values depend only on the
/// coordinates and the sequence number.
fn pattern_frame(config: &TestSourceConfig, sequence: u64) -> Frame {
    let bpp = config.format.bytes_per_pixel();
    let mut pixels = vec![0u8; config.width as usize * config.height as usize * bpp];
    let shift = (sequence * 3) as u32;

    for y in 0..config.height {
        for x in 0..config.width {
            let idx = ((y * config.width + x) as usize) * bpp;
            pixels[idx] = ((x + shift) & 0xFF) as u8;
            pixels[idx + 1] = ((y + shift) & 0xFF) as u8;
            pixels[idx + 2] = ((x + y) & 0xFF) as u8;
            if bpp == 4 {
                pixels[idx + 3] = 0xFF;
            }
        }
    }

    Frame::new(config.width, config.height, config.format, pixels.into()).with_sequence(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_deterministic_per_sequence() {
        let config = TestSourceConfig::default();
        assert_eq!(
            pattern_frame(&config, 4).pixels,
            pattern_frame(&config, 4).pixels
        );
        assert_ne!(
            pattern_frame(&config, 4).pixels,
            pattern_frame(&config, 5).pixels
        );
        assert!(pattern_frame(&config, 0).is_valid());
    }

    #[tokio::test]
    async fn source_delivers_sequenced_frames_until_stopped() {
        let mut source = TestSource::new(TestSourceConfig {
            width: 16,
            height: 16,
            fps: 200,
            format: PixelFormat::Rgb24,
        });
        let mut rx = source.start().unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert!(second.timestamp_us >= first.timestamp_us);

        assert!(matches!(
            source.start().unwrap_err(),
            CameraError::AlreadyStarted
        ));

        source.stop();
        // Channel drains, then closes
        while rx.recv().await.is_some() {}
    }
}
