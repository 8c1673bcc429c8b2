//! Capture pipeline: camera frames in, annotated frames out.
//!
//! One background task consumes the source's frame stream, burns the
//! latest sensor values into each frame, appends to the recorder when
//! a session is open, then publishes to the display sink. Stopping
//! cancels the task and tears down in a fixed order: source, display,
//! recorder, sensor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::{CameraError, VideoSource};
use crate::core::{Frame, SensorChannel};
use crate::display::DisplaySink;
use crate::overlay::{self, OverlayEntry, OverlayStyle};
use crate::record::{Recorder, VideoCodec, VideoEncoder};
use crate::sensor::{SensorConfig, SensorDriver, SensorLink, SensorReader};

/// Picks the output file for a recording; `None` means the user
/// declined and capture proceeds without recording.
pub trait DestinationChooser: Send {
    fn choose(&mut self) -> Option<PathBuf>;
}

/// Chooser with a canned answer, for headless shells and tests.
pub struct FixedDestination(Option<PathBuf>);

impl FixedDestination {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self(Some(path.into()))
    }

    pub fn declined() -> Self {
        Self(None)
    }
}

impl DestinationChooser for FixedDestination {
    fn choose(&mut self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// One channel to burn into frames, and where.
#[derive(Debug, Clone)]
pub struct OverlaySlot {
    pub channel: SensorChannel,
    pub label: String,
    /// Top-left corner of the rendered text
    pub position: (u32, u32),
}

impl OverlaySlot {
    /// Slot labelled with the channel's own name.
    pub fn new(channel: SensorChannel, position: (u32, u32)) -> Self {
        Self {
            channel,
            label: channel.label().to_string(),
            position,
        }
    }
}

/// The standard two-line attention/meditation layout.
pub fn default_overlays() -> Vec<OverlaySlot> {
    vec![
        OverlaySlot::new(SensorChannel::Attention, (10, 25)),
        OverlaySlot::new(SensorChannel::Meditation, (10, 50)),
    ]
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Nominal playback rate written into recordings
    pub frame_rate: u32,
    /// Codec requested for recordings
    pub codec: VideoCodec,
    /// Channels to burn into each frame
    pub overlays: Vec<OverlaySlot>,
    pub style: OverlayStyle,
    /// Serial scan settings for the headset
    pub sensor: SensorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_rate: 25,
            codec: VideoCodec::Raw,
            overlays: default_overlays(),
            style: OverlayStyle::default(),
            sensor: SensorConfig::default(),
        }
    }
}

/// What the pipeline is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    /// Frames flowing, no recording session
    Capturing = 1,
    /// Frames flowing into an open recording
    Recording = 2,
}

fn state_from(value: u8) -> PipelineState {
    match value {
        1 => PipelineState::Capturing,
        2 => PipelineState::Recording,
        _ => PipelineState::Idle,
    }
}

/// Errors that keep a capture run from starting.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no camera selected")]
    NoCameraSelected,
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// Pipeline counters (returned as a snapshot from atomic counters).
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_recorded: u64,
    pub recorder_failures: u64,
}

/// Internal atomic counters for lock-free stats tracking.
struct AtomicPipelineStats {
    frames_processed: AtomicU64,
    frames_recorded: AtomicU64,
    recorder_failures: AtomicU64,
}

impl AtomicPipelineStats {
    fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            frames_recorded: AtomicU64::new(0),
            recorder_failures: AtomicU64::new(0),
        }
    }

    /// Read all atomics and return a plain snapshot.
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_recorded: self.frames_recorded.load(Ordering::Relaxed),
            recorder_failures: self.recorder_failures.load(Ordering::Relaxed),
        }
    }
}

/// Everything owned by one capture run.
struct ActiveRun {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    /// Taken back by `stop` so the camera stays selected
    source: Option<Box<dyn VideoSource>>,
    sensor: Option<SensorLink>,
    recorder: Arc<Mutex<Recorder>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        // Safety net when stop() was never awaited
        self.cancel.cancel();
        if let Some(source) = self.source.as_mut() {
            source.stop();
        }
    }
}

/// Drives capture, overlay, recording and display as one unit.
pub struct CapturePipeline {
    config: PipelineConfig,
    display: Arc<dyn DisplaySink>,
    source: Option<Box<dyn VideoSource>>,
    sensor_driver: Option<Box<dyn SensorDriver>>,
    encoder: Option<Box<dyn VideoEncoder>>,
    state: Arc<AtomicU8>,
    stats: Arc<AtomicPipelineStats>,
    run: Option<ActiveRun>,
}

impl CapturePipeline {
    pub fn new(config: PipelineConfig, display: Arc<dyn DisplaySink>) -> Self {
        Self {
            config,
            display,
            source: None,
            sensor_driver: None,
            encoder: None,
            state: Arc::new(AtomicU8::new(PipelineState::Idle as u8)),
            stats: Arc::new(AtomicPipelineStats::new()),
            run: None,
        }
    }

    /// Select the camera to capture from. Replaces any prior choice,
    /// takes effect on the next `start`, and stays selected across
    /// stop.
    pub fn select_source(&mut self, source: Box<dyn VideoSource>) {
        self.source = Some(source);
    }

    /// Attach the headset driver to connect on the next `start`. That
    /// start consumes the driver; attach another to scan again on a
    /// later run.
    pub fn attach_sensor(&mut self, driver: Box<dyn SensorDriver>) {
        self.sensor_driver = Some(driver);
    }

    /// Attach the encoder for the next recording session.
    pub fn attach_encoder(&mut self, encoder: Box<dyn VideoEncoder>) {
        self.encoder = Some(encoder);
    }

    pub fn state(&self) -> PipelineState {
        state_from(self.state.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Sensor read handle for the current run, if a headset connected.
    pub fn sensor_reader(&self) -> Option<SensorReader> {
        self.run
            .as_ref()
            .and_then(|run| run.sensor.as_ref())
            .map(|link| link.reader())
    }

    /// Start capturing.
    ///
    /// Starts the source, connects the headset (best effort), asks
    /// `chooser` for a destination and spawns the frame task. A
    /// second call while running is ignored. Without a selected source
    /// this reports [`PipelineError::NoCameraSelected`] and stays Idle.
    pub async fn start(
        &mut self,
        chooser: &mut dyn DestinationChooser,
    ) -> Result<(), PipelineError> {
        if self.run.is_some() {
            debug!("Start ignored: pipeline already running");
            return Ok(());
        }

        let Some(mut source) = self.source.take() else {
            return Err(PipelineError::NoCameraSelected);
        };

        // Camera first: a dead device fails the start before the port
        // scan runs or the destination prompt shows
        let rx = match source.start() {
            Ok(rx) => rx,
            Err(e) => {
                // Keep the selection so the caller can retry
                self.source = Some(source);
                return Err(e.into());
            }
        };

        // Headset is optional; capture proceeds with default readings
        let sensor = match self.sensor_driver.take() {
            Some(driver) => {
                let sensor_config = self.config.sensor.clone();
                match tokio::task::spawn_blocking(move || {
                    SensorLink::connect(driver, &sensor_config)
                })
                .await
                {
                    Ok(Ok(link)) => Some(link),
                    Ok(Err(e)) => {
                        warn!("Headset connect failed, readings stay at defaults: {}", e);
                        None
                    }
                    Err(e) => {
                        warn!("Headset connect task failed: {}", e);
                        None
                    }
                }
            }
            None => None,
        };
        let reader = sensor
            .as_ref()
            .map(|link| link.reader())
            .unwrap_or_else(SensorReader::detached);

        let destination = chooser.choose();
        let pending = match (destination, self.encoder.take()) {
            (Some(path), Some(encoder)) => Some((path, encoder)),
            (Some(path), None) => {
                warn!("No encoder attached, cannot record to {:?}", path);
                None
            }
            (None, encoder) => {
                // Keep the encoder for a later session
                self.encoder = encoder;
                info!("No destination chosen, capturing without recording");
                None
            }
        };

        let cancel = CancellationToken::new();
        let recorder = Arc::new(Mutex::new(Recorder::new()));

        // Recording is raised by the frame task; set Capturing before
        // the task can run
        self.state
            .store(PipelineState::Capturing as u8, Ordering::Relaxed);

        let task = tokio::spawn(run_frame_task(FrameTask {
            rx,
            reader,
            display: self.display.clone(),
            recorder: recorder.clone(),
            pending,
            overlays: self.config.overlays.clone(),
            style: self.config.style.clone(),
            frame_rate: self.config.frame_rate,
            codec: self.config.codec,
            stats: self.stats.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
        }));

        self.run = Some(ActiveRun {
            cancel,
            task,
            source: Some(source),
            sensor,
            recorder,
        });
        info!("Capture started");
        Ok(())
    }

    /// Request a stop without waiting for teardown.
    ///
    /// Safe to call from any context, including mid-frame callbacks;
    /// a later `stop` (or drop) completes the teardown.
    pub fn request_stop(&self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }

    /// Stop capturing and release everything, in order: frame task,
    /// video source, display, recorder, sensor. The camera selection
    /// itself is kept for a later start. Idempotent; calling before
    /// any `start` is a no-op that leaves the pipeline Idle.
    pub async fn stop(&mut self) {
        let Some(mut run) = self.run.take() else {
            self.state
                .store(PipelineState::Idle as u8, Ordering::Relaxed);
            return;
        };

        run.cancel.cancel();
        match tokio::time::timeout(Duration::from_secs(5), &mut run.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Frame task ended abnormally: {}", e),
            Err(_) => {
                warn!("Frame task did not stop in time, aborting it");
                run.task.abort();
            }
        }

        if let Some(mut source) = run.source.take() {
            source.stop();
            // The camera stays selected for the next start unless a new
            // one was picked while running
            if self.source.is_none() {
                self.source = Some(source);
            }
        }
        self.display.publish(None);
        run.recorder.lock().await.close();
        if let Some(mut link) = run.sensor.take() {
            link.disconnect();
        }

        self.state
            .store(PipelineState::Idle as u8, Ordering::Relaxed);
        info!("Capture stopped");
    }
}

/// State moved into the frame task.
struct FrameTask {
    rx: mpsc::Receiver<Frame>,
    reader: SensorReader,
    display: Arc<dyn DisplaySink>,
    recorder: Arc<Mutex<Recorder>>,
    /// Destination and encoder waiting for the first frame's dimensions
    pending: Option<(PathBuf, Box<dyn VideoEncoder>)>,
    overlays: Vec<OverlaySlot>,
    style: OverlayStyle,
    frame_rate: u32,
    codec: VideoCodec,
    stats: Arc<AtomicPipelineStats>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

async fn run_frame_task(mut task: FrameTask) {
    loop {
        tokio::select! {
            _ = task.cancel.cancelled() => {
                debug!("Frame task: stop requested");
                break;
            }
            frame = task.rx.recv() => {
                match frame {
                    Some(frame) => task.step(frame).await,
                    None => {
                        info!("Frame stream closed by the source");
                        break;
                    }
                }
            }
        }
    }
}

impl FrameTask {
    /// Annotate, maybe record, then display one frame. A frame whose
    /// buffer does not match its dimensions is dropped.
    async fn step(&mut self, frame: Frame) {
        if !frame.is_valid() {
            warn!(
                "Dropping malformed frame {}: {} bytes for {}x{} {:?}",
                frame.sequence,
                frame.pixels.len(),
                frame.width,
                frame.height,
                frame.format
            );
            return;
        }
        let entries: Vec<OverlayEntry> = self
            .overlays
            .iter()
            .map(|slot| {
                OverlayEntry::new(
                    slot.label.clone(),
                    self.reader.read(slot.channel),
                    slot.position,
                )
            })
            .collect();
        let annotated = overlay::annotate(&frame, &entries, &self.style);

        // The first frame supplies the recording dimensions
        if let Some((path, encoder)) = self.pending.take() {
            let mut recorder = self.recorder.lock().await;
            match recorder.open(
                encoder,
                &path,
                annotated.width,
                annotated.height,
                self.frame_rate,
                self.codec,
            ) {
                Ok(()) => {
                    self.state
                        .store(PipelineState::Recording as u8, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Recorder open failed, capturing without recording: {}", e);
                    self.stats.recorder_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        {
            let mut recorder = self.recorder.lock().await;
            if recorder.is_open() {
                if let Err(e) = recorder.append_frame(&annotated, Instant::now()) {
                    warn!("Frame write failed, closing the recording: {}", e);
                    recorder.close();
                    self.stats.recorder_failures.fetch_add(1, Ordering::Relaxed);
                    self.state
                        .store(PipelineState::Capturing as u8, Ordering::Relaxed);
                } else {
                    self.stats.frames_recorded.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.display.publish(Some(annotated));
        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_destination_answers() {
        let mut chooser = FixedDestination::path("/tmp/video1.ncv");
        assert_eq!(chooser.choose(), Some(PathBuf::from("/tmp/video1.ncv")));
        // Same answer for a later session
        assert_eq!(chooser.choose(), Some(PathBuf::from("/tmp/video1.ncv")));

        let mut declined = FixedDestination::declined();
        assert_eq!(declined.choose(), None);
    }

    #[test]
    fn default_layout_matches_the_two_line_overlay() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_rate, 25);
        assert_eq!(config.codec, VideoCodec::Raw);
        assert_eq!(config.overlays.len(), 2);
        assert_eq!(config.overlays[0].label, "Attention");
        assert_eq!(config.overlays[0].position, (10, 25));
        assert_eq!(config.overlays[1].label, "Meditation");
        assert_eq!(config.overlays[1].position, (10, 50));
    }

    #[test]
    fn state_tags_roundtrip() {
        for state in [
            PipelineState::Idle,
            PipelineState::Capturing,
            PipelineState::Recording,
        ] {
            assert_eq!(state_from(state as u8), state);
        }
        assert_eq!(state_from(9), PipelineState::Idle);
    }
}
