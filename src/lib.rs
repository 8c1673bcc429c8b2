//! Neurocam - live camera capture with EEG overlay and recording
//!
//! This crate provides everything needed to build a biofeedback camera
//! application:
//! - Core types: frames, pixel formats, sensor channels and samples
//! - Camera: V4L2 device enumeration and frame sources
//! - Sensor: headset port scan, read loop and lock-free readings
//! - Overlay: burning the latest readings into each frame
//! - Record: offset-stamped recording to segment files
//! - Display: latest-value hand-off to whatever renders frames
//! - Pipeline: wiring all of the above into one start/stop unit
//!
//! # Architecture
//!
//! A [`CapturePipeline`] owns one capture run. Frames flow from a
//! [`VideoSource`] into a background task that annotates them with the
//! newest [`SensorReader`] values, appends them to the [`Recorder`]
//! while a session is open, and publishes them to a [`DisplaySink`].
//! Recording offsets are measured from the first recorded frame on a
//! monotonic clock, so pauses and stalls survive into the file.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use neurocam::{
//!     display_channel, CameraCaptureConfig, CapturePipeline, FfmpegCapture,
//!     FixedDestination, PipelineConfig, SegmentFileEncoder,
//! };
//!
//! let (display, mut frames) = display_channel();
//! let mut pipeline = CapturePipeline::new(PipelineConfig::default(), Arc::new(display));
//! pipeline.select_source(Box::new(FfmpegCapture::new(CameraCaptureConfig::default())));
//! pipeline.attach_encoder(Box::new(SegmentFileEncoder::new()));
//!
//! let mut chooser = FixedDestination::path("video1.ncv");
//! pipeline.start(&mut chooser).await?;
//! // ... frames arrive on `frames` until stop()
//! pipeline.stop().await;
//! ```

// Core types
pub mod core;

// Camera devices and frame sources
pub mod camera;

// Headset link and sample store
pub mod sensor;

// Frame annotation
pub mod overlay;

// Recording and the segment container
pub mod record;

// Display hand-off
pub mod display;

// The capture pipeline tying it all together
pub mod pipeline;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Core types
pub use core::{Frame, PixelFormat, SampleValue, SensorChannel, CHANNEL_COUNT};

// Camera
pub use camera::capture::{CameraCaptureConfig, FfmpegCapture};
pub use camera::{list_devices, CameraError, CameraInfo, VideoSource};
#[cfg(feature = "test-source")]
pub use camera::testsrc::{TestSource, TestSourceConfig};

// Sensor
pub use sensor::{
    default_port_candidates, ConnectionId, LinkState, SensorConfig, SensorDriver, SensorError,
    SensorLink, SensorReader,
};
#[cfg(feature = "test-source")]
pub use sensor::sim::SimulatedSensor;

// Overlay
pub use overlay::{annotate, OverlayEntry, OverlayStyle};

// Record
pub use record::{
    read_segment, Recorder, RecorderError, RecordingSession, SegmentFileEncoder, SegmentInfo,
    SegmentRecord, VideoCodec, VideoEncoder,
};

// Display
pub use display::{display_channel, DisplaySink, FrameDisplay};

// Pipeline
pub use pipeline::{
    default_overlays, CapturePipeline, DestinationChooser, FixedDestination, OverlaySlot,
    PipelineConfig, PipelineError, PipelineState, PipelineStats,
};
