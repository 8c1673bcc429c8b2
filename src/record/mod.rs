//! Recording: turns annotated frames into a file on disk.
//!
//! The [`Recorder`] owns one recording session at a time and stamps
//! every appended frame with its offset from the first frame, measured
//! on a monotonic clock. Gaps in capture therefore survive into the
//! file instead of being flattened to a nominal frame interval.

mod segment;

pub use segment::{read_segment, SegmentFileEncoder, SegmentInfo, SegmentRecord};

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::core::Frame;

/// Codec requested for a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Uncompressed frames in the segment container
    Raw,
    /// MPEG-4 part 2; only honored by encoders that implement it
    Mpeg4,
}

/// Errors from the recorder and its encoders.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder already open for this session")]
    AlreadyOpen,
    #[error("recorder is not open")]
    NotOpen,
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("unsupported codec {0:?}")]
    UnsupportedCodec(VideoCodec),
    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),
}

/// Sink for encoded video, one session per `open`/`close` pair.
pub trait VideoEncoder: Send {
    /// Prepare the output at `path` for frames of the given shape.
    fn open(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        frame_rate: u32,
        codec: VideoCodec,
    ) -> Result<(), RecorderError>;

    /// Encode one frame at `offset` from the start of the recording.
    fn append(&mut self, frame: &Frame, offset: Duration) -> Result<(), RecorderError>;

    /// Finish the output. Called once per session.
    fn close(&mut self) -> Result<(), RecorderError>;
}

/// Descriptor of one open recording.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Nominal playback rate stored in the output; per-frame offsets
    /// carry the actual timing
    pub frame_rate: u32,
    pub codec: VideoCodec,
    first_frame: Option<Instant>,
    last_offset: Option<Duration>,
}

impl RecordingSession {
    /// Whether the first frame has landed and pinned the time origin.
    pub fn started(&self) -> bool {
        self.first_frame.is_some()
    }
}

/// Owns the encoder and the offset clock for one recording at a time.
pub struct Recorder {
    encoder: Option<Box<dyn VideoEncoder>>,
    session: Option<RecordingSession>,
    frames_written: u64,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            session: None,
            frames_written: 0,
        }
    }

    /// Begin a session. At most one may be open at a time.
    pub fn open(
        &mut self,
        mut encoder: Box<dyn VideoEncoder>,
        path: &Path,
        width: u32,
        height: u32,
        frame_rate: u32,
        codec: VideoCodec,
    ) -> Result<(), RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyOpen);
        }
        if width == 0 || height == 0 {
            return Err(RecorderError::InvalidDimensions { width, height });
        }
        encoder.open(path, width, height, frame_rate, codec)?;
        info!(
            "Recording to {:?}: {}x{} @ {}fps ({:?})",
            path, width, height, frame_rate, codec
        );
        self.encoder = Some(encoder);
        self.session = Some(RecordingSession {
            output_path: path.to_path_buf(),
            width,
            height,
            frame_rate,
            codec,
            first_frame: None,
            last_offset: None,
        });
        self.frames_written = 0;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append a frame captured at `now`.
    ///
    /// The first appended frame pins the session origin and gets offset
    /// zero; later frames carry their real distance from that origin,
    /// nudged forward a microsecond when the clock would repeat.
    pub fn append_frame(&mut self, frame: &Frame, now: Instant) -> Result<(), RecorderError> {
        let (session, encoder) = match (self.session.as_mut(), self.encoder.as_mut()) {
            (Some(session), Some(encoder)) => (session, encoder),
            _ => return Err(RecorderError::NotOpen),
        };

        let offset = match session.first_frame {
            None => {
                session.first_frame = Some(now);
                Duration::ZERO
            }
            Some(first) => {
                let mut offset = now.saturating_duration_since(first);
                if let Some(last) = session.last_offset {
                    if offset <= last {
                        offset = last + Duration::from_micros(1);
                    }
                }
                offset
            }
        };

        encoder.append(frame, offset)?;
        session.last_offset = Some(offset);
        self.frames_written += 1;
        Ok(())
    }

    /// End the session, if one is open. Safe to call any number of
    /// times, including without a prior `open`.
    pub fn close(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            if let Err(e) = encoder.close() {
                warn!("Encoder close failed: {}", e);
            }
        }
        if let Some(session) = self.session.take() {
            info!(
                "Recording closed: {:?}, {} frames",
                session.output_path, self.frames_written
            );
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}
