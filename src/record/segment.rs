//! Segment container: length-prefixed timestamped raw frames.
//!
//! File layout:
//!
//! ```text
//! [0..4)   magic "NCV1"
//! [4..8)   width, u32 LE
//! [8..12)  height, u32 LE
//! [12..16) nominal frame rate, u32 LE
//! [16..24) frame count, u64 LE (finalized on close)
//! [24..32) last frame offset in microseconds, u64 LE (finalized on close)
//! ```
//!
//! followed by one record per frame:
//!
//! ```text
//! [0..4)   payload length, u32 LE
//! [4..12)  offset from the first frame in microseconds, u64 LE
//! [12]     pixel format tag
//! [13..]   pixel data
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use tracing::{debug, info, warn};

use super::{RecorderError, VideoCodec, VideoEncoder};
use crate::core::{Frame, PixelFormat};

const MAGIC: &[u8; 4] = b"NCV1";
const HEADER_LEN: usize = 32;

/// File-backed encoder writing the segment container.
///
/// Only [`VideoCodec::Raw`] is supported; a frame's record carries its
/// real offset, so playback can reproduce capture gaps.
pub struct SegmentFileEncoder {
    writer: Option<SegmentWriter>,
}

struct SegmentWriter {
    file: BufWriter<File>,
    path: PathBuf,
    frame_count: u64,
    last_offset_us: u64,
    bytes_written: u64,
}

impl SegmentFileEncoder {
    pub fn new() -> Self {
        Self { writer: None }
    }
}

impl Default for SegmentFileEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for SegmentFileEncoder {
    fn open(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        frame_rate: u32,
        codec: VideoCodec,
    ) -> Result<(), RecorderError> {
        if codec != VideoCodec::Raw {
            return Err(RecorderError::UnsupportedCodec(codec));
        }
        if self.writer.is_some() {
            return Err(RecorderError::AlreadyOpen);
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| RecorderError::OpenFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut writer = SegmentWriter {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            frame_count: 0,
            last_offset_us: 0,
            bytes_written: HEADER_LEN as u64,
        };

        // Placeholder header; count and duration land on close
        let mut header = BytesMut::with_capacity(HEADER_LEN);
        header.put_slice(MAGIC);
        header.put_u32_le(width);
        header.put_u32_le(height);
        header.put_u32_le(frame_rate);
        header.put_u64_le(0);
        header.put_u64_le(0);
        writer
            .file
            .write_all(&header)
            .map_err(RecorderError::WriteFailed)?;

        debug!("Segment opened: {:?}", path);
        self.writer = Some(writer);
        Ok(())
    }

    fn append(&mut self, frame: &Frame, offset: Duration) -> Result<(), RecorderError> {
        let writer = self.writer.as_mut().ok_or(RecorderError::NotOpen)?;

        let offset_us = offset.as_micros() as u64;
        let payload_len = 8 + 1 + frame.pixels.len();

        let mut record = BytesMut::with_capacity(4 + payload_len);
        record.put_u32_le(payload_len as u32);
        record.put_u64_le(offset_us);
        record.put_u8(frame.format as u8);
        record.put_slice(&frame.pixels);

        writer
            .file
            .write_all(&record)
            .map_err(RecorderError::WriteFailed)?;
        writer.frame_count += 1;
        writer.last_offset_us = offset_us;
        writer.bytes_written += record.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        writer.file.flush().map_err(RecorderError::WriteFailed)?;
        let mut file = writer
            .file
            .into_inner()
            .map_err(|e| RecorderError::WriteFailed(e.into_error()))?;

        // Rewrite the finalized header fields
        file.seek(SeekFrom::Start(16))
            .map_err(RecorderError::WriteFailed)?;
        file.write_all(&writer.frame_count.to_le_bytes())
            .map_err(RecorderError::WriteFailed)?;
        file.write_all(&writer.last_offset_us.to_le_bytes())
            .map_err(RecorderError::WriteFailed)?;
        file.flush().map_err(RecorderError::WriteFailed)?;
        file.sync_data().map_err(RecorderError::WriteFailed)?;

        info!(
            "Segment finished: {:?}, {} frames, {} bytes",
            writer.path, writer.frame_count, writer.bytes_written
        );
        Ok(())
    }
}

impl Drop for SegmentFileEncoder {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                warn!("Segment close on drop failed: {}", e);
            }
        }
    }
}

/// Parsed segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub frame_count: u64,
    pub duration_us: u64,
}

/// One record read back from a segment.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub offset_us: u64,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

/// Read a whole segment back, header and records.
pub fn read_segment(path: &Path) -> Result<(SegmentInfo, Vec<SegmentRecord>)> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open segment {:?}", path))?,
    );

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .context("Segment header truncated")?;
    if &header[0..4] != MAGIC {
        anyhow::bail!("Not a segment file: bad magic");
    }

    let info = SegmentInfo {
        width: u32::from_le_bytes(header[4..8].try_into().unwrap()),
        height: u32::from_le_bytes(header[8..12].try_into().unwrap()),
        frame_rate: u32::from_le_bytes(header[12..16].try_into().unwrap()),
        frame_count: u64::from_le_bytes(header[16..24].try_into().unwrap()),
        duration_us: u64::from_le_bytes(header[24..32].try_into().unwrap()),
    };

    let mut records = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Segment record length"),
        }
        let payload_len = u32::from_le_bytes(len_buf) as usize;
        if payload_len < 9 {
            anyhow::bail!("Segment record too short: {} bytes", payload_len);
        }
        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .context("Segment record truncated")?;

        let offset_us = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let format = PixelFormat::try_from(payload[8])?;
        records.push(SegmentRecord {
            offset_us,
            format,
            pixels: payload[9..].to_vec(),
        });
    }

    Ok((info, records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Frame {
        Frame::new(2, 2, PixelFormat::Rgb24, vec![fill; 12].into())
    }

    #[test]
    fn segment_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.ncv");

        let mut enc = SegmentFileEncoder::new();
        enc.open(&path, 2, 2, 25, VideoCodec::Raw).unwrap();
        enc.append(&frame(1), Duration::ZERO).unwrap();
        enc.append(&frame(2), Duration::from_millis(40)).unwrap();
        enc.append(&frame(3), Duration::from_millis(160)).unwrap();
        enc.close().unwrap();

        let (info, records) = read_segment(&path).unwrap();
        assert_eq!(
            info,
            SegmentInfo {
                width: 2,
                height: 2,
                frame_rate: 25,
                frame_count: 3,
                duration_us: 160_000,
            }
        );
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].offset_us, 0);
        assert_eq!(records[2].offset_us, 160_000);
        assert_eq!(records[1].pixels, vec![2u8; 12]);
        assert_eq!(records[0].format, PixelFormat::Rgb24);
    }

    #[test]
    fn empty_segment_finalizes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ncv");

        let mut enc = SegmentFileEncoder::new();
        enc.open(&path, 640, 480, 25, VideoCodec::Raw).unwrap();
        enc.close().unwrap();

        let (info, records) = read_segment(&path).unwrap();
        assert_eq!(info.frame_count, 0);
        assert_eq!(info.duration_us, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn non_raw_codec_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.ncv");

        let mut enc = SegmentFileEncoder::new();
        let err = enc.open(&path, 2, 2, 25, VideoCodec::Mpeg4).unwrap_err();
        assert!(matches!(err, RecorderError::UnsupportedCodec(VideoCodec::Mpeg4)));
        assert!(matches!(
            enc.append(&frame(0), Duration::ZERO).unwrap_err(),
            RecorderError::NotOpen
        ));
    }

    #[test]
    fn unwritable_path_reports_open_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("sub").join("out.ncv");

        let mut enc = SegmentFileEncoder::new();
        let err = enc.open(&path, 2, 2, 25, VideoCodec::Raw).unwrap_err();
        assert!(matches!(err, RecorderError::OpenFailed { .. }));
    }

    #[test]
    fn close_without_open_is_a_noop() {
        SegmentFileEncoder::new().close().unwrap();
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.ncv");
        std::fs::write(&path, b"hello").unwrap();
        assert!(read_segment(&path).is_err());
    }
}
