use anyhow::anyhow;
use bytes::Bytes;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PixelFormat {
    /// Packed 24-bit RGB, 3 bytes per pixel
    Rgb24 = 0,
    /// Packed 32-bit RGBA, 4 bytes per pixel
    Rgba32 = 1,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
        }
    }
}

impl TryFrom<u8> for PixelFormat {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PixelFormat::Rgb24),
            1 => Ok(PixelFormat::Rgba32),
            other => Err(anyhow!("unknown pixel format tag: {other}")),
        }
    }
}

/// A single captured video frame.
///
/// The pixel buffer is reference-counted and immutable once constructed,
/// so cloning a frame is cheap and published frames cannot change under
/// a consumer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Layout of `pixels`
    pub format: PixelFormat,
    /// Position within one capture run, starting at 0
    pub sequence: u64,
    /// Capture timestamp in microseconds since the source started
    pub timestamp_us: u64,
    /// Raw pixel data, `height` rows of `stride()` bytes each
    pub pixels: Bytes,
}

impl Frame {
    /// Create a frame with sequence and timestamp zero.
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Bytes) -> Self {
        Self {
            width,
            height,
            format,
            sequence: 0,
            timestamp_us: 0,
            pixels,
        }
    }

    /// Builder-style setter for the sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Builder-style setter for the capture timestamp.
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Buffer length implied by the dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// Whether the buffer length matches the declared dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.expected_len()
    }
}
