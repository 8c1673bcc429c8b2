//! Frame annotation: burns sensor read-outs into pixel data.
//!
//! [`annotate`] is a pure function over its inputs. It never touches
//! shared state, so it runs on the capture path for every frame without
//! synchronization.

mod font;

use crate::core::Frame;

/// One labelled value to burn into a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEntry {
    pub label: String,
    pub value: f32,
    /// Top-left corner of the rendered text, in pixels
    pub position: (u32, u32),
}

impl OverlayEntry {
    pub fn new(label: impl Into<String>, value: f32, position: (u32, u32)) -> Self {
        Self {
            label: label.into(),
            value,
            position,
        }
    }

    /// Text as rendered, e.g. `Attention: 57`.
    pub fn text(&self) -> String {
        format!("{}: {}", self.label, self.value.round() as i64)
    }
}

/// Rendering style shared by all entries of a frame.
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    /// Text color, RGB
    pub color: [u8; 3],
    /// Integer glyph scale; 3 renders roughly 21px tall text
    pub scale: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: [0, 0, 255],
            scale: 3,
        }
    }
}

/// Return a copy of `frame` with every entry's text burned in.
///
/// The input frame is untouched. Only pixels under the rendered text
/// change in the copy; sequence, timestamp and format carry over.
pub fn annotate(frame: &Frame, entries: &[OverlayEntry], style: &OverlayStyle) -> Frame {
    if entries.is_empty() {
        return frame.clone();
    }
    let mut pixels = frame.pixels.to_vec();
    let bpp = frame.format.bytes_per_pixel();
    for entry in entries {
        let (x, y) = entry.position;
        font::draw_text_line(
            &mut pixels,
            frame.width as usize,
            frame.height as usize,
            bpp,
            x as usize,
            y as usize,
            &entry.text(),
            style.color,
            style.scale,
        );
    }
    Frame {
        pixels: pixels.into(),
        ..frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelFormat;

    fn gray_frame(width: u32, height: u32) -> Frame {
        let pixels = vec![128u8; (width * height * 3) as usize];
        Frame::new(width, height, PixelFormat::Rgb24, pixels.into())
            .with_sequence(3)
            .with_timestamp(40_000)
    }

    fn white_style() -> OverlayStyle {
        OverlayStyle {
            color: [255, 255, 255],
            scale: 1,
        }
    }

    #[test]
    fn no_entries_returns_the_same_buffer() {
        let frame = gray_frame(32, 32);
        let out = annotate(&frame, &[], &OverlayStyle::default());
        assert_eq!(out.pixels.as_ptr(), frame.pixels.as_ptr());
    }

    #[test]
    fn annotation_changes_only_the_labelled_region() {
        let frame = gray_frame(128, 64);
        let entry = OverlayEntry::new("A", 5.0, (10, 10));
        let out = annotate(&frame, &[entry.clone()], &white_style());

        // "A: 5" at scale 1 fits inside a 30x8 box anchored at (10, 10).
        let in_box = |x: u32, y: u32| (10..40).contains(&x) && (10..18).contains(&y);
        let mut changed = 0usize;
        for y in 0..64u32 {
            for x in 0..128u32 {
                let idx = ((y * 128 + x) * 3) as usize;
                let same = out.pixels[idx..idx + 3] == frame.pixels[idx..idx + 3];
                if !same {
                    assert!(in_box(x, y), "pixel ({x},{y}) changed outside the text box");
                    changed += 1;
                }
            }
        }
        assert!(changed > 0, "no pixels were drawn");
    }

    #[test]
    fn annotation_is_deterministic() {
        let frame = gray_frame(64, 48);
        let entries = [
            OverlayEntry::new("Attention", 57.0, (10, 2)),
            OverlayEntry::new("Meditation", 43.0, (10, 20)),
        ];
        let style = OverlayStyle::default();
        let a = annotate(&frame, &entries, &style);
        let b = annotate(&frame, &entries, &style);
        assert_eq!(a.pixels, b.pixels);
    }

    #[test]
    fn re_annotation_is_idempotent() {
        let frame = gray_frame(64, 48);
        let entries = [OverlayEntry::new("Attention", 57.0, (10, 2))];
        let style = OverlayStyle::default();
        let once = annotate(&frame, &entries, &style);
        let twice = annotate(&once, &entries, &style);
        assert_eq!(once.pixels, twice.pixels);
    }

    #[test]
    fn metadata_carries_over() {
        let frame = gray_frame(32, 32);
        let out = annotate(&frame, &[OverlayEntry::new("x", 1.0, (0, 0))], &white_style());
        assert_eq!(out.width, 32);
        assert_eq!(out.height, 32);
        assert_eq!(out.format, PixelFormat::Rgb24);
        assert_eq!(out.sequence, 3);
        assert_eq!(out.timestamp_us, 40_000);
        assert!(out.is_valid());
    }

    #[test]
    fn entries_near_the_edge_are_clipped() {
        let frame = gray_frame(24, 16);
        let entry = OverlayEntry::new("Meditation", 100.0, (20, 12));
        let out = annotate(&frame, &[entry], &OverlayStyle::default());
        assert!(out.is_valid());
    }

    #[test]
    fn rgba_pixels_under_text_become_opaque() {
        let pixels = vec![0u8; 64 * 16 * 4];
        let frame = Frame::new(64, 16, PixelFormat::Rgba32, pixels.into());
        let out = annotate(&frame, &[OverlayEntry::new("i", 8.0, (1, 1))], &white_style());

        let mut opaque = 0usize;
        for px in out.pixels.chunks(4) {
            if px[3] == 0xFF {
                assert_eq!(&px[..3], &[255, 255, 255]);
                opaque += 1;
            }
        }
        assert!(opaque > 0, "no opaque text pixels found");
    }

    #[test]
    fn entry_text_rounds_values() {
        assert_eq!(OverlayEntry::new("Attention", 56.6, (0, 0)).text(), "Attention: 57");
        assert_eq!(OverlayEntry::new("Signal", 0.0, (0, 0)).text(), "Signal: 0");
    }
}
