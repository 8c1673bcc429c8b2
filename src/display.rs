//! Display sink: hands composited frames to whatever shell renders them.
//!
//! The capture task never talks to a UI directly. It publishes into a
//! latest-value channel; the shell consumes on its own thread at its
//! own pace and only ever sees whole, immutable frames.

use tokio::sync::watch;

use crate::core::Frame;

/// Sink for composited frames. `None` clears the display.
pub trait DisplaySink: Send + Sync {
    fn publish(&self, frame: Option<Frame>);
}

/// Latest-value display channel.
///
/// Only the newest frame is retained; a slow consumer skips stale
/// frames instead of applying backpressure to the capture path.
pub struct FrameDisplay {
    tx: watch::Sender<Option<Frame>>,
}

/// Create a display channel: the sink goes to the pipeline, the
/// receiver to the shell.
pub fn display_channel() -> (FrameDisplay, watch::Receiver<Option<Frame>>) {
    let (tx, rx) = watch::channel(None);
    (FrameDisplay { tx }, rx)
}

impl DisplaySink for FrameDisplay {
    fn publish(&self, frame: Option<Frame>) {
        // A dropped receiver just means nothing is watching
        let _ = self.tx.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelFormat;

    fn frame(seq: u64) -> Frame {
        Frame::new(2, 2, PixelFormat::Rgb24, vec![0u8; 12].into()).with_sequence(seq)
    }

    #[tokio::test]
    async fn receiver_sees_the_latest_frame() {
        let (display, mut rx) = display_channel();
        assert!(rx.borrow().is_none());

        display.publish(Some(frame(1)));
        display.publish(Some(frame(2)));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn publishing_none_clears_the_display() {
        let (display, mut rx) = display_channel();
        display.publish(Some(frame(1)));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        display.publish(None);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn publish_without_a_receiver_is_fine() {
        let (display, rx) = display_channel();
        drop(rx);
        display.publish(Some(frame(1)));
    }
}
