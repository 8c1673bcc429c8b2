//! Core types shared across the capture pipeline.
//!
//! This module contains foundational types used throughout the system:
//! - Frame types for captured video
//! - Sensor channels and sample values from the headset

mod frame;
mod sample;

pub use frame::{Frame, PixelFormat};
pub use sample::{SampleValue, SensorChannel, CHANNEL_COUNT};
