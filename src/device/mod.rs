//! Capture devices feeding the pipeline.
//!
//! Real hardware sits behind [`CaptureDevice`] and [`SoundSource`]; the
//! synthetic implementations here produce deterministic test patterns and
//! tones so the whole pipeline can run anywhere.

pub mod synthetic;
pub mod tone;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::format::VideoStandard;
use serde::{Deserialize, Serialize};

pub use synthetic::{SyntheticCapture, stamped_frame_number};
pub use tone::ToneSource;

/// Trait for video capture devices.
///
/// The device owns a queue of buffers handed to it by the capture stage and
/// fills them one frame at a time.
pub trait CaptureDevice: Send {
    /// Detect the video standard present on the input.
    fn detect_format(&mut self) -> Result<VideoStandard>;

    /// Hand the device the buffers it captures into and start streaming.
    fn start(&mut self, buffers: Vec<Buffer>) -> Result<()>;

    /// Block until the next frame is captured.
    ///
    /// # Returns
    /// The filled buffer, `None` once a finite source is exhausted, or an error
    fn acquire_frame(&mut self) -> Result<Option<Buffer>>;

    /// Give a buffer back to the device's capture queue.
    fn release_frame(&mut self, frame: Buffer) -> Result<()>;

    /// Stop streaming and drop any queued buffers.
    fn stop(&mut self) {}
}

/// Trait for speech input devices producing 16-bit little-endian PCM.
pub trait SoundSource: Send {
    fn start(&mut self) -> Result<()>;

    /// Fill `buf` with samples.
    ///
    /// # Returns
    /// Bytes written (always a whole number of samples), 0 once exhausted
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn stop(&mut self) {}
}

/// Physical speech input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundInput {
    #[default]
    Mic,
    LineIn,
}

impl SoundInput {
    /// Frequency of the synthetic tone standing in for this input.
    pub fn test_tone_hz(self) -> f32 {
        match self {
            SoundInput::Mic => 440.0,
            SoundInput::LineIn => 1000.0,
        }
    }
}
