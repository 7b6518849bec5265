//! Encoders and the file-extension codec table.
//!
//! The output file name picks the codec, the same way for video and speech:
//! `capture.yuv` is written raw, `capture.rle` run-length encoded,
//! `speech.g711` as µ-law.

pub mod g711;
pub mod mock;
pub mod raw;
pub mod rle;

use crate::buffer::Buffer;
use crate::error::{FramepipeError, Result};
use crate::format::VideoFormat;
use std::path::Path;

pub use g711::MulawEncoder;
pub use mock::MockVideoEncoder;
pub use raw::RawVideoEncoder;
pub use rle::RleVideoEncoder;

/// Video encoder parameters derived from the negotiated format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate_milli: u32,
    /// Target bit rate, `None` for variable bit rate.
    pub bit_rate: Option<u32>,
}

impl VideoParams {
    pub fn for_format(format: &VideoFormat, bit_rate: Option<u32>) -> Self {
        Self {
            width: format.width,
            height: format.height,
            frame_rate_milli: format.standard.frame_rate_milli(),
            bit_rate,
        }
    }

    /// Bytes in one packed YUV 4:2:0 frame of this size.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechParams {
    pub sample_rate: u32,
    /// 16-bit samples per block.
    pub block_samples: usize,
}

/// Buffer sizes an encoder needs, reported by [`Encoder::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub input_size: usize,
    pub output_size: usize,
}

/// Transform unit: turns one input buffer into one output buffer.
pub trait Encoder: Send {
    type Params;

    /// Codec name for logs and errors.
    fn name(&self) -> &'static str;

    /// Prepares the encoder and reports the buffer sizes it needs.
    fn configure(&mut self, params: &Self::Params) -> Result<BufferLayout>;

    /// Encodes the valid bytes of `input` into `output`.
    ///
    /// Returns the number of bytes written; the caller records it as the
    /// output's `bytes_used`.
    fn process(&mut self, input: &Buffer, output: &mut Buffer) -> Result<usize>;
}

pub type BoxedVideoEncoder = Box<dyn Encoder<Params = VideoParams>>;
pub type BoxedSpeechEncoder = Box<dyn Encoder<Params = SpeechParams>>;

/// Entry in a codec table.
#[derive(Debug)]
pub struct CodecSpec<P: 'static> {
    pub name: &'static str,
    pub description: &'static str,
    pub extensions: &'static [&'static str],
    create: fn() -> Box<dyn Encoder<Params = P>>,
}

impl<P: 'static> CodecSpec<P> {
    pub fn create(&self) -> Box<dyn Encoder<Params = P>> {
        (self.create)()
    }
}

pub static VIDEO_CODECS: &[CodecSpec<VideoParams>] = &[
    CodecSpec {
        name: "raw",
        description: "Uncompressed YUV 4:2:0",
        extensions: &["yuv"],
        create: raw_encoder,
    },
    CodecSpec {
        name: "rle",
        description: "Byte run-length encoding",
        extensions: &["rle"],
        create: rle_encoder,
    },
];

pub static SPEECH_CODECS: &[CodecSpec<SpeechParams>] = &[CodecSpec {
    name: "g711",
    description: "G.711 mu-law",
    extensions: &["g711", "ulaw"],
    create: mulaw_encoder,
}];

fn raw_encoder() -> BoxedVideoEncoder {
    Box::new(RawVideoEncoder::new())
}

fn rle_encoder() -> BoxedVideoEncoder {
    Box::new(RleVideoEncoder::new())
}

fn mulaw_encoder() -> BoxedSpeechEncoder {
    Box::new(MulawEncoder::new())
}

/// Picks a video codec from the output file's extension.
pub fn video_codec_for(path: &Path) -> Result<&'static CodecSpec<VideoParams>> {
    lookup(VIDEO_CODECS, path, "video")
}

/// Picks a speech codec from the output file's extension.
pub fn speech_codec_for(path: &Path) -> Result<&'static CodecSpec<SpeechParams>> {
    lookup(SPEECH_CODECS, path, "speech")
}

fn lookup<P: 'static>(
    table: &'static [CodecSpec<P>],
    path: &Path,
    kind: &str,
) -> Result<&'static CodecSpec<P>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| FramepipeError::ConfigInvalidValue {
            key: format!("{kind} file"),
            message: format!("'{}' has no extension to pick a codec from", path.display()),
        })?;

    table
        .iter()
        .find(|codec| codec.extensions.contains(&ext.as_str()))
        .ok_or_else(|| {
            let known: Vec<&str> = table.iter().flat_map(|c| c.extensions.iter().copied()).collect();
            FramepipeError::ConfigInvalidValue {
                key: format!("{kind} file"),
                message: format!(
                    "no {kind} codec for extension '.{ext}' (known: {})",
                    known.join(", ")
                ),
            }
        })
}
