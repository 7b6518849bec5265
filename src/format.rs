//! Video standards, resolutions and the negotiated capture format.

use crate::defaults::{MAX_HEIGHT, MAX_WIDTH, MIN_DIMENSION, RESOLUTION_ALIGNMENT};
use crate::error::{FramepipeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Analog and HD video standards a capture device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoStandard {
    #[serde(rename = "d1_ntsc")]
    D1Ntsc,
    #[serde(rename = "d1_pal")]
    D1Pal,
    #[serde(rename = "720p60")]
    P720x60,
    #[serde(rename = "720p50")]
    P720x50,
    #[serde(rename = "1080i30")]
    I1080x30,
    #[serde(rename = "1080i25")]
    I1080x25,
}

impl VideoStandard {
    /// All standards, in the order of the `--display-standard` numbering.
    pub const ALL: [VideoStandard; 6] = [
        VideoStandard::D1Ntsc,
        VideoStandard::D1Pal,
        VideoStandard::P720x60,
        VideoStandard::P720x50,
        VideoStandard::I1080x30,
        VideoStandard::I1080x25,
    ];

    /// Maps the 1-based command line index onto a standard.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index).checked_sub(1)?).copied()
    }

    /// Full frame size as (width, height).
    pub fn resolution(self) -> (u32, u32) {
        match self {
            VideoStandard::D1Ntsc => (720, 480),
            VideoStandard::D1Pal => (720, 576),
            VideoStandard::P720x60 | VideoStandard::P720x50 => (1280, 720),
            VideoStandard::I1080x30 | VideoStandard::I1080x25 => (1920, 1080),
        }
    }

    /// 25 Hz family.
    pub fn is_pal(self) -> bool {
        matches!(
            self,
            VideoStandard::D1Pal | VideoStandard::P720x50 | VideoStandard::I1080x25
        )
    }

    /// Encoder frame rate in frames per 1000 seconds.
    pub fn frame_rate_milli(self) -> u32 {
        if self.is_pal() { 25_000 } else { 30_000 }
    }

    /// Standards the capture stage can take input from.
    pub fn is_capture_supported(self) -> bool {
        matches!(
            self,
            VideoStandard::D1Ntsc | VideoStandard::D1Pal | VideoStandard::P720x60
        )
    }

    /// Default physical input for this standard.
    pub fn default_input(self) -> VideoInput {
        match self {
            VideoStandard::D1Ntsc | VideoStandard::D1Pal => VideoInput::Composite,
            _ => VideoInput::Component,
        }
    }
}

impl fmt::Display for VideoStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoStandard::D1Ntsc => "D1 NTSC",
            VideoStandard::D1Pal => "D1 PAL",
            VideoStandard::P720x60 => "720P 60Hz",
            VideoStandard::P720x50 => "720P 50Hz",
            VideoStandard::I1080x30 => "1080I 30Hz",
            VideoStandard::I1080x25 => "1080I 25Hz",
        };
        f.write_str(name)
    }
}

/// Physical video input connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoInput {
    Composite,
    SVideo,
    Component,
}

/// A validated capture resolution.
///
/// Both dimensions are within 2x2..=1920x1080 and multiples of 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Checks the bounds and rounds both dimensions down to the alignment.
    pub fn aligned(width: u32, height: u32) -> Result<Self> {
        if !(MIN_DIMENSION..=MAX_WIDTH).contains(&width)
            || !(MIN_DIMENSION..=MAX_HEIGHT).contains(&height)
        {
            return Err(FramepipeError::ConfigInvalidValue {
                key: "resolution".to_string(),
                message: format!(
                    "{width}x{height} outside {MIN_DIMENSION}x{MIN_DIMENSION}..{MAX_WIDTH}x{MAX_HEIGHT}"
                ),
            });
        }
        let aligned = Self {
            width: width & !(RESOLUTION_ALIGNMENT - 1),
            height: height & !(RESOLUTION_ALIGNMENT - 1),
        };
        if aligned.width == 0 || aligned.height == 0 {
            return Err(FramepipeError::ConfigInvalidValue {
                key: "resolution".to_string(),
                message: format!(
                    "{width}x{height} is smaller than {RESOLUTION_ALIGNMENT}x{RESOLUTION_ALIGNMENT} after alignment"
                ),
            });
        }
        Ok(aligned)
    }
}

impl FromStr for Resolution {
    type Err = FramepipeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FramepipeError::ConfigInvalidValue {
            key: "resolution".to_string(),
            message: format!("expected WIDTHxHEIGHT, got '{s}'"),
        };
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        Self::aligned(width, height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame layout agreed between capture and video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoFormat {
    pub standard: VideoStandard,
    pub width: u32,
    pub height: u32,
    /// Bytes per luma line of a captured frame.
    pub line_length: u32,
}

impl VideoFormat {
    /// Works out the capture format for a detected standard.
    ///
    /// Only D1 and 720P60 input is accepted. An explicit resolution must fit
    /// inside the detected frame; the line length stays that of the full frame.
    pub fn negotiate(detected: VideoStandard, requested: Option<Resolution>) -> Result<Self> {
        if !detected.is_capture_supported() {
            return Err(FramepipeError::UnsupportedStandard {
                standard: detected.to_string(),
                message: "need D1 or 720P60 input".to_string(),
            });
        }

        let (full_width, full_height) = detected.resolution();
        let (width, height) = match requested {
            Some(res) if res.width > full_width || res.height > full_height => {
                return Err(FramepipeError::configuration(format!(
                    "resolution {res} larger than detected {full_width}x{full_height}"
                )));
            }
            Some(res) => (res.width, res.height),
            None => (full_width, full_height),
        };

        Ok(Self {
            standard: detected,
            width,
            height,
            line_length: full_width,
        })
    }

    /// Bytes in one captured YUV 4:2:0 semi-planar frame.
    pub fn frame_size(&self) -> usize {
        self.line_length as usize * self.height as usize * 3 / 2
    }

    /// Bytes in the packed `width` x `height` frame the encoder sees.
    pub fn packed_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }

    /// Full 720P frames travel from capture to encoder without a copy.
    pub fn is_zero_copy(&self) -> bool {
        self.width == 1280 && self.height == 720
    }

    /// Copies the top-left `width` x `height` region of a captured frame
    /// into a packed frame.
    ///
    /// `src` holds `height` luma lines of `line_length` bytes followed by
    /// `height / 2` interleaved chroma lines of the same stride. Returns the
    /// number of bytes written to `dst`.
    pub fn crop(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let stride = self.line_length as usize;
        let width = self.width as usize;
        let height = self.height as usize;
        if src.len() < self.frame_size() || dst.len() < self.packed_size() {
            return Err(FramepipeError::protocol(format!(
                "cannot crop {}x{} from {} source bytes into {} bytes",
                width,
                height,
                src.len(),
                dst.len()
            )));
        }

        let chroma_src = stride * height;
        let chroma_dst = width * height;
        let rows = (0..height).map(|row| (row * stride, row * width));
        let chroma_rows =
            (0..height / 2).map(|row| (chroma_src + row * stride, chroma_dst + row * width));
        for (from, to) in rows.chain(chroma_rows) {
            dst[to..to + width].copy_from_slice(&src[from..from + width]);
        }
        Ok(self.packed_size())
    }
}
