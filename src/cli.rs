//! Command-line interface for framepipe
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Config;
use crate::device::SoundInput;
use crate::format::{Resolution, VideoInput, VideoStandard};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Capture, encode and write live video and speech
#[derive(Parser, Debug)]
#[command(
    name = "framepipe",
    version,
    about = "Capture, encode and write live video and speech"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More log output (--verbose: debug, twice: trace)
    #[arg(long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Encode video to FILE (extension picks the codec: yuv, rle)
    #[arg(short = 'v', long = "videofile", value_name = "FILE")]
    pub video_file: Option<PathBuf>,

    /// Encode speech to FILE (extension picks the codec: g711, ulaw)
    #[arg(short = 's', long = "speechfile", value_name = "FILE")]
    pub speech_file: Option<PathBuf>,

    /// Video standard of the input (1: D1 NTSC, 2: D1 PAL, 3: 720P60,
    /// 4: 720P50, 5: 1080I30, 6: 1080I25)
    #[arg(short = 'y', long, value_name = "1-6", value_parser = parse_standard)]
    pub display_standard: Option<VideoStandard>,

    /// Capture resolution, rounded down to multiples of 16
    #[arg(short = 'r', long, value_name = "WxH", value_parser = parse_resolution)]
    pub resolution: Option<Resolution>,

    /// Video bit rate in bits per second (default: variable)
    #[arg(short = 'b', long = "videobitrate", value_name = "BPS")]
    pub video_bit_rate: Option<u32>,

    /// Use the s-video input instead of composite
    #[arg(short = 'x', long)]
    pub svideo: bool,

    /// Use line in for speech instead of the microphone
    #[arg(short = 'l', long)]
    pub linein: bool,

    /// Read p (pause), r (resume) and q (quit) from stdin
    #[arg(short = 'k', long)]
    pub keyboard: bool,

    /// Stop after this long. Examples: 30, 30s, 5m, 1h30m
    #[arg(short = 't', long, value_name = "DURATION", value_parser = parse_time_secs)]
    pub time: Option<u64>,

    /// Stop after this many video frames
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,

    /// Run stage threads with real-time priorities
    #[arg(long)]
    pub realtime: bool,

    /// Publish encoded frames to the snapshot side channel
    #[arg(long)]
    pub snapshot: bool,

    /// Print final statistics as JSON
    #[arg(long)]
    pub stats_json: bool,
}

/// Parse a duration string into whole seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_time_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

fn parse_standard(s: &str) -> Result<VideoStandard, String> {
    let index: u8 = s
        .trim()
        .parse()
        .map_err(|_| format!("expected a number from 1 to 6, got '{s}'"))?;
    VideoStandard::from_index(index).ok_or_else(|| format!("no video standard {index}, use 1 to 6"))
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    s.parse::<Resolution>().map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List codecs and the file extensions that select them
    Codecs,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl Cli {
    /// Writes every flag that was given over the matching config value.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(file) = &self.video_file {
            config.video.file = Some(file.clone());
        }
        if let Some(file) = &self.speech_file {
            config.speech.file = Some(file.clone());
        }
        if let Some(standard) = self.display_standard {
            config.video.standard = standard;
        }
        if let Some(resolution) = self.resolution {
            config.video.resolution = Some(resolution.to_string());
        }
        if let Some(bit_rate) = self.video_bit_rate {
            config.video.bit_rate = Some(bit_rate);
        }
        if self.svideo {
            config.video.input = Some(VideoInput::SVideo);
        }
        if self.linein {
            config.speech.input = SoundInput::LineIn;
        }
        if self.keyboard {
            config.run.keyboard = true;
        }
        if let Some(secs) = self.time {
            config.run.time_secs = Some(secs);
        }
        if let Some(frames) = self.frames {
            config.video.frame_limit = Some(frames);
        }
        if self.realtime {
            config.run.realtime = true;
        }
        if self.snapshot {
            config.video.snapshot = true;
        }
    }
}
