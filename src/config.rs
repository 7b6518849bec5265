use crate::codec::{SpeechParams, speech_codec_for, video_codec_for};
use crate::defaults::{
    CAPTURE_BUFFERS, REPORT_INTERVAL_SECS, SPEECH_BLOCK_SAMPLES, SPEECH_SAMPLE_RATE,
    VIDEO_PIPE_SIZE, WRITER_BUFFERS,
};
use crate::device::SoundInput;
use crate::error::{FramepipeError, Result};
use crate::format::{Resolution, VideoInput, VideoStandard};
use crate::pipeline::{PipelineConfig, PriorityTable};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub speech: SpeechConfig,
    pub run: RunConfig,
}

/// Video path configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Output file; its extension picks the codec. No file, no video path.
    pub file: Option<PathBuf>,
    /// Standard generated by the synthetic capture input.
    pub standard: VideoStandard,
    /// Input connector; `None` uses the standard's default.
    pub input: Option<VideoInput>,
    /// Capture resolution as `WIDTHxHEIGHT`.
    pub resolution: Option<String>,
    /// Bit rate in bits per second; unset means variable.
    pub bit_rate: Option<u32>,
    pub capture_buffers: usize,
    pub pipe_size: usize,
    pub writer_buffers: usize,
    /// Stop after this many frames.
    pub frame_limit: Option<u64>,
    /// Publish encoded frames to the in-process snapshot slot.
    pub snapshot: bool,
}

/// Speech path configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    pub file: Option<PathBuf>,
    pub input: SoundInput,
    pub sample_rate: u32,
    pub block_samples: usize,
}

/// Run control configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Quit after this many seconds.
    pub time_secs: Option<u64>,
    /// Run stage threads with real-time priorities.
    pub realtime: bool,
    /// Read p/r/q commands from stdin.
    pub keyboard: bool,
    /// Seconds between progress log lines; 0 disables them.
    pub report_interval_secs: u64,
    pub priorities: PriorityTable,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            file: None,
            standard: VideoStandard::D1Ntsc,
            input: None,
            resolution: None,
            bit_rate: None,
            capture_buffers: CAPTURE_BUFFERS,
            pipe_size: VIDEO_PIPE_SIZE,
            writer_buffers: WRITER_BUFFERS,
            frame_limit: None,
            snapshot: false,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            file: None,
            input: SoundInput::Mic,
            sample_rate: SPEECH_SAMPLE_RATE,
            block_samples: SPEECH_BLOCK_SAMPLES,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_secs: None,
            realtime: false,
            keyboard: false,
            report_interval_secs: REPORT_INTERVAL_SECS,
            priorities: PriorityTable::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&contents).map_err(FramepipeError::from)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file is missing.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - FRAMEPIPE_VIDEO_FILE → video.file
    /// - FRAMEPIPE_SPEECH_FILE → speech.file
    /// - FRAMEPIPE_TIME → run.time_secs (whole seconds)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(file) = std::env::var("FRAMEPIPE_VIDEO_FILE")
            && !file.is_empty()
        {
            self.video.file = Some(PathBuf::from(file));
        }

        if let Ok(file) = std::env::var("FRAMEPIPE_SPEECH_FILE")
            && !file.is_empty()
        {
            self.speech.file = Some(PathBuf::from(file));
        }

        if let Ok(time) = std::env::var("FRAMEPIPE_TIME")
            && !time.is_empty()
        {
            match time.trim().parse() {
                Ok(secs) => self.run.time_secs = Some(secs),
                Err(_) => tracing::warn!(value = %time, "ignoring FRAMEPIPE_TIME, expected seconds"),
            }
        }

        self
    }

    /// Checks everything that can be checked before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.video.file.is_none() && self.speech.file.is_none() {
            return Err(FramepipeError::configuration(
                "set a video file, a speech file or both",
            ));
        }
        if let Some(file) = &self.video.file {
            video_codec_for(file)?;
        }
        if let Some(file) = &self.speech.file {
            speech_codec_for(file)?;
        }
        self.resolution()?;

        let positive = [
            ("video.capture_buffers", self.video.capture_buffers),
            ("video.pipe_size", self.video.pipe_size),
            ("video.writer_buffers", self.video.writer_buffers),
            ("speech.block_samples", self.speech.block_samples),
            ("speech.sample_rate", self.speech.sample_rate as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(FramepipeError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The configured resolution, aligned.
    pub fn resolution(&self) -> Result<Option<Resolution>> {
        self.video
            .resolution
            .as_deref()
            .map(str::parse)
            .transpose()
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            resolution: self.resolution()?,
            video_bit_rate: self.video.bit_rate,
            speech: SpeechParams {
                sample_rate: self.speech.sample_rate,
                block_samples: self.speech.block_samples,
            },
            capture_buffers: self.video.capture_buffers,
            video_pipe: self.video.pipe_size,
            writer_buffers: self.video.writer_buffers,
            realtime: self.run.realtime,
            priorities: self.run.priorities,
            side_channel: None,
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/framepipe/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("framepipe").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_framepipe_env() {
        remove_env("FRAMEPIPE_VIDEO_FILE");
        remove_env("FRAMEPIPE_SPEECH_FILE");
        remove_env("FRAMEPIPE_TIME");
    }

    fn with_video(file: &str) -> Config {
        let mut config = Config::default();
        config.video.file = Some(PathBuf::from(file));
        config
    }

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.video.file, None);
        assert_eq!(config.video.standard, VideoStandard::D1Ntsc);
        assert_eq!(config.video.pipe_size, 3);
        assert_eq!(config.video.writer_buffers, 9);
        assert_eq!(config.speech.sample_rate, 8000);
        assert_eq!(config.speech.input, SoundInput::Mic);
        assert_eq!(config.run.time_secs, None);
        assert!(!config.run.realtime);
    }

    #[test]
    fn load_from_toml_file() {
        let toml_content = r#"
            [video]
            file = "out.yuv"
            standard = "720p60"
            input = "svideo"
            resolution = "640x480"
            bit_rate = 4000000

            [speech]
            file = "speech.g711"
            input = "linein"

            [run]
            time_secs = 30
            realtime = true

            [run.priorities]
            writer = 7
        "#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.video.file, Some(PathBuf::from("out.yuv")));
        assert_eq!(config.video.standard, VideoStandard::P720x60);
        assert_eq!(config.video.input, Some(VideoInput::SVideo));
        assert_eq!(config.video.bit_rate, Some(4_000_000));
        assert_eq!(config.speech.input, SoundInput::LineIn);
        assert_eq!(config.run.time_secs, Some(30));
        assert!(config.run.realtime);
        assert_eq!(config.run.priorities.writer, 7);
        assert_eq!(config.run.priorities.capture, 0);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[speech]\nfile = \"a.ulaw\"\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.speech.file, Some(PathBuf::from("a.ulaw")));
        assert_eq!(config.video, VideoConfig::default());
        assert_eq!(config.run, RunConfig::default());
    }

    #[test]
    fn invalid_toml_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[video\nfile = ").unwrap();
        assert!(Config::load(file.path()).is_err());
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn load_or_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn env_overrides_files_and_time() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_framepipe_env();
        set_env("FRAMEPIPE_VIDEO_FILE", "env.rle");
        set_env("FRAMEPIPE_SPEECH_FILE", "env.g711");
        set_env("FRAMEPIPE_TIME", "12");

        let config = Config::default().with_env_overrides();
        clear_framepipe_env();

        assert_eq!(config.video.file, Some(PathBuf::from("env.rle")));
        assert_eq!(config.speech.file, Some(PathBuf::from("env.g711")));
        assert_eq!(config.run.time_secs, Some(12));
    }

    #[test]
    fn env_override_empty_or_bad_values_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_framepipe_env();
        set_env("FRAMEPIPE_VIDEO_FILE", "");
        set_env("FRAMEPIPE_TIME", "soon");

        let config = with_video("keep.yuv").with_env_overrides();
        clear_framepipe_env();

        assert_eq!(config.video.file, Some(PathBuf::from("keep.yuv")));
        assert_eq!(config.run.time_secs, None);
    }

    #[test]
    fn validate_needs_an_output() {
        let err = Config::default().validate().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(with_video("out.yuv").validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_codec() {
        let err = with_video("out.mp4").validate().unwrap_err();
        assert!(err.to_string().contains("mp4"), "{err}");
    }

    #[test]
    fn validate_rejects_zero_buffers() {
        let mut config = with_video("out.yuv");
        config.video.writer_buffers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("video.writer_buffers"), "{err}");
    }

    #[test]
    fn resolution_is_aligned() {
        let mut config = with_video("out.yuv");
        config.video.resolution = Some("650x490".to_string());
        let res = config.resolution().unwrap().unwrap();
        assert_eq!((res.width, res.height), (640, 480));

        config.video.resolution = Some("4000x10".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_config_carries_settings() {
        let mut config = with_video("out.yuv");
        config.video.bit_rate = Some(1_000_000);
        config.video.pipe_size = 4;
        config.run.realtime = true;

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.video_bit_rate, Some(1_000_000));
        assert_eq!(pipeline.video_pipe, 4);
        assert!(pipeline.realtime);
        assert!(pipeline.side_channel.is_none());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = with_video("out.yuv");
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn default_path_is_xdg_style() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("framepipe/config.toml"));
        }
    }
}
