//! Default configuration constants for framepipe.
//!
//! Shared by the config file layer, the CLI and the pipeline so that buffer
//! counts and limits stay consistent.

/// Buffers circulating between capture and video encoder.
///
/// Three is enough to keep the encoder fed while one frame is being
/// captured and one is on its way back.
pub const VIDEO_PIPE_SIZE: usize = 3;

/// Buffers handed to the capture device for its own queue.
pub const CAPTURE_BUFFERS: usize = 3;

/// Buffers circulating between video encoder and writer.
///
/// The writer is the slowest consumer (disk I/O), so it gets the deepest queue.
pub const WRITER_BUFFERS: usize = 9;

/// Largest accepted capture width.
pub const MAX_WIDTH: u32 = 1920;

/// Largest accepted capture height.
pub const MAX_HEIGHT: u32 = 1080;

/// Smallest accepted capture dimension.
pub const MIN_DIMENSION: u32 = 2;

/// Explicit resolutions are rounded down to a multiple of this.
pub const RESOLUTION_ALIGNMENT: u32 = 16;

/// Speech sample rate in Hz (narrowband telephony).
pub const SPEECH_SAMPLE_RATE: u32 = 8000;

/// Samples per speech block handed to the encoder.
pub const SPEECH_BLOCK_SAMPLES: usize = 256;

/// Interval at which the control thread checks for quit and completion.
pub const CONTROL_POLL_MS: u64 = 20;

/// Interval between progress reports while running.
pub const REPORT_INTERVAL_SECS: u64 = 1;

/// Largest payload carried by the snapshot side channel.
pub const SNAPSHOT_CAPACITY: usize = 64 * 1024;
