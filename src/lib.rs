//! framepipe - Threaded capture, encode and write pipeline
//!
//! Live video and speech flow through dedicated stage threads that trade
//! pooled buffers over bounded channels.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod buffer;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod device;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod sink;
pub mod sync;

// Composition root
pub mod app;

// Core traits (device → encoder → sink)
pub use codec::Encoder;
pub use device::{CaptureDevice, SoundSource};
pub use sink::{FrameSink, SideChannel};

// Building blocks
pub use buffer::{Buffer, BufferPool};
pub use sync::{Barrier, Consumer, Handoff, PauseGate, Producer, channel};

// Pipeline
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle, PipelineOutcome, PipelineUnits};

// Error handling
pub use error::{ErrorCategory, FramepipeError, Result};

// Config
pub use config::Config;

// Stage framework
pub use pipeline::{ErrorReporter, Stage, StageContext, Step};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when the hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
