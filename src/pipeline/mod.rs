//! Multi-stage capture and encode pipeline.
//!
//! Each stage runs on its own thread and exchanges pooled buffers with its
//! neighbours over [`crate::sync`] channels. Stages share two run-wide
//! barriers (init and cleanup), a pause gate and the [`RunState`] counters.

pub mod capture_stage;
pub mod error;
pub mod orchestrator;
pub mod priority;
pub mod speech_stage;
pub mod stage;
pub mod state;
pub mod video_stage;
pub mod writer_stage;

pub use capture_stage::{CaptureLinks, CaptureStage};
pub use error::{CollectingReporter, ErrorReporter, LogReporter};
pub use orchestrator::{
    ControlOptions, Pipeline, PipelineConfig, PipelineController, PipelineHandle,
    PipelineOutcome, PipelineUnits, SpeechUnits, StopReason, VideoUnits,
};
pub use priority::{PriorityTable, ResolvedPriorities, StageKind};
pub use speech_stage::SpeechStage;
pub use stage::{OutputRole, Stage, StageContext, StageReport, StageRunner, StageState, Step};
pub use state::{RunState, RunStats};
pub use video_stage::{VideoLinks, VideoStage};
pub use writer_stage::{WriterLinks, WriterStage};
