//! Builds the stage graph, runs startup and drives shutdown.
//!
//! ```text
//!            frames-out               encoded-out
//!  capture ─────────────▶ video ─────────────────▶ writer ──▶ sink
//!          ◀───────────── (return) ◀─────────────── (return)
//!
//!  speech: source ──▶ encoder ──▶ sink       (independent path)
//! ```
//!
//! The calling thread is the control party on both run-wide barriers.

use crate::buffer::Buffer;
use crate::codec::{BoxedSpeechEncoder, BoxedVideoEncoder, SpeechParams};
use crate::defaults::{
    CAPTURE_BUFFERS, CONTROL_POLL_MS, SPEECH_BLOCK_SAMPLES, SPEECH_SAMPLE_RATE, VIDEO_PIPE_SIZE,
    WRITER_BUFFERS,
};
use crate::device::{CaptureDevice, SoundSource};
use crate::error::{FramepipeError, Result};
use crate::format::{Resolution, VideoFormat};
use crate::pipeline::capture_stage::{CaptureLinks, CaptureStage};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::priority::{PriorityTable, ResolvedPriorities, StageKind};
use crate::pipeline::speech_stage::SpeechStage;
use crate::pipeline::stage::{OutputRole, Stage, StageContext, StageReport, StageRunner};
use crate::pipeline::state::{RunState, RunStats};
use crate::pipeline::video_stage::{VideoLinks, VideoStage};
use crate::pipeline::writer_stage::{WriterLinks, WriterStage};
use crate::sink::{FrameSink, SideChannel};
use crate::sync::{Barrier, Handoff, Meet, OutputPort, PauseGate, Producer, channel};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Requested capture resolution; `None` keeps the detected size.
    pub resolution: Option<Resolution>,
    /// Video bit rate in bits per second; `None` for variable bit rate.
    pub video_bit_rate: Option<u32>,
    pub speech: SpeechParams,
    /// Buffers queued on the capture device.
    pub capture_buffers: usize,
    /// Buffers circulating between capture and video.
    pub video_pipe: usize,
    /// Buffers circulating between video and writer.
    pub writer_buffers: usize,
    /// Run stage threads under `SCHED_FIFO`.
    pub realtime: bool,
    pub priorities: PriorityTable,
    /// Optional lossy tap on the writer's output.
    pub side_channel: Option<Arc<dyn SideChannel>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolution: None,
            video_bit_rate: None,
            speech: SpeechParams {
                sample_rate: SPEECH_SAMPLE_RATE,
                block_samples: SPEECH_BLOCK_SAMPLES,
            },
            capture_buffers: CAPTURE_BUFFERS,
            video_pipe: VIDEO_PIPE_SIZE,
            writer_buffers: WRITER_BUFFERS,
            realtime: false,
            priorities: PriorityTable::default(),
            side_channel: None,
        }
    }
}

/// Processing units for the video path.
pub struct VideoUnits {
    pub capture: Box<dyn CaptureDevice>,
    pub encoder: BoxedVideoEncoder,
    pub sink: Box<dyn FrameSink>,
}

/// Processing units for the speech path.
pub struct SpeechUnits {
    pub source: Box<dyn SoundSource>,
    pub encoder: BoxedSpeechEncoder,
    pub sink: Box<dyn FrameSink>,
}

/// The external units a run is built from. At least one path is required.
#[derive(Default)]
pub struct PipelineUnits {
    pub video: Option<VideoUnits>,
    pub speech: Option<SpeechUnits>,
}

impl PipelineUnits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(
        mut self,
        capture: Box<dyn CaptureDevice>,
        encoder: BoxedVideoEncoder,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        self.video = Some(VideoUnits {
            capture,
            encoder,
            sink,
        });
        self
    }

    pub fn with_speech(
        mut self,
        source: Box<dyn SoundSource>,
        encoder: BoxedSpeechEncoder,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        self.speech = Some(SpeechUnits {
            source,
            encoder,
            sink,
        });
        self
    }

    fn party_count(&self) -> usize {
        1 + if self.video.is_some() { 3 } else { 0 } + usize::from(self.speech.is_some())
    }
}

/// Options for the control loop in [`PipelineHandle::wait`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlOptions {
    /// Request quit after this long.
    pub time_limit: Option<Duration>,
    /// Log progress this often.
    pub report_interval: Option<Duration>,
}

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every source ran dry and the data drained.
    Completed,
    /// Quit was requested (interactive, signal or stage failure).
    QuitRequested,
    TimeLimit,
}

/// Result of a whole run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub reports: Vec<StageReport>,
    pub stats: RunStats,
    pub stop_reason: StopReason,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(StageReport::is_success)
    }

    /// The failure that happened first, which usually caused the others.
    pub fn first_failure(&self) -> Option<&StageReport> {
        self.reports
            .iter()
            .filter(|r| !r.is_success())
            .min_by_key(|r| r.failure_order.unwrap_or(u64::MAX))
    }

    /// Collapses the outcome to the stats or the first failure.
    pub fn into_result(self) -> Result<RunStats> {
        match first_failure(self.reports) {
            Some(err) => Err(err),
            None => Ok(self.stats),
        }
    }
}

fn first_failure(reports: Vec<StageReport>) -> Option<FramepipeError> {
    reports
        .into_iter()
        .filter_map(|r| {
            let order = r.failure_order.unwrap_or(u64::MAX);
            r.result.err().map(|e| (order, e))
        })
        .min_by_key(|(order, _)| *order)
        .map(|(_, e)| e)
}

/// Clonable remote control for a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineController {
    run_state: Arc<RunState>,
    pause: Arc<PauseGate>,
}

impl PipelineController {
    pub fn request_quit(&self) {
        self.run_state.request_quit();
        // A paused stage must get to see the quit flag.
        self.pause.resume();
    }

    pub fn quit_requested(&self) -> bool {
        self.run_state.quit_requested()
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn stats(&self) -> RunStats {
        self.run_state.snapshot()
    }
}

/// Run-wide coordination objects.
struct Shared {
    run_state: Arc<RunState>,
    pause: Arc<PauseGate>,
    init: Arc<Barrier>,
    cleanup: Arc<Barrier>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Shared {
    fn context(&self) -> StageContext {
        StageContext::new(
            Arc::clone(&self.run_state),
            Arc::clone(&self.pause),
            Arc::clone(&self.init),
            Arc::clone(&self.cleanup),
            Arc::clone(&self.reporter),
        )
    }
}

/// Stages and channels started so far.
#[derive(Default)]
struct Launch {
    runners: Vec<StageRunner>,
    outputs: Vec<Arc<dyn OutputPort>>,
}

impl Launch {
    fn track<T: Send + 'static>(&mut self, producer: &Producer<T>) -> Arc<dyn OutputPort> {
        let port: Arc<dyn OutputPort> = Arc::new(producer.control());
        self.outputs.push(Arc::clone(&port));
        port
    }

    fn spawn<S: Stage>(&mut self, stage: S, ctx: StageContext, priority: Option<i32>) -> Result<()> {
        self.runners.push(StageRunner::spawn(stage, ctx, priority)?);
        Ok(())
    }
}

/// Media pipeline: capture → video → writer, plus an optional speech path.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl Pipeline {
    /// Creates a new pipeline with the logging error reporter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Spawns every stage and waits until all of them are armed.
    ///
    /// Returns once the init barrier completes. If any stage fails before
    /// arming, the whole run is torn down here and the earliest failure is
    /// returned.
    pub fn start(self, units: PipelineUnits) -> Result<PipelineHandle> {
        if units.video.is_none() && units.speech.is_none() {
            return Err(FramepipeError::configuration(
                "nothing to run: configure a video file, a speech file or both",
            ));
        }
        self.validate()?;

        let parties = units.party_count();
        let shared = Shared {
            run_state: Arc::new(RunState::new()),
            pause: Arc::new(PauseGate::new()),
            init: Arc::new(Barrier::new("init", parties)?),
            cleanup: Arc::new(Barrier::new("cleanup", parties)?),
            reporter: Arc::clone(&self.error_reporter),
        };
        let priorities = self.config.priorities.resolve(self.config.realtime);

        let mut launch = Launch::default();
        if let Err(err) = self.launch(&shared, &priorities, units, &mut launch) {
            return Err(abort_startup(&shared, launch, err));
        }

        let armed = shared.init.meet() == Meet::Complete;
        let handle = PipelineHandle {
            shared,
            runners: launch.runners,
            outputs: launch.outputs,
        };
        if !armed {
            warn!("a stage failed while arming; draining");
            let outcome = handle.shutdown(StopReason::QuitRequested);
            return Err(first_failure(outcome.reports).unwrap_or_else(|| {
                FramepipeError::configuration("pipeline startup abandoned")
            }));
        }
        info!(stages = handle.runners.len(), "pipeline running");
        Ok(handle)
    }

    fn validate(&self) -> Result<()> {
        let counts = [
            ("capture_buffers", self.config.capture_buffers),
            ("video_pipe", self.config.video_pipe),
            ("writer_buffers", self.config.writer_buffers),
        ];
        for (key, count) in counts {
            if count == 0 {
                return Err(FramepipeError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    fn launch(
        &self,
        shared: &Shared,
        priorities: &ResolvedPriorities,
        units: PipelineUnits,
        launch: &mut Launch,
    ) -> Result<()> {
        if let Some(video) = units.video {
            self.launch_video(shared, priorities, video, launch)?;
        }
        if let Some(speech) = units.speech {
            let stage = SpeechStage::new(speech.source, speech.encoder, speech.sink, self.config.speech);
            launch.spawn(
                stage,
                shared.context(),
                priorities.for_stage(StageKind::Speech),
            )?;
        }
        Ok(())
    }

    /// Starts capture, video and writer in upstream order.
    ///
    /// Each downstream stage needs a value the upstream one only learns
    /// while negotiating, so the orchestrator waits on a handoff in between.
    fn launch_video(
        &self,
        shared: &Shared,
        priorities: &ResolvedPriorities,
        video: VideoUnits,
        launch: &mut Launch,
    ) -> Result<()> {
        let (frames_out, frames_in) = channel::<Buffer>("capture-out");
        let (frames_back_tx, frames_back_rx) = channel::<Buffer>("capture-return");
        let (encoded_out, encoded_in) = channel::<Buffer>("writer-in");
        let (encoded_back_tx, encoded_back_rx) = channel::<Buffer>("writer-return");
        let format_handoff = Arc::new(Handoff::<VideoFormat>::new("capture-format"));
        let size_handoff = Arc::new(Handoff::<usize>::new("encoder-output-size"));

        let capture_ctx = shared
            .context()
            .with_barrier(format_handoff.barrier())
            .with_output(launch.track(&frames_out), OutputRole::Data);
        let capture = CaptureStage::new(
            video.capture,
            self.config.resolution,
            self.config.capture_buffers,
            self.config.video_pipe,
            CaptureLinks {
                frames_out,
                frames_back: frames_back_rx,
                format: Arc::clone(&format_handoff),
            },
        );
        launch.spawn(capture, capture_ctx, priorities.for_stage(StageKind::Capture))?;

        let format = format_handoff.receive().ok_or_else(|| {
            FramepipeError::configuration("capture stage stopped before agreeing on a format")
        })?;

        let video_ctx = shared
            .context()
            .with_barrier(size_handoff.barrier())
            .with_output(launch.track(&frames_back_tx), OutputRole::Recycle)
            .with_output(launch.track(&encoded_out), OutputRole::Data);
        let video_stage = VideoStage::new(
            video.encoder,
            format,
            self.config.video_bit_rate,
            self.config.video_pipe,
            VideoLinks {
                frames_in,
                frames_back: frames_back_tx,
                encoded_out,
                encoded_back: encoded_back_rx,
                output_size: Arc::clone(&size_handoff),
            },
        );
        launch.spawn(video_stage, video_ctx, priorities.for_stage(StageKind::Video))?;

        let output_size = size_handoff.receive().ok_or_else(|| {
            FramepipeError::configuration("video stage stopped before sizing its output")
        })?;

        let writer_ctx = shared
            .context()
            .with_output(launch.track(&encoded_back_tx), OutputRole::Recycle);
        let writer = WriterStage::new(
            video.sink,
            self.config.writer_buffers,
            output_size,
            WriterLinks {
                encoded_in,
                encoded_back: encoded_back_tx,
            },
        )
        .with_side_channel(self.config.side_channel.clone());
        launch.spawn(writer, writer_ctx, priorities.for_stage(StageKind::Writer))?;
        Ok(())
    }
}

/// Tears down a partially started run.
///
/// Parties that were never spawned cannot arrive, so both run-wide barriers
/// are forced before joining whoever did start.
fn abort_startup(shared: &Shared, launch: Launch, err: FramepipeError) -> FramepipeError {
    warn!(error = %err, "pipeline startup aborted");
    shared.run_state.request_quit();
    shared.pause.disable();
    for output in &launch.outputs {
        output.flush_discard();
    }
    shared.init.force();
    shared.cleanup.force();

    let reports: Vec<StageReport> = launch.runners.into_iter().map(StageRunner::join).collect();
    first_failure(reports).unwrap_or(err)
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    shared: Shared,
    runners: Vec<StageRunner>,
    outputs: Vec<Arc<dyn OutputPort>>,
}

impl PipelineHandle {
    pub fn controller(&self) -> PipelineController {
        PipelineController {
            run_state: Arc::clone(&self.shared.run_state),
            pause: Arc::clone(&self.shared.pause),
        }
    }

    pub fn stats(&self) -> RunStats {
        self.shared.run_state.snapshot()
    }

    pub fn request_quit(&self) {
        self.controller().request_quit();
    }

    /// Runs the control loop until the run ends, then shuts down.
    ///
    /// The run ends when quit is requested (also by a failing stage), the
    /// time limit passes, or every stage has finished on its own.
    pub fn wait(self, options: ControlOptions) -> PipelineOutcome {
        let poll = Duration::from_millis(CONTROL_POLL_MS);
        let started = Instant::now();
        let mut last_report = started;

        let reason = loop {
            let run_state = &self.shared.run_state;
            if run_state.quit_requested() {
                break StopReason::QuitRequested;
            }
            if let Some(limit) = options.time_limit
                && started.elapsed() >= limit
            {
                info!(?limit, "time limit reached");
                run_state.request_quit();
                break StopReason::TimeLimit;
            }
            if run_state.active_stages() == 0 {
                break StopReason::Completed;
            }
            if let Some(interval) = options.report_interval
                && last_report.elapsed() >= interval
            {
                let stats = run_state.snapshot();
                info!(
                    frames = stats.frames,
                    video_bytes = stats.video_bytes,
                    speech_bytes = stats.speech_bytes,
                    "progress"
                );
                last_report = Instant::now();
            }
            thread::sleep(poll);
        };

        self.shutdown(reason)
    }

    /// Requests quit and shuts down without waiting for sources to run dry.
    pub fn stop(self) -> PipelineOutcome {
        self.request_quit();
        self.shutdown(StopReason::QuitRequested)
    }

    fn shutdown(self, reason: StopReason) -> PipelineOutcome {
        debug!(?reason, "shutting down");
        if reason != StopReason::Completed {
            let discarded: usize = self.outputs.iter().map(|o| o.flush_discard()).sum();
            debug!(discarded, "channels flushed");
        }
        self.shared.pause.disable();
        self.shared.init.force();
        if self.shared.cleanup.meet() == Meet::Forced {
            debug!("cleanup barrier forced");
        }

        let reports: Vec<StageReport> = self.runners.into_iter().map(StageRunner::join).collect();
        let stats = self.shared.run_state.snapshot();
        info!(
            frames = stats.frames,
            video_bytes = stats.video_bytes,
            speech_bytes = stats.speech_bytes,
            ?reason,
            "pipeline stopped"
        );
        PipelineOutcome {
            reports,
            stats,
            stop_reason: reason,
        }
    }
}
