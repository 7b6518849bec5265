//! Stage abstraction and the runner that drives its lifecycle.
//!
//! Every stage walks the same states on its own thread:
//!
//! ```text
//! Negotiating -> Allocating -> Armed -> Running -> Draining -> Terminated
//! ```
//!
//! Any state may skip ahead to `Draining`. Draining always forces the
//! barriers the stage takes part in, disables the pause gate, empties or
//! closes its outputs and then meets the cleanup barrier, so a stage that
//! fails early can never leave its peers blocked.

use crate::error::{FramepipeError, Result};
use crate::pipeline::error::ErrorReporter;
use crate::pipeline::priority::apply_to_current_thread;
use crate::pipeline::state::RunState;
use crate::sync::{Barrier, Meet, OutputPort, PauseGate};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Negotiating,
    Allocating,
    Armed,
    Running,
    Draining,
    Terminated,
}

/// What a stage callback wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep going.
    Continue,
    /// An input was flushed; discard everything downstream.
    Flushed,
    /// Input is exhausted; let downstream consume what is queued.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainMode {
    Flush,
    Close,
}

impl Step {
    fn drain_mode(self) -> Option<DrainMode> {
        match self {
            Step::Continue => None,
            Step::Flushed => Some(DrainMode::Flush),
            Step::Finished => Some(DrainMode::Close),
        }
    }
}

/// How an output channel is treated when its stage finishes normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRole {
    /// Carries data downstream; closed so the backlog is still delivered.
    Data,
    /// Hands empty buffers back upstream; always emptied.
    Recycle,
}

/// A pipeline stage.
///
/// Implementations only describe the work. The runner owns the state
/// machine, the barriers and the drain sequence.
pub trait Stage: Send + 'static {
    fn name(&self) -> &'static str;

    /// Agree on formats with peers. Runs before any buffer exists.
    fn negotiate(&mut self, _ctx: &StageContext) -> Result<Step> {
        Ok(Step::Continue)
    }

    /// Create pools and seed return channels.
    fn allocate(&mut self, _ctx: &StageContext) -> Result<Step> {
        Ok(Step::Continue)
    }

    /// One unit of steady-state work.
    fn step(&mut self, ctx: &StageContext) -> Result<Step>;

    /// Release device handles and pools. Runs after the cleanup barrier,
    /// also after failures.
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Everything a stage shares with the rest of the run.
pub struct StageContext {
    run_state: Arc<RunState>,
    pause: Arc<PauseGate>,
    init: Arc<Barrier>,
    cleanup: Arc<Barrier>,
    forced_on_drain: Vec<Arc<Barrier>>,
    outputs: Vec<(Arc<dyn OutputPort>, OutputRole)>,
    reporter: Arc<dyn ErrorReporter>,
}

impl StageContext {
    pub fn new(
        run_state: Arc<RunState>,
        pause: Arc<PauseGate>,
        init: Arc<Barrier>,
        cleanup: Arc<Barrier>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            run_state,
            pause,
            init,
            cleanup,
            forced_on_drain: Vec::new(),
            outputs: Vec::new(),
            reporter,
        }
    }

    /// Adds a barrier that must be forced when this stage drains.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.forced_on_drain.push(barrier);
        self
    }

    /// Registers a channel this stage produces into.
    pub fn with_output(mut self, port: Arc<dyn OutputPort>, role: OutputRole) -> Self {
        self.outputs.push((port, role));
        self
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    pub fn pause(&self) -> &PauseGate {
        &self.pause
    }

    fn drain(&self, stage: &str, mode: DrainMode) {
        self.run_state.stage_draining();
        for barrier in &self.forced_on_drain {
            barrier.force();
        }
        self.init.force();
        self.pause.disable();

        for (port, role) in &self.outputs {
            match (mode, role) {
                (DrainMode::Close, OutputRole::Data) => port.close(),
                _ => {
                    let discarded = port.flush_discard();
                    if discarded > 0 {
                        debug!(stage, channel = port.name(), discarded, "output flushed");
                    }
                }
            }
        }

        if self.cleanup.meet() == Meet::Forced {
            debug!(stage, "cleanup barrier forced");
        }
    }

    fn fail(&self, stage: &str, error: &FramepipeError) -> u64 {
        self.reporter.report(stage, error);
        self.run_state.request_quit();
        self.run_state.record_failure()
    }
}

/// Final account of one stage run.
#[derive(Debug)]
pub struct StageReport {
    pub stage: &'static str,
    /// Completed steady-state iterations.
    pub iterations: u64,
    /// State the stage was in when it started draining.
    pub last_state: StageState,
    pub result: Result<()>,
    /// Position of this failure among all failures of the run.
    pub failure_order: Option<u64>,
}

impl StageReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

struct Progress {
    stage: &'static str,
    state: StageState,
    iterations: u64,
}

impl Progress {
    fn enter(&mut self, state: StageState) {
        debug!(stage = self.stage, ?state, "stage state");
        self.state = state;
    }
}

/// Runs one stage on a dedicated thread.
#[derive(Debug)]
pub struct StageRunner {
    handle: Option<JoinHandle<StageReport>>,
    stage_name: &'static str,
}

impl StageRunner {
    /// Spawns `stage`; `priority` selects a `SCHED_FIFO` priority.
    pub fn spawn<S: Stage>(stage: S, ctx: StageContext, priority: Option<i32>) -> Result<Self> {
        let stage_name = stage.name();
        let run_state = Arc::clone(&ctx.run_state);
        run_state.stage_started();

        let spawned = thread::Builder::new()
            .name(format!("fp-{stage_name}"))
            .spawn(move || run_stage(stage, ctx, priority));

        match spawned {
            Ok(handle) => Ok(Self {
                handle: Some(handle),
                stage_name,
            }),
            Err(e) => {
                run_state.stage_draining();
                Err(e.into())
            }
        }
    }

    /// Waits for the stage thread and returns its report.
    pub fn join(mut self) -> StageReport {
        let Some(handle) = self.handle.take() else {
            return StageReport {
                stage: self.stage_name,
                iterations: 0,
                last_state: StageState::Terminated,
                result: Ok(()),
                failure_order: None,
            };
        };
        match handle.join() {
            Ok(report) => report,
            Err(payload) => StageReport {
                stage: self.stage_name,
                iterations: 0,
                last_state: StageState::Terminated,
                result: Err(FramepipeError::StagePanicked {
                    stage: self.stage_name.to_string(),
                    message: panic_message(payload.as_ref()),
                }),
                failure_order: None,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.stage_name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

fn run_stage<S: Stage>(mut stage: S, ctx: StageContext, priority: Option<i32>) -> StageReport {
    let name = stage.name();
    if let Some(priority) = priority
        && let Err(e) = apply_to_current_thread(priority)
    {
        warn!(stage = name, priority, error = %e, "could not apply real-time priority");
    }

    let mut progress = Progress {
        stage: name,
        state: StageState::Negotiating,
        iterations: 0,
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| drive(&mut stage, &ctx, &mut progress)))
        .unwrap_or_else(|payload| {
            Err(FramepipeError::StagePanicked {
                stage: name.to_string(),
                message: panic_message(payload.as_ref()),
            })
        });
    let last_state = progress.state;

    let (mode, mut result) = match outcome {
        Ok(mode) => (mode, Ok(())),
        Err(e) => (DrainMode::Flush, Err(e)),
    };
    let mut failure_order = result.as_ref().err().map(|e| ctx.fail(name, e));

    progress.enter(StageState::Draining);
    ctx.drain(name, mode);

    let torn_down = panic::catch_unwind(AssertUnwindSafe(|| stage.teardown())).unwrap_or_else(|payload| {
        Err(FramepipeError::StagePanicked {
            stage: name.to_string(),
            message: panic_message(payload.as_ref()),
        })
    });
    if let Err(e) = torn_down {
        if result.is_ok() {
            failure_order = Some(ctx.fail(name, &e));
            result = Err(e);
        } else {
            error!(stage = name, error = %e, "teardown failed after earlier error");
        }
    }

    progress.enter(StageState::Terminated);
    debug!(stage = name, iterations = progress.iterations, "stage terminated");

    StageReport {
        stage: name,
        iterations: progress.iterations,
        last_state,
        result,
        failure_order,
    }
}

fn drive<S: Stage>(stage: &mut S, ctx: &StageContext, progress: &mut Progress) -> Result<DrainMode> {
    progress.enter(StageState::Negotiating);
    if let Some(mode) = stage.negotiate(ctx)?.drain_mode() {
        return Ok(mode);
    }

    progress.enter(StageState::Allocating);
    if let Some(mode) = stage.allocate(ctx)?.drain_mode() {
        return Ok(mode);
    }

    progress.enter(StageState::Armed);
    if ctx.init.meet() == Meet::Forced {
        debug!(stage = progress.stage, "startup abandoned by a peer");
        return Ok(DrainMode::Flush);
    }

    progress.enter(StageState::Running);
    while !ctx.run_state.quit_requested() {
        ctx.pause.test();
        if let Some(mode) = stage.step(ctx)?.drain_mode() {
            return Ok(mode);
        }
        progress.iterations += 1;
    }
    Ok(DrainMode::Flush)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
