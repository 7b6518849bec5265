//! Application entry point.
//!
//! Turns a [`Config`] into processing units, starts the pipeline and runs
//! the control surface (signals, keyboard, time limit) until it stops.

use crate::codec::{speech_codec_for, video_codec_for};
use crate::config::Config;
use crate::defaults::SNAPSHOT_CAPACITY;
use crate::device::{SyntheticCapture, ToneSource};
use crate::error::Result;
use crate::pipeline::priority::raise_process_priority;
use crate::pipeline::{
    ControlOptions, Pipeline, PipelineController, PipelineOutcome, PipelineUnits, RunStats,
    StopReason,
};
use crate::sink::{FileSink, SnapshotReader, snapshot_slot};
use serde::Serialize;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-stage line of a [`RunSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: &'static str,
    pub iterations: u64,
    pub error: Option<String>,
}

/// What a finished run reports to the user.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub stats: RunStats,
    pub stages: Vec<StageSummary>,
    /// Message of the failure that happened first, if any.
    pub first_error: Option<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }
}

impl From<PipelineOutcome> for RunSummary {
    fn from(outcome: PipelineOutcome) -> Self {
        let first_error = outcome
            .first_failure()
            .and_then(|r| r.result.as_ref().err())
            .map(ToString::to_string);
        let stages = outcome
            .reports
            .iter()
            .map(|r| StageSummary {
                stage: r.stage,
                iterations: r.iterations,
                error: r.result.as_ref().err().map(ToString::to_string),
            })
            .collect();
        Self {
            stop_reason: outcome.stop_reason,
            stats: outcome.stats,
            stages,
            first_error,
        }
    }
}

/// Builds the processing units the configuration asks for.
///
/// Capture and sound input are synthetic and paced at their nominal rate.
pub fn build_units(config: &Config) -> Result<PipelineUnits> {
    let mut units = PipelineUnits::new();

    if let Some(file) = &config.video.file {
        let codec = video_codec_for(file)?;
        let standard = config.video.standard;
        let mut capture = SyntheticCapture::new(standard)
            .with_input(config.video.input.unwrap_or(standard.default_input()))
            .paced();
        if let Some(frames) = config.video.frame_limit {
            capture = capture.with_frame_limit(frames);
        }
        info!(file = %file.display(), codec = codec.name, %standard, "video enabled");
        units = units.with_video(
            Box::new(capture),
            codec.create(),
            Box::new(FileSink::new(file)),
        );
    }

    if let Some(file) = &config.speech.file {
        let codec = speech_codec_for(file)?;
        let input = config.speech.input;
        let source =
            ToneSource::new(config.speech.sample_rate, input.test_tone_hz()).paced();
        info!(file = %file.display(), codec = codec.name, ?input, "speech enabled");
        units = units.with_speech(
            Box::new(source),
            codec.create(),
            Box::new(FileSink::new(file)),
        );
    }

    Ok(units)
}

/// Runs the pipeline described by `config` to completion.
///
/// A stage failure is not an `Err` here; it shows up in the summary so the
/// caller can still print statistics. `Err` means the run never started.
pub fn run(config: &Config) -> Result<RunSummary> {
    config.validate()?;
    let mut pipeline_config = config.pipeline_config()?;

    let snapshots = if config.video.snapshot {
        let (slot, reader) = snapshot_slot(SNAPSHOT_CAPACITY);
        pipeline_config.side_channel = Some(Arc::new(slot));
        Some(SnapshotWatcher::spawn(reader))
    } else {
        None
    };

    if config.run.realtime
        && let Err(e) = raise_process_priority()
    {
        warn!(error = %e, "could not raise process priority");
    }

    let units = build_units(config)?;
    let handle = Pipeline::new(pipeline_config).start(units)?;
    let controller = handle.controller();

    #[cfg(feature = "cli")]
    install_signal_handler(controller.clone());
    if config.run.keyboard {
        spawn_keyboard_control(controller);
    }

    let report_interval = config.run.report_interval_secs;
    let outcome = handle.wait(ControlOptions {
        time_limit: config.run.time_secs.map(Duration::from_secs),
        report_interval: (report_interval > 0).then(|| Duration::from_secs(report_interval)),
    });

    if let Some(watcher) = snapshots {
        watcher.stop();
    }
    Ok(RunSummary::from(outcome))
}

/// Requests quit on Ctrl-C.
#[cfg(feature = "cli")]
fn install_signal_handler(controller: PipelineController) {
    let result = ctrlc::set_handler(move || {
        info!("interrupted, stopping");
        controller.request_quit();
    });
    if let Err(e) = result {
        warn!(error = %e, "could not install Ctrl-C handler");
    }
}

/// Keyboard command understood on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyCommand {
    Pause,
    Resume,
    Quit,
}

fn parse_key_command(line: &str) -> Option<KeyCommand> {
    match line.trim() {
        "p" => Some(KeyCommand::Pause),
        "r" => Some(KeyCommand::Resume),
        "q" => Some(KeyCommand::Quit),
        _ => None,
    }
}

/// Reads commands from stdin until quit or end of input.
///
/// The thread is detached: it may sit in a blocking read after the run ends.
fn spawn_keyboard_control(controller: PipelineController) {
    let spawned = thread::Builder::new()
        .name("fp-keyboard".to_string())
        .spawn(move || {
            eprintln!("keyboard control: p = pause, r = resume, q = quit");
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_key_command(&line) {
                    Some(KeyCommand::Pause) => {
                        info!("paused");
                        controller.pause();
                    }
                    Some(KeyCommand::Resume) => {
                        info!("resumed");
                        controller.resume();
                    }
                    Some(KeyCommand::Quit) => {
                        controller.request_quit();
                        break;
                    }
                    None => eprintln!("unknown command '{}'", line.trim()),
                }
                if controller.quit_requested() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "keyboard control unavailable");
    }
}

/// Drains the snapshot slot in the background and logs what arrives.
struct SnapshotWatcher {
    done: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

impl SnapshotWatcher {
    fn spawn(reader: SnapshotReader) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = thread::spawn(move || {
            let mut received = 0u64;
            while !flag.load(Ordering::SeqCst) {
                if let Some(snapshot) = reader.take_timeout(Duration::from_millis(200)) {
                    received += 1;
                    debug!(bytes = snapshot.len(), received, "snapshot");
                }
            }
            received
        });
        Self { done, handle }
    }

    fn stop(self) {
        self.done.store(true, Ordering::SeqCst);
        match self.handle.join() {
            Ok(received) => debug!(received, "snapshot watcher stopped"),
            Err(_) => warn!("snapshot watcher panicked"),
        }
    }
}
