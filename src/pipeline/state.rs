//! Run-wide flags and counters shared by the orchestrator and every stage.

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    quit: bool,
    frames: u64,
    video_bytes: u64,
    speech_bytes: u64,
    image: Option<(u32, u32)>,
    active_stages: usize,
    failures: u64,
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub frames: u64,
    pub video_bytes: u64,
    pub speech_bytes: u64,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub quit_requested: bool,
}

/// Shared state: the quit flag plus statistics counters.
///
/// All fields sit behind one lock; stages touch it once per iteration.
#[derive(Debug, Default)]
pub struct RunState {
    counters: Mutex<Counters>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every stage to leave its steady-state loop. Idempotent.
    pub fn request_quit(&self) {
        let mut counters = self.counters.lock();
        if !counters.quit {
            tracing::debug!("quit requested");
            counters.quit = true;
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.counters.lock().quit
    }

    pub fn inc_frames(&self) {
        self.counters.lock().frames += 1;
    }

    pub fn add_video_bytes(&self, bytes: usize) {
        self.counters.lock().video_bytes += bytes as u64;
    }

    pub fn add_speech_bytes(&self, bytes: usize) {
        self.counters.lock().speech_bytes += bytes as u64;
    }

    /// Records the negotiated image size.
    pub fn set_image_size(&self, width: u32, height: u32) {
        self.counters.lock().image = Some((width, height));
    }

    /// Called before a stage thread starts.
    pub(crate) fn stage_started(&self) {
        self.counters.lock().active_stages += 1;
    }

    /// Called when a stage leaves its steady state, for whatever reason.
    pub(crate) fn stage_draining(&self) {
        let mut counters = self.counters.lock();
        counters.active_stages = counters.active_stages.saturating_sub(1);
    }

    /// Stages that have started but not yet begun draining.
    pub fn active_stages(&self) -> usize {
        self.counters.lock().active_stages
    }

    /// Returns the 1-based order in which this failure happened.
    pub(crate) fn record_failure(&self) -> u64 {
        let mut counters = self.counters.lock();
        counters.failures += 1;
        counters.failures
    }

    pub fn snapshot(&self) -> RunStats {
        let counters = self.counters.lock();
        RunStats {
            frames: counters.frames,
            video_bytes: counters.video_bytes,
            speech_bytes: counters.speech_bytes,
            image_width: counters.image.map(|(w, _)| w),
            image_height: counters.image.map(|(_, h)| h),
            quit_requested: counters.quit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counters_accumulate() {
        let state = RunState::new();
        state.inc_frames();
        state.inc_frames();
        state.add_video_bytes(100);
        state.add_speech_bytes(7);
        state.set_image_size(720, 480);

        let stats = state.snapshot();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.video_bytes, 100);
        assert_eq!(stats.speech_bytes, 7);
        assert_eq!(stats.image_width, Some(720));
        assert_eq!(stats.image_height, Some(480));
        assert!(!stats.quit_requested);
    }

    #[test]
    fn quit_is_sticky() {
        let state = RunState::new();
        state.request_quit();
        state.request_quit();
        assert!(state.quit_requested());
        assert!(state.snapshot().quit_requested);
    }

    #[test]
    fn failure_order_is_monotonic() {
        let state = RunState::new();
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
    }

    #[test]
    fn active_stage_count_never_underflows() {
        let state = RunState::new();
        state.stage_started();
        state.stage_draining();
        state.stage_draining();
        assert_eq!(state.active_stages(), 0);
    }

    #[test]
    fn concurrent_frame_counting() {
        let state = Arc::new(RunState::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..250 {
                        state.inc_frames();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.snapshot().frames, 1000);
    }

    #[test]
    fn stats_serialize_to_json() {
        let state = RunState::new();
        state.inc_frames();
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["frames"], 1);
        assert_eq!(json["image_width"], serde_json::Value::Null);
    }
}
