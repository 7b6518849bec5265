//! Cooperative suspend point for stage loops.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct PauseState {
    paused: bool,
    disabled: bool,
}

/// Shared pause flag that stages check once per iteration.
///
/// [`resume`](PauseGate::resume) is the ordinary un-pause.
/// [`disable`](PauseGate::disable) is one-way: used during shutdown so no
/// stage can get stuck paused while its peers unwind.
#[derive(Debug, Default)]
pub struct PauseGate {
    state: Mutex<PauseState>,
    changed: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engages the gate. Has no effect once disabled.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if !state.disabled {
            state.paused = true;
            tracing::debug!("pipeline paused");
        }
    }

    /// Releases the gate; it can be engaged again later.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.paused {
            state.paused = false;
            tracing::debug!("pipeline resumed");
        }
        self.changed.notify_all();
    }

    /// Releases the gate and permanently disables it.
    pub fn disable(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.disabled = true;
        self.changed.notify_all();
    }

    /// Blocks while the gate is engaged.
    pub fn test(&self) {
        let mut state = self.state.lock();
        while state.paused && !state.disabled {
            self.changed.wait(&mut state);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }
}
