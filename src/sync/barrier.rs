//! Fixed-party rendezvous with a forced-release escape.
//!
//! Every stage meets the init barrier before entering its steady state and the
//! cleanup barrier before releasing its resources. A stage that fails forces
//! the barriers it takes part in so that peers waiting for it are released.

use crate::error::{FramepipeError, Result};
use parking_lot::{Condvar, Mutex};

/// How a [`Barrier::meet`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meet {
    /// All parties arrived.
    Complete,
    /// The barrier was forced before the last party arrived.
    Forced,
}

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    forced: bool,
}

/// N-party reusable barrier.
///
/// A generation ends either when the N-th party arrives or when the barrier
/// is forced. A forced generation stays forced: later `meet` calls return
/// [`Meet::Forced`] immediately until [`reset`](Barrier::reset) starts a new
/// generation, whose meets wait normally again.
#[derive(Debug)]
pub struct Barrier {
    name: String,
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl Barrier {
    pub fn new(name: impl Into<String>, parties: usize) -> Result<Self> {
        let name = name.into();
        if parties == 0 {
            return Err(FramepipeError::configuration(format!(
                "barrier '{name}' needs at least one party"
            )));
        }
        Ok(Self::build(name, parties))
    }

    /// Two-party barrier, as used for negotiation handoffs.
    pub fn pair(name: impl Into<String>) -> Self {
        Self::build(name.into(), 2)
    }

    fn build(name: String, parties: usize) -> Self {
        Self {
            name,
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                forced: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Blocks until all parties have arrived or the barrier is forced.
    pub fn meet(&self) -> Meet {
        let mut state = self.state.lock();
        if state.forced {
            return Meet::Forced;
        }

        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            tracing::trace!(barrier = %self.name, generation = state.generation, "complete");
            return Meet::Complete;
        }

        let generation = state.generation;
        while state.generation == generation && !state.forced {
            self.released.wait(&mut state);
        }

        if state.generation != generation {
            Meet::Complete
        } else {
            Meet::Forced
        }
    }

    /// Releases all current waiters and makes later meets in this
    /// generation return immediately. Idempotent.
    pub fn force(&self) {
        let mut state = self.state.lock();
        if !state.forced {
            tracing::debug!(barrier = %self.name, waiting = state.arrived, "forced");
        }
        state.forced = true;
        state.arrived = 0;
        self.released.notify_all();
    }

    /// Starts a fresh generation in which meets wait normally again.
    ///
    /// Only meaningful once every party of the forced generation has left.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.forced = false;
        state.arrived = 0;
        state.generation += 1;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Completed (or reset) generations so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_forced(&self) -> bool {
        self.state.lock().forced
    }

    /// Parties currently waiting in this generation.
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }
}
