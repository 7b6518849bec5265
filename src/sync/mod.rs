//! Coordination primitives shared by pipeline stages.
//!
//! Stages only ever block inside these: [`Consumer::get`],
//! [`Barrier::meet`] and [`PauseGate::test`]. Each has a way to be released
//! from another thread (flush or close, force, disable), which is what lets
//! a failing stage unwind its peers.

pub mod barrier;
pub mod channel;
pub mod handoff;
pub mod pause;

pub use barrier::{Barrier, Meet};
pub use channel::{ChannelControl, Consumer, Fetch, OutputPort, Producer, PutError, channel};
pub use handoff::Handoff;
pub use pause::PauseGate;
