//! Static stage priorities.
//!
//! Ranks are fixed per stage kind (0 runs first). With real-time scheduling
//! enabled they map onto `SCHED_FIFO` priorities counted down from the
//! system maximum; without it threads keep the default policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Capture,
    Video,
    Speech,
    Writer,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Capture => "capture",
            StageKind::Video => "video",
            StageKind::Speech => "speech",
            StageKind::Writer => "writer",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relative rank of each stage kind; lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityTable {
    pub capture: u8,
    pub video: u8,
    pub speech: u8,
    pub writer: u8,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self {
            capture: 0,
            video: 1,
            speech: 2,
            writer: 3,
        }
    }
}

impl PriorityTable {
    pub fn rank(&self, kind: StageKind) -> u8 {
        match kind {
            StageKind::Capture => self.capture,
            StageKind::Video => self.video,
            StageKind::Speech => self.speech,
            StageKind::Writer => self.writer,
        }
    }

    /// Resolves the table against the scheduler, once per run.
    pub fn resolve(&self, realtime: bool) -> ResolvedPriorities {
        let range = if realtime { fifo_priority_range() } else { None };
        if realtime && range.is_none() {
            tracing::warn!("real-time scheduling unavailable, using default priorities");
        }
        ResolvedPriorities {
            table: *self,
            range,
        }
    }
}

/// Concrete thread priorities for one run.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPriorities {
    table: PriorityTable,
    range: Option<(i32, i32)>,
}

impl ResolvedPriorities {
    /// `SCHED_FIFO` priority for a stage, or `None` to inherit.
    pub fn for_stage(&self, kind: StageKind) -> Option<i32> {
        let (min, max) = self.range?;
        Some((max - i32::from(self.table.rank(kind))).max(min))
    }
}

#[cfg(unix)]
fn fifo_priority_range() -> Option<(i32, i32)> {
    // SAFETY: plain queries with no pointer arguments.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    (min >= 0 && max >= min).then_some((min, max))
}

#[cfg(not(unix))]
fn fifo_priority_range() -> Option<(i32, i32)> {
    None
}

/// Moves the calling thread onto `SCHED_FIFO` at `priority`.
#[cfg(unix)]
pub fn apply_to_current_thread(priority: i32) -> io::Result<()> {
    // SAFETY: sched_param is plain data; zeroing covers platform padding fields.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;
    // SAFETY: pthread_self() is always valid for the calling thread and
    // param outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// Gives the whole process the highest nice priority.
#[cfg(unix)]
pub fn raise_process_priority() -> io::Result<()> {
    // SAFETY: no pointer arguments; who = 0 is the calling process.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -20) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn raise_process_priority() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process priorities need a unix scheduler",
    ))
}

#[cfg(not(unix))]
pub fn apply_to_current_thread(_priority: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "real-time priorities need a unix scheduler",
    ))
}
