//! Destinations for encoded data.

pub mod side_channel;

use crate::error::{FramepipeError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use side_channel::{SideChannel, SnapshotReader, SnapshotSlot, snapshot_slot};

/// Pluggable output for encoded buffers.
pub trait FrameSink: Send + 'static {
    /// Prepare the sink (open files, connect). Called once during negotiation.
    fn open(&mut self) -> Result<()>;

    /// Write one encoded unit.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flush and close. Called once on teardown, also after failures.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Appends every unit to a file, unframed.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            bytes_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn sink_error(&self, action: &str, e: std::io::Error) -> FramepipeError {
        FramepipeError::Sink {
            sink: "file".to_string(),
            message: format!("{action} {}: {e}", self.path.display()),
        }
    }
}

impl FrameSink for FileSink {
    fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| self.sink_error("creating", e))?;
        self.writer = Some(BufWriter::new(file));
        tracing::info!(path = %self.path.display(), "writing output");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            FramepipeError::protocol(format!("write to {} before open", self.path.display()))
        })?;
        if let Err(e) = writer.write_all(data) {
            return Err(self.sink_error("writing", e));
        }
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.sink_error("flushing", e))?;
            tracing::debug!(
                path = %self.path.display(),
                bytes = self.bytes_written,
                "output closed"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Keeps every unit in memory, readable through a shared handle.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    collected: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_at: Option<usize>,
    finished: Arc<Mutex<bool>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`-th write (1-based) fail.
    pub fn with_failure_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Handle on the collected units; stays valid after the sink moves.
    pub fn collected(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.collected)
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl FrameSink for CollectorSink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut collected = self.collected.lock();
        if self.fail_at == Some(collected.len() + 1) {
            return Err(FramepipeError::Sink {
                sink: "collector".to_string(),
                message: format!("scripted failure on write {}", collected.len() + 1),
            });
        }
        collected.push(data.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
