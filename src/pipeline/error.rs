//! Reporting of stage failures.

use crate::error::{ErrorCategory, FramepipeError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives every stage failure exactly once, from the failing thread.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, stage: &str, error: &FramepipeError);
}

/// Reporter that writes failures to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &FramepipeError) {
        match error.category() {
            ErrorCategory::ProtocolViolation => {
                tracing::error!(stage, error = %error, "coordination protocol violated");
            }
            category => {
                tracing::error!(stage, ?category, error = %error, "stage failed");
            }
        }
    }
}

/// Reporter that keeps `(stage, message, category)` triples in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    reports: Arc<Mutex<Vec<(String, String, ErrorCategory)>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String, ErrorCategory)> {
        self.reports.lock().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, stage: &str, error: &FramepipeError) {
        self.reports
            .lock()
            .push((stage.to_string(), error.to_string(), error.category()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_reporter_accepts_every_category() {
        let reporter = LogReporter;
        reporter.report("capture", &FramepipeError::device("no signal"));
        reporter.report("video", &FramepipeError::protocol("foreign buffer"));
    }

    #[test]
    fn collecting_reporter_keeps_order() {
        let reporter = CollectingReporter::new();
        reporter.report("video", &FramepipeError::configuration("bad size"));
        reporter.report("writer", &FramepipeError::device("gone"));

        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "video");
        assert_eq!(reports[0].2, ErrorCategory::Configuration);
        assert!(reports[1].1.contains("gone"));
    }

    #[test]
    fn reporters_are_object_safe() {
        let _boxed: Arc<dyn ErrorReporter> = Arc::new(CollectingReporter::new());
    }
}
