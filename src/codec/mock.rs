use crate::buffer::Buffer;
use crate::codec::{BufferLayout, Encoder, VideoParams};
use crate::error::{FramepipeError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pass-through video encoder for testing, with scripted failures.
#[derive(Debug, Default)]
pub struct MockVideoEncoder {
    frame_size: usize,
    fail_configure: bool,
    fail_at: Option<usize>,
    processed: Arc<AtomicUsize>,
}

impl MockVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `configure` fail.
    pub fn with_configure_failure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Make the `n`-th call to `process` (1-based) fail.
    pub fn with_failure_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Shared count of successfully processed frames.
    pub fn processed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.processed)
    }
}

impl Encoder for MockVideoEncoder {
    type Params = VideoParams;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn configure(&mut self, params: &VideoParams) -> Result<BufferLayout> {
        if self.fail_configure {
            return Err(FramepipeError::Encode {
                codec: "mock".to_string(),
                message: "configure failed".to_string(),
            });
        }
        self.frame_size = params.frame_size();
        Ok(BufferLayout {
            input_size: self.frame_size,
            output_size: self.frame_size,
        })
    }

    fn process(&mut self, input: &Buffer, output: &mut Buffer) -> Result<usize> {
        let call = self.processed.load(Ordering::SeqCst) + 1;
        if self.fail_at == Some(call) {
            return Err(FramepipeError::Encode {
                codec: "mock".to_string(),
                message: format!("scripted failure on frame {call}"),
            });
        }
        let n = output.copy_from(input);
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }
}
