use crate::buffer::Buffer;
use crate::codec::{BufferLayout, Encoder, VideoParams};
use crate::error::{FramepipeError, Result};

/// Byte-oriented run-length encoder.
///
/// Emits `(count, value)` pairs with runs of at most 255 bytes. Flat test
/// patterns and letterboxed frames shrink a lot; noise doubles in size, so the
/// output buffer is sized for the worst case.
#[derive(Debug, Default)]
pub struct RleVideoEncoder {
    frame_size: usize,
}

impl RleVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn encode_runs(input: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut written = 0;
    let mut i = 0;
    while i < input.len() {
        let value = input[i];
        let mut run = 1;
        while i + run < input.len() && input[i + run] == value && run < 255 {
            run += 1;
        }
        let pair = out.get_mut(written..written + 2)?;
        pair[0] = run as u8;
        pair[1] = value;
        written += 2;
        i += run;
    }
    Some(written)
}

impl Encoder for RleVideoEncoder {
    type Params = VideoParams;

    fn name(&self) -> &'static str {
        "rle"
    }

    fn configure(&mut self, params: &VideoParams) -> Result<BufferLayout> {
        self.frame_size = params.frame_size();
        if self.frame_size == 0 {
            return Err(FramepipeError::configuration("rle encoder needs a non-empty frame"));
        }
        Ok(BufferLayout {
            input_size: self.frame_size,
            output_size: self.frame_size * 2,
        })
    }

    fn process(&mut self, input: &Buffer, output: &mut Buffer) -> Result<usize> {
        let n = input.bytes_used().min(self.frame_size);
        encode_runs(&input.filled()[..n], output.as_mut_slice()).ok_or_else(|| {
            FramepipeError::Encode {
                codec: self.name().to_string(),
                message: format!("output buffer of {} bytes too small", output.capacity()),
            }
        })
    }
}
