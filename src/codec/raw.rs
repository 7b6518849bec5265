use crate::buffer::Buffer;
use crate::codec::{BufferLayout, Encoder, VideoParams};
use crate::error::{FramepipeError, Result};

/// Pass-through video "encoder": copies the packed frame unchanged.
#[derive(Debug, Default)]
pub struct RawVideoEncoder {
    frame_size: usize,
}

impl RawVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder for RawVideoEncoder {
    type Params = VideoParams;

    fn name(&self) -> &'static str {
        "raw"
    }

    fn configure(&mut self, params: &VideoParams) -> Result<BufferLayout> {
        self.frame_size = params.frame_size();
        if self.frame_size == 0 {
            return Err(FramepipeError::configuration("raw encoder needs a non-empty frame"));
        }
        Ok(BufferLayout {
            input_size: self.frame_size,
            output_size: self.frame_size,
        })
    }

    fn process(&mut self, input: &Buffer, output: &mut Buffer) -> Result<usize> {
        let n = input.bytes_used().min(self.frame_size);
        if output.capacity() < n {
            return Err(FramepipeError::Encode {
                codec: self.name().to_string(),
                message: format!("output buffer holds {} of {} bytes", output.capacity(), n),
            });
        }
        output.as_mut_slice()[..n].copy_from_slice(&input.filled()[..n]);
        Ok(n)
    }
}
