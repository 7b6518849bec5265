//! Video stage: encodes raw frames from capture into writer buffers.

use crate::buffer::{Buffer, BufferPool};
use crate::codec::{BoxedVideoEncoder, BufferLayout, VideoParams};
use crate::error::{FramepipeError, Result};
use crate::format::VideoFormat;
use crate::pipeline::stage::{Stage, StageContext, Step};
use crate::sync::{Consumer, Fetch, Handoff, Meet, Producer};
use std::sync::Arc;
use tracing::{debug, info};

/// Channel ends and handoff a video stage is wired with.
pub struct VideoLinks {
    pub frames_in: Consumer<Buffer>,
    pub frames_back: Producer<Buffer>,
    pub encoded_out: Producer<Buffer>,
    pub encoded_back: Consumer<Buffer>,
    /// Publishes the encoder's output buffer size to the orchestrator.
    pub output_size: Arc<Handoff<usize>>,
}

pub struct VideoStage {
    encoder: BoxedVideoEncoder,
    format: VideoFormat,
    bit_rate: Option<u32>,
    pipe_size: usize,
    links: VideoLinks,
    layout: Option<BufferLayout>,
    pool: Option<BufferPool>,
}

/// Maps a non-item fetch onto the step that ends the stage.
macro_rules! take_or_end {
    ($fetch:expr) => {
        match $fetch {
            Fetch::Item(buffer) => buffer,
            Fetch::Flushed => return Ok(Step::Flushed),
            Fetch::Closed => return Ok(Step::Finished),
        }
    };
}

impl VideoStage {
    pub fn new(
        encoder: BoxedVideoEncoder,
        format: VideoFormat,
        bit_rate: Option<u32>,
        pipe_size: usize,
        links: VideoLinks,
    ) -> Self {
        Self {
            encoder,
            format,
            bit_rate,
            pipe_size,
            links,
            layout: None,
            pool: None,
        }
    }
}

impl Stage for VideoStage {
    fn name(&self) -> &'static str {
        "video"
    }

    fn negotiate(&mut self, _ctx: &StageContext) -> Result<Step> {
        let params = VideoParams::for_format(&self.format, self.bit_rate);
        let layout = self.encoder.configure(&params)?;
        info!(
            codec = self.encoder.name(),
            width = params.width,
            height = params.height,
            frame_rate_milli = params.frame_rate_milli,
            bit_rate = ?params.bit_rate,
            output_size = layout.output_size,
            "video encoder configured"
        );
        self.layout = Some(layout);

        if self.links.output_size.publish(layout.output_size) == Meet::Forced {
            return Ok(Step::Flushed);
        }
        Ok(Step::Continue)
    }

    fn allocate(&mut self, _ctx: &StageContext) -> Result<Step> {
        let layout = self
            .layout
            .ok_or_else(|| FramepipeError::protocol("video allocating before negotiation"))?;

        if self.format.is_zero_copy() {
            // Capture primed its output with buffers meant for its return queue.
            for _ in 0..self.pipe_size {
                let buffer = take_or_end!(self.links.frames_in.get()?);
                self.links.frames_back.put(buffer)?;
            }
        } else {
            let pool = self.pool.insert(BufferPool::create(
                "video",
                self.pipe_size,
                layout.input_size,
            )?);
            for buffer in pool.take_free(self.pipe_size)? {
                self.links.frames_back.put(buffer)?;
            }
        }
        debug!(pipe_size = self.pipe_size, "video pipe primed");
        Ok(Step::Continue)
    }

    fn step(&mut self, ctx: &StageContext) -> Result<Step> {
        let frame = take_or_end!(self.links.frames_in.get()?);
        let mut encoded = take_or_end!(self.links.encoded_back.get()?);

        let written = self.encoder.process(&frame, &mut encoded)?;
        encoded.set_bytes_used(written);
        self.links.encoded_out.put(encoded)?;
        self.links.frames_back.put(frame)?;

        ctx.run_state().add_video_bytes(written);
        Ok(Step::Continue)
    }

    fn teardown(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
        Ok(())
    }
}
