//! Capture stage: owns the capture device and feeds raw frames downstream.
//!
//! In copy mode the requested region of every captured frame is cropped into
//! a packed buffer handed back by the video stage. When the negotiated format allows it (zero-copy), the
//! device buffers themselves travel downstream and come back through the
//! return channel before they are re-queued on the device.

use crate::buffer::{Buffer, BufferPool};
use crate::device::CaptureDevice;
use crate::error::{FramepipeError, Result};
use crate::format::{Resolution, VideoFormat};
use crate::pipeline::stage::{Stage, StageContext, Step};
use crate::sync::{Consumer, Fetch, Handoff, Meet, Producer};
use std::sync::Arc;
use tracing::{debug, info};

/// Channel ends and handoff a capture stage is wired with.
pub struct CaptureLinks {
    /// Raw frames, to the video stage.
    pub frames_out: Producer<Buffer>,
    /// Empty (copy mode) or consumed (zero-copy) buffers coming back.
    pub frames_back: Consumer<Buffer>,
    /// Publishes the negotiated format to the orchestrator.
    pub format: Arc<Handoff<VideoFormat>>,
}

pub struct CaptureStage {
    device: Box<dyn CaptureDevice>,
    requested: Option<Resolution>,
    device_buffers: usize,
    pipe_size: usize,
    links: CaptureLinks,
    format: Option<VideoFormat>,
    pool: Option<BufferPool>,
    started: bool,
}

impl CaptureStage {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        requested: Option<Resolution>,
        device_buffers: usize,
        pipe_size: usize,
        links: CaptureLinks,
    ) -> Self {
        Self {
            device,
            requested,
            device_buffers,
            pipe_size,
            links,
            format: None,
            pool: None,
            started: false,
        }
    }

    fn zero_copy(&self) -> bool {
        self.format.is_some_and(|f| f.is_zero_copy())
    }

    fn forward_zero_copy(&mut self, ctx: &StageContext, frame: Buffer) -> Result<Step> {
        self.links.frames_out.put(frame)?;
        ctx.run_state().inc_frames();
        match self.links.frames_back.get()? {
            Fetch::Item(done) => self.device.release_frame(done)?,
            Fetch::Flushed => return Ok(Step::Flushed),
            Fetch::Closed => return Ok(Step::Finished),
        }
        Ok(Step::Continue)
    }

    fn forward_copy(&mut self, ctx: &StageContext, frame: Buffer) -> Result<Step> {
        let mut dst = match self.links.frames_back.get()? {
            Fetch::Item(dst) => dst,
            ended => {
                self.device.release_frame(frame)?;
                return Ok(if matches!(ended, Fetch::Flushed) {
                    Step::Flushed
                } else {
                    Step::Finished
                });
            }
        };
        let format = self
            .format
            .ok_or_else(|| FramepipeError::protocol("capture running before negotiation"))?;
        let written = format.crop(frame.filled(), dst.as_mut_slice())?;
        dst.set_bytes_used(written);
        self.links.frames_out.put(dst)?;
        ctx.run_state().inc_frames();
        self.device.release_frame(frame)?;
        Ok(Step::Continue)
    }
}

impl Stage for CaptureStage {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn negotiate(&mut self, ctx: &StageContext) -> Result<Step> {
        let detected = self.device.detect_format()?;
        let format = VideoFormat::negotiate(detected, self.requested)?;
        ctx.run_state().set_image_size(format.width, format.height);
        info!(
            standard = %format.standard,
            width = format.width,
            height = format.height,
            zero_copy = format.is_zero_copy(),
            "capture format negotiated"
        );
        self.format = Some(format);

        if self.links.format.publish(format) == Meet::Forced {
            return Ok(Step::Flushed);
        }
        Ok(Step::Continue)
    }

    fn allocate(&mut self, _ctx: &StageContext) -> Result<Step> {
        let format = self
            .format
            .ok_or_else(|| FramepipeError::protocol("capture allocating before negotiation"))?;
        let primed = if format.is_zero_copy() { self.pipe_size } else { 0 };

        let pool = self.pool.insert(BufferPool::create(
            "capture",
            self.device_buffers + primed,
            format.frame_size(),
        )?);
        let device_buffers = pool.take_free(self.device_buffers)?;
        let downstream = pool.take_free(primed)?;

        self.device.start(device_buffers)?;
        self.started = true;

        // Zero-copy: the video stage passes these straight back to us.
        for buffer in downstream {
            self.links.frames_out.put(buffer)?;
        }
        debug!(buffers = self.device_buffers, primed, "capture buffers allocated");
        Ok(Step::Continue)
    }

    fn step(&mut self, ctx: &StageContext) -> Result<Step> {
        let Some(frame) = self.device.acquire_frame()? else {
            debug!("capture source exhausted");
            return Ok(Step::Finished);
        };
        if self.zero_copy() {
            self.forward_zero_copy(ctx, frame)
        } else {
            self.forward_copy(ctx, frame)
        }
    }

    fn teardown(&mut self) -> Result<()> {
        if self.started {
            self.device.stop();
            self.started = false;
        }
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
        Ok(())
    }
}
