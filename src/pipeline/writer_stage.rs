//! Writer stage: hands encoded buffers to the sink and recycles them.

use crate::buffer::{Buffer, BufferPool};
use crate::error::Result;
use crate::pipeline::stage::{Stage, StageContext, Step};
use crate::sink::{FrameSink, SideChannel};
use crate::sync::{Consumer, Fetch, Producer};
use std::sync::Arc;
use tracing::{debug, error};

pub struct WriterLinks {
    pub encoded_in: Consumer<Buffer>,
    pub encoded_back: Producer<Buffer>,
}

pub struct WriterStage {
    sink: Box<dyn FrameSink>,
    buffer_count: usize,
    buffer_size: usize,
    links: WriterLinks,
    side_channel: Option<Arc<dyn SideChannel>>,
    pool: Option<BufferPool>,
    opened: bool,
    snapshots_dropped: u64,
}

impl WriterStage {
    pub fn new(
        sink: Box<dyn FrameSink>,
        buffer_count: usize,
        buffer_size: usize,
        links: WriterLinks,
    ) -> Self {
        Self {
            sink,
            buffer_count,
            buffer_size,
            links,
            side_channel: None,
            pool: None,
            opened: false,
            snapshots_dropped: 0,
        }
    }

    /// Also offer every written unit to `side_channel`.
    pub fn with_side_channel(mut self, side_channel: Option<Arc<dyn SideChannel>>) -> Self {
        self.side_channel = side_channel;
        self
    }
}

impl Stage for WriterStage {
    fn name(&self) -> &'static str {
        "writer"
    }

    fn negotiate(&mut self, _ctx: &StageContext) -> Result<Step> {
        self.sink.open()?;
        self.opened = true;
        Ok(Step::Continue)
    }

    fn allocate(&mut self, _ctx: &StageContext) -> Result<Step> {
        let pool = self.pool.insert(BufferPool::create(
            "writer",
            self.buffer_count,
            self.buffer_size,
        )?);
        for buffer in pool.take_free(self.buffer_count)? {
            self.links.encoded_back.put(buffer)?;
        }
        Ok(Step::Continue)
    }

    fn step(&mut self, _ctx: &StageContext) -> Result<Step> {
        let buffer = match self.links.encoded_in.get()? {
            Fetch::Item(buffer) => buffer,
            Fetch::Flushed => return Ok(Step::Flushed),
            Fetch::Closed => return Ok(Step::Finished),
        };

        self.sink.write(buffer.filled())?;
        if let Some(side) = &self.side_channel
            && !side.publish(buffer.filled())?
        {
            self.snapshots_dropped += 1;
        }
        self.links.encoded_back.put(buffer)?;
        Ok(Step::Continue)
    }

    fn teardown(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
        if self.snapshots_dropped > 0 {
            debug!(dropped = self.snapshots_dropped, "side channel updates skipped");
        }
        if self.opened {
            self.opened = false;
            if let Err(e) = self.sink.finish() {
                error!(sink = self.sink.name(), error = %e, "closing sink failed");
                return Err(e);
            }
        }
        Ok(())
    }
}
