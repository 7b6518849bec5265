//! Speech stage: reads sound blocks, encodes and writes them in one thread.

use crate::buffer::{Buffer, BufferPool};
use crate::codec::{BoxedSpeechEncoder, SpeechParams};
use crate::device::SoundSource;
use crate::error::{FramepipeError, Result};
use crate::pipeline::stage::{Stage, StageContext, Step};
use crate::sink::FrameSink;
use tracing::{debug, error, info};

pub struct SpeechStage {
    source: Box<dyn SoundSource>,
    encoder: BoxedSpeechEncoder,
    sink: Box<dyn FrameSink>,
    params: SpeechParams,
    pools: Vec<BufferPool>,
    raw: Option<Buffer>,
    encoded: Option<Buffer>,
    sizes: Option<(usize, usize)>,
    source_started: bool,
    sink_opened: bool,
}

impl SpeechStage {
    pub fn new(
        source: Box<dyn SoundSource>,
        encoder: BoxedSpeechEncoder,
        sink: Box<dyn FrameSink>,
        params: SpeechParams,
    ) -> Self {
        Self {
            source,
            encoder,
            sink,
            params,
            pools: Vec::with_capacity(2),
            raw: None,
            encoded: None,
            sizes: None,
            source_started: false,
            sink_opened: false,
        }
    }

    fn single_buffer(&mut self, name: &str, size: usize) -> Result<Buffer> {
        let pool = BufferPool::create(name, 1, size)?;
        let buffer = pool
            .take_free(1)?
            .pop()
            .ok_or_else(|| FramepipeError::protocol(format!("pool '{name}' came up empty")))?;
        self.pools.push(pool);
        Ok(buffer)
    }
}

impl Stage for SpeechStage {
    fn name(&self) -> &'static str {
        "speech"
    }

    fn negotiate(&mut self, _ctx: &StageContext) -> Result<Step> {
        let layout = self.encoder.configure(&self.params)?;
        self.sizes = Some((layout.input_size, layout.output_size));
        info!(
            codec = self.encoder.name(),
            sample_rate = self.params.sample_rate,
            block_samples = self.params.block_samples,
            "speech encoder configured"
        );
        self.sink.open()?;
        self.sink_opened = true;
        Ok(Step::Continue)
    }

    fn allocate(&mut self, _ctx: &StageContext) -> Result<Step> {
        let (input_size, output_size) = self
            .sizes
            .ok_or_else(|| FramepipeError::protocol("speech allocating before negotiation"))?;
        self.raw = Some(self.single_buffer("speech-raw", input_size)?);
        self.encoded = Some(self.single_buffer("speech-encoded", output_size)?);
        self.source.start()?;
        self.source_started = true;
        Ok(Step::Continue)
    }

    fn step(&mut self, ctx: &StageContext) -> Result<Step> {
        let (Some(raw), Some(encoded)) = (self.raw.as_mut(), self.encoded.as_mut()) else {
            return Err(FramepipeError::protocol("speech buffers missing"));
        };

        let read = self.source.read(raw.as_mut_slice())?;
        if read == 0 {
            debug!("sound source exhausted");
            return Ok(Step::Finished);
        }
        raw.set_bytes_used(read);

        let written = self.encoder.process(raw, encoded)?;
        encoded.set_bytes_used(written);
        self.sink.write(encoded.filled())?;
        ctx.run_state().add_speech_bytes(written);
        Ok(Step::Continue)
    }

    fn teardown(&mut self) -> Result<()> {
        if self.source_started {
            self.source.stop();
            self.source_started = false;
        }
        self.raw = None;
        self.encoded = None;
        for pool in self.pools.drain(..) {
            pool.destroy();
        }
        if self.sink_opened {
            self.sink_opened = false;
            if let Err(e) = self.sink.finish() {
                error!(sink = self.sink.name(), error = %e, "closing sink failed");
                return Err(e);
            }
        }
        Ok(())
    }
}
