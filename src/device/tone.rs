use crate::device::SoundSource;
use crate::error::{FramepipeError, Result};
use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

/// Sound source producing a sine tone.
#[derive(Debug, Clone)]
pub struct ToneSource {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    phase: f32,
    blocks_left: Option<u64>,
    started: bool,
    paced: bool,
    next_block_at: Option<Instant>,
}

impl ToneSource {
    pub fn new(sample_rate: u32, frequency: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: 0.5,
            phase: 0.0,
            blocks_left: None,
            started: false,
            paced: false,
            next_block_at: None,
        }
    }

    /// Stop after `blocks` reads.
    pub fn with_block_limit(mut self, blocks: u64) -> Self {
        self.blocks_left = Some(blocks);
        self
    }

    /// Peak level as a fraction of full scale.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Deliver samples no faster than the sample rate.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    fn wait_for_block(&mut self, samples: usize) {
        if !self.paced {
            return;
        }
        let now = Instant::now();
        let due = self.next_block_at.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        let span = Duration::from_secs_f64(samples as f64 / f64::from(self.sample_rate));
        self.next_block_at = Some(due.max(now) + span);
    }
}

impl SoundSource for ToneSource {
    fn start(&mut self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(FramepipeError::device("tone source needs a sample rate"));
        }
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.started {
            return Err(FramepipeError::device("read before start"));
        }
        if let Some(left) = self.blocks_left.as_mut() {
            if *left == 0 {
                return Ok(0);
            }
            *left -= 1;
        }

        self.wait_for_block(buf.len() / 2);
        let step = TAU * self.frequency / self.sample_rate as f32;
        let peak = self.amplitude * f32::from(i16::MAX);
        let mut written = 0;
        for chunk in buf.chunks_exact_mut(2) {
            let sample = (self.phase.sin() * peak) as i16;
            chunk.copy_from_slice(&sample.to_le_bytes());
            self.phase = (self.phase + step) % TAU;
            written += 2;
        }
        Ok(written)
    }

    fn stop(&mut self) {
        self.started = false;
    }
}
