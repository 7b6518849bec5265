//! G.711 µ-law speech encoder.

use crate::buffer::Buffer;
use crate::codec::{BufferLayout, Encoder, SpeechParams};
use crate::error::{FramepipeError, Result};

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Compresses one 16-bit linear sample to an 8-bit µ-law code.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// Encodes little-endian 16-bit PCM blocks into µ-law, one byte per sample.
#[derive(Debug, Default)]
pub struct MulawEncoder {
    block_bytes: usize,
}

impl MulawEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder for MulawEncoder {
    type Params = SpeechParams;

    fn name(&self) -> &'static str {
        "g711"
    }

    fn configure(&mut self, params: &SpeechParams) -> Result<BufferLayout> {
        if params.block_samples == 0 {
            return Err(FramepipeError::configuration("speech block must hold samples"));
        }
        self.block_bytes = params.block_samples * 2;
        Ok(BufferLayout {
            input_size: self.block_bytes,
            output_size: params.block_samples,
        })
    }

    fn process(&mut self, input: &Buffer, output: &mut Buffer) -> Result<usize> {
        let samples = input.filled().chunks_exact(2);
        let count = samples.len();
        if output.capacity() < count {
            return Err(FramepipeError::Encode {
                codec: self.name().to_string(),
                message: format!("{count} samples do not fit {} bytes", output.capacity()),
            });
        }
        let out = output.as_mut_slice();
        for (slot, pair) in out.iter_mut().zip(samples) {
            *slot = linear_to_ulaw(i16::from_le_bytes([pair[0], pair[1]]));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;

    #[test]
    fn reference_codes() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(-1), 0x7F);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
    }

    #[test]
    fn larger_magnitudes_get_larger_codes() {
        // Positive codes count down from 0xFF as magnitude grows.
        let codes: Vec<u8> = [0i16, 100, 1000, 10000]
            .iter()
            .map(|&s| linear_to_ulaw(s))
            .collect();
        assert!(codes.windows(2).all(|w| w[0] > w[1]), "{codes:?}");
    }

    #[test]
    fn block_encodes_one_byte_per_sample() {
        let mut encoder = MulawEncoder::new();
        let layout = encoder
            .configure(&SpeechParams {
                sample_rate: 8000,
                block_samples: 4,
            })
            .unwrap();
        assert_eq!(layout.input_size, 8);
        assert_eq!(layout.output_size, 4);

        let raw_pool = BufferPool::create("raw", 1, layout.input_size).unwrap();
        let enc_pool = BufferPool::create("enc", 1, layout.output_size).unwrap();
        let mut raw = raw_pool.get_free().unwrap();
        let pcm: Vec<u8> = [0i16, -1, i16::MAX, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        raw.as_mut_slice().copy_from_slice(&pcm);
        raw.set_bytes_used(8);
        let mut enc = enc_pool.get_free().unwrap();

        assert_eq!(encoder.process(&raw, &mut enc).unwrap(), 4);
        assert_eq!(enc.as_slice(), &[0xFF, 0x7F, 0x80, 0x00]);
    }
}
