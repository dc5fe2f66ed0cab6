// Streaming rate adaptation for playback
// A persistent sinc resampler fed fixed-size blocks, used when the output
// device cannot run at the 24 kHz wire rate. Keeping the resampler alive
// across blocks preserves filter state and energy at block boundaries.

use anyhow::Result;
use log::debug;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Fixed input block size for the persistent resampler
pub const BLOCK_SAMPLES: usize = 512;

pub struct RateAdapter {
    resampler: SincFixedIn<f32>,
    input: Vec<f32>,
}

impl RateAdapter {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let ratio = to_rate as f64 / from_rate as f64;

        // Adaptive quality: longer sinc for big ratio changes
        let (sinc_len, interpolation, oversampling) = if ratio >= 2.0 {
            (512, SincInterpolationType::Cubic, 512)
        } else if ratio >= 1.5 {
            (384, SincInterpolationType::Cubic, 384)
        } else if ratio > 1.0 {
            (256, SincInterpolationType::Linear, 256)
        } else if ratio <= 0.5 {
            (512, SincInterpolationType::Cubic, 512)
        } else {
            (384, SincInterpolationType::Linear, 384)
        };

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: 0.95,
            interpolation,
            oversampling_factor: oversampling,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, BLOCK_SAMPLES, 1)?;
        debug!(
            "Rate adapter {} Hz → {} Hz (ratio {:.3}, sinc_len {})",
            from_rate, to_rate, ratio, sinc_len
        );

        Ok(Self {
            resampler,
            input: Vec::with_capacity(BLOCK_SAMPLES * 2),
        })
    }

    /// Feed source-rate samples; returns converted samples for every full
    /// block available. Remainders stay buffered for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.input.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.input.len() >= BLOCK_SAMPLES {
            let rest = self.input.split_off(BLOCK_SAMPLES);
            let block = std::mem::replace(&mut self.input, rest);
            match self.resampler.process(&[block], None) {
                Ok(mut waves) => {
                    if let Some(wave) = waves.pop() {
                        out.extend_from_slice(&wave);
                    }
                }
                Err(e) => {
                    debug!("Resampler block failed: {}", e);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_ratio() {
        let mut adapter = RateAdapter::new(24000, 48000).unwrap();
        let input: Vec<f32> = (0..BLOCK_SAMPLES * 8)
            .map(|i| (i as f32 * 0.01).sin())
            .collect();

        let out = adapter.process(&input);
        let expected = input.len() * 2;
        let diff = (out.len() as i64 - expected as i64).abs();
        assert!(diff <= 64, "got {} expected ~{}", out.len(), expected);
    }

    #[test]
    fn test_partial_block_buffers() {
        let mut adapter = RateAdapter::new(24000, 44100).unwrap();
        // Less than one block: nothing comes out, nothing is lost
        let out = adapter.process(&vec![0.1_f32; BLOCK_SAMPLES / 2]);
        assert!(out.is_empty());
        // Completing the block flushes it
        let out = adapter.process(&vec![0.1_f32; BLOCK_SAMPLES / 2]);
        assert!(!out.is_empty());
    }
}
