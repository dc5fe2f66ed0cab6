// src/audio/mod.rs
// Capture, playback, and the PCM wire codec

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod resample;

pub use capture::CaptureHandle;
pub use playback::{PlaybackQueue, Player};

/// Samples per emitted capture chunk
pub const CAPTURE_CHUNK_SAMPLES: usize = 4096;

/// Wire rate for microphone audio sent to the peer
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Wire rate for audio received from the peer
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

/// One fixed-size block of mono capture samples. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decoded inbound audio, interleaved if multi-channel
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Frames per channel
    pub fn frame_count(&self) -> usize {
        if self.channels <= 1 {
            self.samples.len()
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Fold interleaved channels down to mono by averaging
    pub fn into_mono(self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples;
        }
        let ch = self.channels as usize;
        self.samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}
