// PCM wire codec
// Pure conversions between float samples and the base64 16-bit LE wire form.
// Outbound audio is decimated to the 16 kHz wire rate; inbound audio arrives
// at 24 kHz and is decoded as-is.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};

use super::{AudioBuffer, OUTBOUND_SAMPLE_RATE};
use crate::error::CodecError;

/// Encode mono float samples for transmission: decimate to the wire rate,
/// clamp to [-1, 1], quantize to signed 16-bit LE, base64 the result.
///
/// Upsampling is rejected: capture devices always run at or above 16 kHz,
/// so a lower input rate means something upstream is misconfigured.
pub fn encode_outbound(samples: &[f32], input_rate: u32) -> Result<String, CodecError> {
    if input_rate < OUTBOUND_SAMPLE_RATE {
        return Err(CodecError::UnsupportedRate {
            input: input_rate,
            target: OUTBOUND_SAMPLE_RATE,
        });
    }

    let decimated = decimate(samples, input_rate, OUTBOUND_SAMPLE_RATE);

    let mut bytes = Vec::with_capacity(decimated.len() * 2);
    for &sample in &decimated {
        let clamped = sample.clamp(-1.0, 1.0);
        let quantized = (clamped * 32767.0) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }

    Ok(BASE64.encode(&bytes))
}

/// Decode raw wire bytes (signed 16-bit LE) into float samples in [-1, 1]
pub fn decode_inbound(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::MalformedPayload(format!(
            "odd byte length {}",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode a base64 media payload straight off the wire
pub fn decode_media(data: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer, CodecError> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| CodecError::MalformedPayload(format!("bad base64: {}", e)))?;
    decode_inbound(&bytes, sample_rate, channels)
}

/// Nearest-neighbor decimation. Output length is floor(len * to / from),
/// each output sample picked from the nearest source position.
fn decimate(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = (i as f64 * ratio).round() as usize;
        out.push(samples[src.min(samples.len() - 1)]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, freq: f32, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_round_trip_sample_count_48k() {
        let input = sine(4096, 440.0, 48000.0);
        let blob = encode_outbound(&input, 48000).unwrap();
        let decoded = decode_media(&blob, OUTBOUND_SAMPLE_RATE, 1).unwrap();

        let expected = (4096 * OUTBOUND_SAMPLE_RATE as usize) / 48000;
        let diff = (decoded.samples.len() as i64 - expected as i64).abs();
        assert!(diff <= 1, "got {} expected ~{}", decoded.samples.len(), expected);
    }

    #[test]
    fn test_round_trip_sample_count_44100() {
        let input = sine(4096, 440.0, 44100.0);
        let blob = encode_outbound(&input, 44100).unwrap();
        let decoded = decode_media(&blob, OUTBOUND_SAMPLE_RATE, 1).unwrap();

        let expected = (4096.0 * OUTBOUND_SAMPLE_RATE as f64 / 44100.0).floor() as i64;
        let diff = (decoded.samples.len() as i64 - expected).abs();
        assert!(diff <= 1, "got {} expected ~{}", decoded.samples.len(), expected);
    }

    #[test]
    fn test_equal_rate_passthrough() {
        let input = sine(1024, 200.0, 16000.0);
        let blob = encode_outbound(&input, 16000).unwrap();
        let decoded = decode_media(&blob, OUTBOUND_SAMPLE_RATE, 1).unwrap();
        assert_eq!(decoded.samples.len(), 1024);
    }

    #[test]
    fn test_upsampling_rejected() {
        let input = sine(512, 100.0, 8000.0);
        let err = encode_outbound(&input, 8000).unwrap_err();
        match err {
            CodecError::UnsupportedRate { input, target } => {
                assert_eq!(input, 8000);
                assert_eq!(target, OUTBOUND_SAMPLE_RATE);
            }
            other => panic!("wrong error: {}", other),
        }
    }

    #[test]
    fn test_out_of_range_samples_clamped() {
        let input = vec![2.0_f32, -3.0, 0.0];
        let blob = encode_outbound(&input, 16000).unwrap();
        let decoded = decode_media(&blob, OUTBOUND_SAMPLE_RATE, 1).unwrap();
        assert!(decoded.samples[0] > 0.99);
        assert!(decoded.samples[1] < -0.99);
        assert_eq!(decoded.samples[2], 0.0);
    }

    #[test]
    fn test_decode_preserves_values() {
        // 0x0000 = 0, 0x7FFF = max, 0x8000 = min
        let bytes = [0x00, 0x00, 0xFF, 0x7F, 0x00, 0x80];
        let decoded = decode_inbound(&bytes, 24000, 1).unwrap();
        assert_eq!(decoded.samples.len(), 3);
        assert_eq!(decoded.samples[0], 0.0);
        assert!((decoded.samples[1] - 0.99997).abs() < 1e-4);
        assert_eq!(decoded.samples[2], -1.0);
    }

    #[test]
    fn test_decode_odd_length_rejected() {
        let err = decode_inbound(&[0x01, 0x02, 0x03], 24000, 1).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload(_)));
    }

    #[test]
    fn test_decode_bad_base64_rejected() {
        let err = decode_media("not!!base64##", 24000, 1).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload(_)));
    }

    #[test]
    fn test_stereo_mono_fold() {
        // L=0.5, R=-0.5 folds to 0
        let buf = AudioBuffer {
            samples: vec![0.5, -0.5, 0.25, 0.25],
            sample_rate: 24000,
            channels: 2,
        };
        assert_eq!(buf.frame_count(), 2);
        let mono = buf.into_mono();
        assert_eq!(mono, vec![0.0, 0.25]);
    }
}
