//! # PCM Encoding and Capture Conditioning
//!
//! Converts between floating-point sample blocks and the 16-bit
//! little-endian wire format, and conditions capture blocks before they
//! are encoded.
//!
//! ## Wire Format:
//! - **Bit depth**: 16-bit signed PCM
//! - **Byte order**: little-endian
//! - **Channels**: mono
//!
//! The float → integer mapping is asymmetric on purpose: negative samples
//! scale by 32768 and non-negative samples by 32767, with truncation
//! toward zero. The agent side of the relay expects exactly this mapping,
//! so it is reproduced bit-for-bit rather than rounded.

use crate::error::{PipelineError, PipelineResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Encode a block of float samples in [-1, 1] as PCM16LE bytes.
///
/// ## Contract:
/// 1. Clamp each sample to [-1, 1]
/// 2. Scale: negative values by 32768, non-negative by 32767
/// 3. Truncate toward zero (not round-half-up)
/// 4. Emit little-endian byte pairs
///
/// Pure function; no error conditions.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let value = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode PCM16LE bytes back into float samples in [-1, 1).
///
/// ## Errors:
/// Fails with `DecodeError` if the byte length is odd (16-bit samples
/// always occupy two bytes).
pub fn decode_pcm16(data: &[u8]) -> PipelineResult<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(PipelineError::DecodeError(
            "PCM data length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(samples)
}

/// Capture-side conditioning applied to each block before encoding.
///
/// Stands in for the device-level constraints a browser would request
/// (noise suppression, automatic gain); acoustic echo cancellation is left
/// to the OS input path.
///
/// ## Steps (each gated by its toggle):
/// 1. **DC offset removal**: center the block around zero
/// 2. **Peak normalization**: scale toward a target peak, with guards that
///    skip near-silent and near-clipping blocks
/// 3. **Noise smoothing**: 3-point moving average
#[derive(Debug, Clone)]
pub struct Conditioner {
    noise_suppression: bool,
    auto_gain: bool,
}

/// Blocks quieter than this peak are left untouched by normalization.
const SILENCE_PEAK: f32 = 0.003;

/// Blocks louder than this peak are left untouched by normalization.
const CLIPPING_PEAK: f32 = 0.92;

/// Normalization target peak, leaving headroom below full scale.
const TARGET_PEAK: f32 = 0.85;

impl Conditioner {
    pub fn new(noise_suppression: bool, auto_gain: bool) -> Self {
        Self {
            noise_suppression,
            auto_gain,
        }
    }

    /// Condition one block in place.
    pub fn apply(&self, samples: &mut [f32]) {
        if samples.is_empty() {
            return;
        }

        if self.auto_gain {
            Self::remove_dc_offset(samples);
            Self::normalize_peak(samples);
        }

        if self.noise_suppression {
            Self::smooth(samples);
        }
    }

    /// Subtract the block mean so audio is centered around zero.
    fn remove_dc_offset(samples: &mut [f32]) {
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        for sample in samples.iter_mut() {
            *sample -= mean;
        }
    }

    /// Scale the block toward the target peak.
    ///
    /// Guards: near-silence would amplify noise floor; near-clipping blocks
    /// are already using the available range. Both are skipped.
    fn normalize_peak(samples: &mut [f32]) {
        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));

        if peak < SILENCE_PEAK || peak > CLIPPING_PEAK {
            return;
        }

        let scale = TARGET_PEAK / peak;
        for sample in samples.iter_mut() {
            *sample = (*sample * scale).clamp(-1.0, 1.0);
        }
    }

    /// 3-point moving average; high-frequency noise attenuates while speech
    /// content (mostly lower frequencies) passes through.
    fn smooth(samples: &mut [f32]) {
        if samples.len() < 3 {
            return;
        }

        let original = samples.to_vec();
        for i in 1..samples.len() - 1 {
            samples[i] = (original[i - 1] + original[i] + original[i + 1]) / 3.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_boundaries() {
        // Full-scale values map to the integer extremes.
        assert_eq!(encode_pcm16(&[1.0]), (32767i16).to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[-1.0]), (-32768i16).to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[0.0]), vec![0, 0]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        assert_eq!(encode_pcm16(&[2.5]), (32767i16).to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[-3.0]), (-32768i16).to_le_bytes().to_vec());
    }

    #[test]
    fn test_encode_scale_split_at_zero() {
        // Non-negative samples scale by 32767, negative by 32768.
        assert_eq!(encode_pcm16(&[0.5]), (16383i16).to_le_bytes().to_vec()); // 0.5 * 32767 = 16383.5 → 16383
        assert_eq!(encode_pcm16(&[-0.5]), (-16384i16).to_le_bytes().to_vec());
    }

    #[test]
    fn test_encode_truncates_toward_zero() {
        // 0.0001 * 32767 = 3.2767 → 3, never 4
        assert_eq!(encode_pcm16(&[0.0001]), (3i16).to_le_bytes().to_vec());
        // -0.0001 * 32768 = -3.2768 → -3 (truncation, not floor)
        assert_eq!(encode_pcm16(&[-0.0001]), (-3i16).to_le_bytes().to_vec());
    }

    #[test]
    fn test_encode_little_endian_layout() {
        // 0.25 * 32767 = 8191.75 → 8191 = 0x1FFF → bytes [0xFF, 0x1F]
        assert_eq!(encode_pcm16(&[0.25]), vec![0xFF, 0x1F]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert!(decode_pcm16(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_decode_pcm16() {
        let bytes = encode_pcm16(&[0.0, 0.5, -0.5]);
        let samples = decode_pcm16(&bytes).unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[0]).abs() < 1e-6);
        assert!((samples[1] - 0.4999).abs() < 1e-3);
        assert!((samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_dc_offset_removal() {
        let conditioner = Conditioner::new(false, true);
        let mut samples = vec![0.2, 0.3, 0.2, 0.3];
        conditioner.apply(&mut samples);
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn test_normalization_skips_silence() {
        let conditioner = Conditioner::new(false, true);
        let mut samples = vec![0.0005, -0.0005, 0.0005, -0.0005];
        let original = samples.clone();
        conditioner.apply(&mut samples);
        // Zero-mean already, below the silence guard: untouched.
        assert_eq!(samples, original);
    }

    #[test]
    fn test_normalization_raises_quiet_speech() {
        let conditioner = Conditioner::new(false, true);
        let mut samples = vec![0.1, -0.1, 0.1, -0.1];
        conditioner.apply(&mut samples);
        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        assert!((peak - TARGET_PEAK).abs() < 1e-3);
    }

    #[test]
    fn test_smoothing_attenuates_spike() {
        let conditioner = Conditioner::new(true, false);
        let mut samples = vec![0.0, 0.0, 0.9, 0.0, 0.0];
        conditioner.apply(&mut samples);
        // The single-sample spike spreads and shrinks.
        assert!(samples[2] < 0.5);
        assert!(samples[1] > 0.0 && samples[3] > 0.0);
    }
}
