//! # Audio Normalization
//!
//! Brings uploaded audio into the one format the speech backend accepts:
//! 16-bit PCM, mono, at the configured target sample rate (16 kHz by default).
//!
//! ## Steps:
//! 1. **Requantize** to 16-bit (done while decoding the container)
//! 2. **Downmix** multi-channel audio to mono by averaging each frame
//! 3. **Resample** with linear interpolation to the target rate
//!
//! Audio that is already at the target rate is not resampled, so its rate and
//! samples pass through untouched.

use crate::audio::container::DecodedWav;

/// Mono 16-bit PCM at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl PcmAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Converts decoded audio to the backend's input format.
#[derive(Debug, Clone, Copy)]
pub struct AudioProcessor {
    target_sample_rate: u32,
}

impl AudioProcessor {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Downmix and resample decoded WAV audio.
    pub fn normalize(&self, audio: DecodedWav) -> PcmAudio {
        let channels = audio.format.channels.max(1) as usize;
        let mono = if channels == 1 {
            audio.samples
        } else {
            downmix_to_mono(&audio.samples, channels)
        };

        PcmAudio {
            sample_rate: self.target_sample_rate,
            samples: resample(&mono, audio.format.sample_rate, self.target_sample_rate),
        }
    }
}

/// Average interleaved frames down to a single channel. A trailing partial
/// frame is dropped.
pub fn downmix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Resample mono audio from `from_rate` to `to_rate` using linear interpolation.
///
/// The output holds `ceil(len * to_rate / from_rate)` samples. Equal rates
/// return the input unchanged.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let input = pcm_to_float(samples);
    let target_len =
        ((samples.len() as u64 * to_rate as u64 + from_rate as u64 - 1) / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    let mut output = Vec::with_capacity(target_len);
    for i in 0..target_len {
        let position = i as f64 * step;
        let index = (position.floor() as usize).min(last);
        let frac = (position - index as f64) as f32;

        let current = input[index];
        let next = input[(index + 1).min(last)];
        output.push(current + (next - current) * frac);
    }

    float_to_pcm(&output)
}

/// Convert 16-bit PCM samples to floats in [-1.0, 1.0).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Convert float samples back to 16-bit PCM, clamping out-of-range values.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}
