//! FM discriminator
//!
//! Turns complex baseband into instantaneous frequency normalised so that the
//! nominal deviation reads as +/-1.0.

use num_complex::Complex32;

use crate::config::ModemConfig;
use crate::error::Result;

/// Subtract the mean I/Q value (carrier leak / DC bias).
pub fn remove_dc(samples: &[Complex32]) -> Vec<Complex32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<Complex32>() / samples.len() as f32;
    samples.iter().map(|&s| s - mean).collect()
}

/// Per-sample phase change in radians, i.e. `diff(unwrap(angle(x)))`.
///
/// Output has the same length as the input; the first value repeats the second.
pub fn instantaneous_frequency(samples: &[Complex32]) -> Vec<f32> {
    if samples.len() < 2 {
        return vec![0.0; samples.len()];
    }
    let mut freq = Vec::with_capacity(samples.len());
    freq.push(0.0);
    freq.extend(samples.windows(2).map(|w| (w[1] * w[0].conj()).arg()));
    freq[0] = freq[1];
    freq
}

/// Centred moving average. Near the edges only the samples in range are averaged.
pub fn moving_average(signal: &[f32], len: usize) -> Vec<f32> {
    if len <= 1 || signal.is_empty() {
        return signal.to_vec();
    }
    let half = len / 2;
    let mut prefix = Vec::with_capacity(signal.len() + 1);
    prefix.push(0.0f64);
    for &v in signal {
        prefix.push(prefix[prefix.len() - 1] + v as f64);
    }

    (0..signal.len())
        .map(|n| {
            let lo = n.saturating_sub(half);
            let hi = (n + half + 1).min(signal.len());
            ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Discriminator {
    remove_dc: bool,
    lowpass_len: usize,
    /// Radians per sample at the nominal deviation
    nominal_step: f32,
}

impl Discriminator {
    pub fn new(config: &ModemConfig) -> Result<Self> {
        let sps = config.samples_per_symbol()?;
        Ok(Self {
            remove_dc: config.remove_dc,
            lowpass_len: config.lowpass_len()?,
            nominal_step: config.profile.phase_step(config.sample_rate, sps),
        })
    }

    /// Normalised instantaneous frequency, one value per input sample.
    pub fn process(&self, samples: &[Complex32]) -> Vec<f32> {
        let freq = if self.remove_dc {
            instantaneous_frequency(&remove_dc(samples))
        } else {
            instantaneous_frequency(samples)
        };
        let scale = 1.0 / self.nominal_step;
        moving_average(&freq, self.lowpass_len)
            .into_iter()
            .map(|f| f * scale)
            .collect()
    }
}

/// One-shot discriminator over a sample buffer.
pub fn demodulate(samples: &[Complex32], config: &ModemConfig) -> Result<Vec<f32>> {
    Ok(Discriminator::new(config)?.process(samples))
}
