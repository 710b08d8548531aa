//! GMSK and FSK modulation
//!
//! Bits are mapped to NRZ levels (1 -> +1, 0 -> -1), held for one symbol
//! period, optionally smoothed by a Gaussian filter and integrated into a
//! continuous phase. The output is unit-magnitude complex baseband.
//!
//! Two profiles are available:
//!
//! - `Gmsk { bt }`: Gaussian filter with the given BT product, phase advancing
//!   pi/2 per symbol (modulation index 0.5)
//! - `Fsk { deviation_hz }`: no filter, each sample advances the phase by
//!   `2*pi*deviation/sample_rate`

use std::f64::consts::PI;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::config::ModemConfig;
use crate::error::{AisError, Result};

/// Largest phase change between adjacent samples that still counts as continuous.
pub const MAX_PHASE_STEP: f32 = std::f32::consts::FRAC_PI_4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ModulationProfile {
    /// Gaussian-filtered MSK
    Gmsk { bt: f32 },
    /// Rectangular frequency switching with a fixed deviation
    Fsk { deviation_hz: f32 },
}

impl Default for ModulationProfile {
    fn default() -> Self {
        ModulationProfile::Gmsk { bt: 0.4 }
    }
}

impl ModulationProfile {
    /// Phase advance per sample for a sustained +1 level.
    pub fn phase_step(&self, sample_rate: u32, samples_per_symbol: usize) -> f32 {
        match *self {
            ModulationProfile::Gmsk { .. } => (PI / (2.0 * samples_per_symbol as f64)) as f32,
            ModulationProfile::Fsk { deviation_hz } => {
                (2.0 * PI * deviation_hz as f64 / sample_rate as f64) as f32
            }
        }
    }

    /// Peak frequency deviation in Hz.
    pub fn deviation_hz(&self, symbol_rate: u32) -> f32 {
        match *self {
            ModulationProfile::Gmsk { .. } => symbol_rate as f32 / 4.0,
            ModulationProfile::Fsk { deviation_hz } => deviation_hz,
        }
    }
}

/// Sampled Gaussian filter, `span_symbols * sps + 1` taps normalised to unit sum.
///
/// `h(t) = exp(-2 pi^2 BT^2 t^2 / ln 2)` with t in symbol periods, centred on
/// the middle tap.
pub fn gaussian_pulse(bt: f32, samples_per_symbol: usize, span_symbols: usize) -> Vec<f32> {
    let len = span_symbols * samples_per_symbol + 1;
    let half = (len - 1) as f64 / 2.0;
    let sps = samples_per_symbol as f64;
    let bt = bt as f64;
    let alpha = 2.0 * PI * PI * bt * bt / std::f64::consts::LN_2;

    let mut taps: Vec<f64> = (0..len)
        .map(|i| {
            let t = (i as f64 - half) / sps;
            (-alpha * t * t).exp()
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    if sum > 0.0 {
        for tap in &mut taps {
            *tap /= sum;
        }
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// Modulator for one sample rate / symbol rate / profile combination.
#[derive(Debug, Clone)]
pub struct GmskModulator {
    samples_per_symbol: usize,
    phase_step: f32,
    /// Empty for the FSK profile
    taps: Vec<f32>,
}

impl GmskModulator {
    pub fn new(config: &ModemConfig) -> Result<Self> {
        config.validate()?;
        let sps = config.samples_per_symbol()?;
        let taps = match config.profile {
            ModulationProfile::Gmsk { bt } => gaussian_pulse(bt, sps, config.pulse_span_symbols),
            ModulationProfile::Fsk { .. } => Vec::new(),
        };
        Ok(Self {
            samples_per_symbol: sps,
            phase_step: config.profile.phase_step(config.sample_rate, sps),
            taps,
        })
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.samples_per_symbol
    }

    /// Instantaneous frequency in units of the nominal deviation, one value per sample.
    pub fn frequency_pulse(&self, bits: &[u8]) -> Vec<f32> {
        let sps = self.samples_per_symbol;
        let nrz: Vec<f32> = bits
            .iter()
            .flat_map(|&b| std::iter::repeat_n(if b != 0 { 1.0 } else { -1.0 }, sps))
            .collect();

        if self.taps.is_empty() {
            return nrz;
        }

        // Centred ("same" length) convolution, zero outside the burst
        let half = self.taps.len() / 2;
        (0..nrz.len())
            .map(|n| {
                self.taps
                    .iter()
                    .enumerate()
                    .filter_map(|(j, &tap)| {
                        let idx = (n + half).checked_sub(j)?;
                        nrz.get(idx).map(|&v| v * tap)
                    })
                    .sum()
            })
            .collect()
    }

    /// Modulate bits into `bits.len() * sps` unit-magnitude samples.
    pub fn modulate(&self, bits: &[u8]) -> Vec<Complex32> {
        let step = self.phase_step as f64;
        let mut phase = 0.0f64;

        self.frequency_pulse(bits)
            .into_iter()
            .map(|freq| {
                phase = (phase + step * freq as f64) % (2.0 * PI);
                Complex32::from_polar(1.0, phase as f32)
            })
            .collect()
    }
}

/// One-shot GMSK modulation with the default pulse span.
pub fn modulate(bits: &[u8], sample_rate: u32, symbol_rate: u32, bt: f32) -> Result<Vec<Complex32>> {
    let config = ModemConfig {
        sample_rate,
        symbol_rate,
        profile: ModulationProfile::Gmsk { bt },
        ..ModemConfig::default()
    };
    Ok(GmskModulator::new(&config)?.modulate(bits))
}

/// Unwrapped phase of a sample buffer.
pub fn unwrap_phase(samples: &[Complex32]) -> Vec<f32> {
    let mut unwrapped = Vec::with_capacity(samples.len());
    let mut previous: Option<Complex32> = None;
    let mut total = 0.0f32;

    for &sample in samples {
        total = match previous {
            None => sample.arg(),
            Some(prev) => total + (sample * prev.conj()).arg(),
        };
        unwrapped.push(total);
        previous = Some(sample);
    }
    unwrapped
}

/// Largest absolute phase change between adjacent samples.
pub fn max_phase_step(samples: &[Complex32]) -> f32 {
    unwrap_phase(samples)
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f32::max)
}

/// Reject a modulator setting that cannot keep the phase continuous.
pub(crate) fn check_phase_step(step: f32) -> Result<()> {
    if !(step.is_finite() && step > 0.0 && step < MAX_PHASE_STEP) {
        return Err(AisError::Configuration(format!(
            "per-sample phase step {step:.4} rad must be in (0, pi/4)"
        )));
    }
    Ok(())
}
