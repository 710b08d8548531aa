//! Training acquisition and symbol clock recovery
//!
//! The known preamble (training sequence followed by the start flag) is
//! rendered at the configured samples per symbol and correlated against the
//! discriminator output. Each lag is scored under every polarity / residual
//! frequency offset hypothesis; the score is the normalised correlation
//! between the zero-mean template and the offset-corrected signal.
//!
//! The flag is part of the template because an alternating training
//! sequence is its own inverse shifted by one symbol, so on its own it
//! cannot tell the two polarities apart.

use crate::bits::BitSequence;
use crate::config::ModemConfig;
use crate::error::{AisError, Result};
use crate::frame::MIN_FRAME_BITS;
use crate::hdlc::{training_sequence, FLAG, TRAINING_BITS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Polarity {
    Normal,
    Inverted,
}

impl Polarity {
    fn sign(self) -> f32 {
        match self {
            Polarity::Normal => 1.0,
            Polarity::Inverted => -1.0,
        }
    }
}

/// One point of the polarity x frequency-offset search space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypothesis {
    pub polarity: Polarity,
    /// Residual offset in units of the nominal deviation
    pub offset: f32,
}

/// Cartesian product of both polarities with the given offsets.
pub fn hypotheses(offsets: &[f32]) -> Vec<Hypothesis> {
    [Polarity::Normal, Polarity::Inverted]
        .into_iter()
        .flat_map(|polarity| offsets.iter().map(move |&offset| Hypothesis { polarity, offset }))
        .collect()
}

/// Result of a successful training search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acquisition {
    /// Sample index where the training sequence starts
    pub lag: usize,
    pub hypothesis: Hypothesis,
    pub score: f32,
    /// Mean discriminator level over the training sequence
    pub freq_offset: f32,
}

/// Hard-decision symbols at one sample per symbol period.
#[derive(Debug, Clone, PartialEq)]
pub struct DemodulatedSymbolStream {
    pub symbols: BitSequence,
    pub polarity: Polarity,
    /// Frequency offset estimate in units of the nominal deviation
    pub freq_offset: f32,
    pub score: f32,
    /// Sample index of the start of the first symbol
    pub start_sample: usize,
    pub samples_per_symbol: usize,
}

impl DemodulatedSymbolStream {
    /// Sample index where symbol `index` begins.
    pub fn sample_index(&self, index: usize) -> usize {
        self.start_sample + index * self.samples_per_symbol
    }
}

/// The acquisition template: training + start flag as NRZ, zero mean.
pub fn preamble_template(samples_per_symbol: usize) -> Vec<f32> {
    let mut pattern = training_sequence();
    pattern.extend_from_slice(&FLAG);
    let levels: Vec<f32> = pattern
        .iter()
        .flat_map(|&b| std::iter::repeat_n(if b != 0 { 1.0 } else { -1.0 }, samples_per_symbol))
        .collect();
    let mean = levels.iter().sum::<f32>() / levels.len() as f32;
    levels.into_iter().map(|v| v - mean).collect()
}

#[derive(Debug, Clone)]
pub struct ClockRecovery {
    samples_per_symbol: usize,
    template: Vec<f32>,
    template_norm: f64,
    hypotheses: Vec<Hypothesis>,
    threshold: f32,
    tolerance: f32,
    window_symbols: usize,
    lead_symbols: usize,
}

impl ClockRecovery {
    pub fn new(config: &ModemConfig) -> Result<Self> {
        config.validate()?;
        let sps = config.samples_per_symbol()?;
        let template = preamble_template(sps);
        let template_norm = template.iter().map(|&t| (t as f64).powi(2)).sum::<f64>().sqrt();
        Ok(Self {
            samples_per_symbol: sps,
            template,
            template_norm,
            hypotheses: hypotheses(&config.offset_hypotheses),
            threshold: config.correlation_threshold,
            tolerance: config.peak_tolerance,
            window_symbols: config.acquisition_window_symbols,
            lead_symbols: config.lead_symbols,
        })
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.samples_per_symbol
    }

    /// Best score and hypothesis for every lag in the search window.
    fn score_lags(&self, signal: &[f32]) -> Vec<(f32, Hypothesis)> {
        let len = self.template.len();
        let last = (signal.len() - len).min(self.window_symbols * self.samples_per_symbol);

        let mut sum = Vec::with_capacity(signal.len() + 1);
        let mut sum_sq = Vec::with_capacity(signal.len() + 1);
        sum.push(0.0f64);
        sum_sq.push(0.0f64);
        for &v in signal {
            let v = v as f64;
            sum.push(sum[sum.len() - 1] + v);
            sum_sq.push(sum_sq[sum_sq.len() - 1] + v * v);
        }

        (0..=last)
            .map(|lag| {
                let window = &signal[lag..lag + len];
                // the template is zero mean, so the offset does not change the dot product
                let dot: f64 = self
                    .template
                    .iter()
                    .zip(window)
                    .map(|(&t, &s)| t as f64 * s as f64)
                    .sum();
                let s1 = sum[lag + len] - sum[lag];
                let s2 = sum_sq[lag + len] - sum_sq[lag];

                self.hypotheses
                    .iter()
                    .map(|hyp| {
                        let h = hyp.offset as f64;
                        let energy = s2 - 2.0 * h * s1 + len as f64 * h * h;
                        let score = if energy > 1e-12 {
                            hyp.polarity.sign() as f64 * dot / (self.template_norm * energy.sqrt())
                        } else {
                            0.0
                        };
                        (score as f32, *hyp)
                    })
                    .fold((f32::MIN, self.hypotheses[0]), |best, cur| {
                        if cur.0 > best.0 { cur } else { best }
                    })
            })
            .collect()
    }

    /// Search the first `acquisition_window_symbols` for the training sequence.
    ///
    /// Among lags that are local maxima scoring within `peak_tolerance` of the
    /// best, the earliest wins: training precedes payload, so a later peak is
    /// more likely a false lock on data.
    pub fn acquire(&self, signal: &[f32]) -> Result<Acquisition> {
        if signal.len() < self.template.len() {
            return Err(AisError::FrameTooShort {
                len: signal.len() / self.samples_per_symbol,
                min: MIN_FRAME_BITS,
            });
        }

        let scores = self.score_lags(signal);
        let best = scores.iter().map(|s| s.0).fold(f32::MIN, f32::max);
        if best < self.threshold {
            return Err(AisError::AcquisitionFailed {
                best_score: best.max(0.0),
            });
        }

        let is_peak = |i: usize| {
            let score = scores[i].0;
            (i == 0 || score >= scores[i - 1].0)
                && (i + 1 == scores.len() || score >= scores[i + 1].0)
        };
        let lag = (0..scores.len())
            .find(|&i| scores[i].0 >= best - self.tolerance && is_peak(i))
            .ok_or(AisError::AcquisitionFailed { best_score: best })?;

        let training_len = TRAINING_BITS * self.samples_per_symbol;
        let freq_offset =
            signal[lag..lag + training_len].iter().sum::<f32>() / training_len as f32;

        Ok(Acquisition {
            lag,
            hypothesis: scores[lag].1,
            score: scores[lag].0,
            freq_offset,
        })
    }

    /// Slice hard decisions at symbol centres, starting `lead_symbols` before the lock.
    pub fn slice(&self, signal: &[f32], acquisition: &Acquisition) -> DemodulatedSymbolStream {
        let sps = self.samples_per_symbol;
        let lead = self.lead_symbols.min(acquisition.lag / sps);
        let start = acquisition.lag - lead * sps;
        let sign = acquisition.hypothesis.polarity.sign();

        let symbols = (start + sps / 2..signal.len())
            .step_by(sps)
            .map(|i| ((signal[i] - acquisition.freq_offset) * sign > 0.0) as u8)
            .collect();

        DemodulatedSymbolStream {
            symbols,
            polarity: acquisition.hypothesis.polarity,
            freq_offset: acquisition.freq_offset,
            score: acquisition.score,
            start_sample: start,
            samples_per_symbol: sps,
        }
    }

    /// Acquire and slice in one step.
    pub fn recover_clock(&self, signal: &[f32]) -> Result<DemodulatedSymbolStream> {
        let acquisition = self.acquire(signal)?;
        Ok(self.slice(signal, &acquisition))
    }
}

/// One-shot clock recovery over a discriminator output.
pub fn recover_clock(signal: &[f32], config: &ModemConfig) -> Result<DemodulatedSymbolStream> {
    ClockRecovery::new(config)?.recover_clock(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{agreement, from_str01};

    const SPS: usize = 10;

    /// Ideal discriminator output for a bit pattern.
    fn levels(bits: &[u8], offset: f32) -> Vec<f32> {
        bits.iter()
            .flat_map(|&b| std::iter::repeat_n(if b != 0 { 1.0 + offset } else { -1.0 + offset }, SPS))
            .collect()
    }

    fn burst() -> BitSequence {
        let mut bits = training_sequence();
        bits.extend_from_slice(&FLAG);
        bits.extend(from_str01("1100101000111101011001010011100010110100"));
        bits
    }

    #[test]
    fn test_template_is_zero_mean() {
        let template = preamble_template(SPS);
        assert_eq!(template.len(), 32 * SPS);
        assert!(template.iter().sum::<f32>().abs() < 1e-3);
    }

    #[test]
    fn test_hypothesis_space() {
        let all = hypotheses(&[-0.1, 0.0, 0.1]);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].polarity, Polarity::Normal);
        assert_eq!(all[5].polarity, Polarity::Inverted);
    }

    #[test]
    fn test_acquire_finds_lag() {
        let mut signal = vec![0.0; 137];
        signal.extend(levels(&burst(), 0.0));
        let recovery = ClockRecovery::new(&ModemConfig::default()).unwrap();
        let acq = recovery.acquire(&signal).unwrap();
        assert_eq!(acq.lag, 137);
        assert_eq!(acq.hypothesis.polarity, Polarity::Normal);
        assert!(acq.score > 0.99);
    }

    #[test]
    fn test_inverted_polarity_and_offset() {
        let inverted: Vec<f32> = levels(&burst(), 0.0).iter().map(|v| -v + 0.2).collect();
        let mut signal = vec![0.2; 50];
        signal.extend(inverted);
        let stream = recover_clock(&signal, &ModemConfig::default()).unwrap();
        assert_eq!(stream.polarity, Polarity::Inverted);
        assert!((stream.freq_offset - 0.2).abs() < 1e-3);
        // five lead symbols fit before the lock at sample 50
        assert_eq!(stream.start_sample, 0);
        assert_eq!(&stream.symbols[5..5 + burst().len()], &burst()[..]);
    }

    #[test]
    fn test_slices_from_lead_symbols() {
        let mut signal = vec![0.0; 300];
        signal.extend(levels(&burst(), 0.0));
        let stream = recover_clock(&signal, &ModemConfig::default()).unwrap();
        assert_eq!(stream.start_sample, 300 - 8 * SPS);
        assert_eq!(stream.sample_index(8), 300);
        let tail = &stream.symbols[8..];
        assert_eq!(agreement(tail, &burst()), burst().len());
    }

    #[test]
    fn test_flat_signal_fails() {
        let signal = vec![0.0; 4000];
        assert!(matches!(
            recover_clock(&signal, &ModemConfig::default()),
            Err(AisError::AcquisitionFailed { .. })
        ));
    }

    #[test]
    fn test_short_signal() {
        assert!(matches!(
            recover_clock(&[0.5; 100], &ModemConfig::default()),
            Err(AisError::FrameTooShort { .. })
        ));
    }
}
