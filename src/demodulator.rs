//! AIS receive pipeline
//!
//! Complex baseband in, validated position reports out. The discriminator
//! runs once over a buffer; the training search then walks it window by
//! window, and every burst it locks onto is sliced, deframed and decoded.

use std::fmt;

use num_complex::Complex32;
use serde::Serialize;
use tracing::debug;

use crate::clock::{Acquisition, ClockRecovery, Polarity};
use crate::config::ModemConfig;
use crate::discriminator::Discriminator;
use crate::error::{AisError, Result};
use crate::frame::{FrameLocator, BUFFER_BITS, MIN_FRAME_BITS, SLOT_BITS};
use crate::hdlc::{FLAG_BITS, TRAINING_BITS};
use crate::message::PositionReport;
use crate::nmea::NmeaSentence;
use crate::session::DecoderSession;

/// A position report recovered from the air, with burst diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    pub report: PositionReport,
    /// The message as an `!AIVDM` sentence
    pub nmea: String,
    /// Sample index of the first training symbol
    pub sample_offset: u64,
    /// Sample index just past the end flag
    pub end_sample: u64,
    pub polarity: Polarity,
    /// Residual carrier offset estimated over the training sequence
    pub freq_offset_hz: f32,
    /// Normalised training correlation, 0..=1
    pub score: f32,
    pub crc: u16,
}

impl fmt::Display for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.nmea)?;
        writeln!(
            f,
            "  Burst          : sample {} ({:?}, {:+.0} Hz, score {:.2}, CRC {:04x})",
            self.sample_offset, self.polarity, self.freq_offset_hz, self.score, self.crc
        )?;
        write!(f, "{}", self.report)
    }
}

/// How far down the receive chain a failure happened.
fn stage(error: &AisError) -> u8 {
    match error {
        AisError::AcquisitionFailed { .. } => 0,
        AisError::FrameTooShort { .. } => 1,
        AisError::FlagNotFound => 2,
        AisError::FrameCorrupt(_) => 3,
        _ => 4,
    }
}

/// Result of one decode attempt and where the scan resumes.
struct Attempt {
    outcome: Result<DecodedMessage>,
    next: usize,
}

#[derive(Debug, Clone)]
pub struct Demodulator {
    config: ModemConfig,
    discriminator: Discriminator,
    clock: ClockRecovery,
    locator: FrameLocator,
    samples_per_symbol: usize,
    deviation_hz: f32,
}

impl Demodulator {
    pub fn new(config: ModemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            discriminator: Discriminator::new(&config)?,
            clock: ClockRecovery::new(&config)?,
            locator: config.frame_locator(),
            samples_per_symbol: config.samples_per_symbol()?,
            deviation_hz: config.profile.deviation_hz(config.symbol_rate),
            config,
        })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.samples_per_symbol
    }

    /// Samples a burst may occupy after its training starts.
    fn burst_samples(&self) -> usize {
        (SLOT_BITS + FLAG_BITS) * self.samples_per_symbol
    }

    /// Samples between successive training searches.
    fn window_samples(&self) -> usize {
        (self.config.acquisition_window_symbols * self.samples_per_symbol).max(1)
    }

    /// Samples a stream must hold back so that any burst whose training
    /// starts before the cut is complete.
    pub fn overlap_samples(&self) -> usize {
        (self.config.lead_symbols + SLOT_BITS + FLAG_BITS + BUFFER_BITS) * self.samples_per_symbol
    }

    /// Decode the first burst in `samples`.
    ///
    /// If nothing decodes, the error from the furthest stage any candidate
    /// reached is returned, so a burst with a bad CRC reports `FrameCorrupt`
    /// rather than the acquisition failures of the silence around it.
    pub fn decode(&self, samples: &[Complex32]) -> Result<DecodedMessage> {
        let signal = self.discriminator.process(samples);
        let min_len = MIN_FRAME_BITS * self.samples_per_symbol;
        if signal.len() < min_len {
            return Err(AisError::FrameTooShort {
                len: signal.len() / self.samples_per_symbol,
                min: MIN_FRAME_BITS,
            });
        }

        let mut error: Option<AisError> = None;
        let mut pos = 0;
        while pos + min_len <= signal.len() {
            let attempt = self.attempt(&signal, pos);
            match attempt.outcome {
                Ok(message) => return Ok(message),
                Err(e) => {
                    if error.as_ref().is_none_or(|kept| stage(&e) > stage(kept)) {
                        error = Some(e);
                    }
                }
            }
            pos = attempt.next.max(pos + 1);
        }

        Err(error.unwrap_or(AisError::AcquisitionFailed { best_score: 0.0 }))
    }

    /// Decode every burst in a buffer.
    pub fn scan(&self, samples: &[Complex32], session: &mut DecoderSession) -> Vec<DecodedMessage> {
        self.scan_region(samples, samples.len(), session).0
    }

    /// Decode bursts whose training starts before `accept_before`.
    ///
    /// Returns the messages and the sample index the next scan should start
    /// from; anything from there on has not been consumed.
    pub fn scan_region(
        &self,
        samples: &[Complex32],
        accept_before: usize,
        session: &mut DecoderSession,
    ) -> (Vec<DecodedMessage>, usize) {
        let signal = self.discriminator.process(samples);
        let min_len = MIN_FRAME_BITS * self.samples_per_symbol;
        let lead = self.config.lead_symbols * self.samples_per_symbol;

        let mut messages = Vec::new();
        let mut pos = 0;
        while pos < accept_before && pos + min_len <= signal.len() {
            let window = self.search_window(&signal, pos);
            let acquisition = match self.clock.acquire(window) {
                Ok(acquisition) => acquisition,
                Err(e) => {
                    session.record_failure(&e);
                    pos += self.window_samples();
                    continue;
                }
            };

            let lag = pos + acquisition.lag;
            if lag >= accept_before {
                // leave it for the next buffer, with its lead-in
                pos = lag.saturating_sub(lead).max(pos);
                break;
            }

            let attempt = self.decode_acquired(&signal, pos, &acquisition);
            match attempt.outcome {
                Ok(message) => {
                    session.record_decoded();
                    messages.push(message);
                }
                Err(e) => session.record_failure(&e),
            }
            pos = attempt.next.max(pos + 1);
        }

        (messages, pos.min(samples.len()))
    }

    fn search_window<'a>(&self, signal: &'a [f32], pos: usize) -> &'a [f32] {
        let end = (pos + self.window_samples() + self.burst_samples()).min(signal.len());
        &signal[pos..end]
    }

    fn attempt(&self, signal: &[f32], pos: usize) -> Attempt {
        match self.clock.acquire(self.search_window(signal, pos)) {
            Ok(acquisition) => self.decode_acquired(signal, pos, &acquisition),
            Err(e) => Attempt {
                outcome: Err(e),
                next: pos + self.window_samples(),
            },
        }
    }

    /// Slice, deframe and parse the burst locked at `pos + acquisition.lag`.
    fn decode_acquired(&self, signal: &[f32], pos: usize, acquisition: &Acquisition) -> Attempt {
        let sps = self.samples_per_symbol;
        let window = &signal[pos..];
        let limit = (acquisition.lag + self.burst_samples()).min(window.len());
        let stream = self.clock.slice(&window[..limit], acquisition);
        let retry_at = pos + acquisition.lag + TRAINING_BITS * sps;

        let (start, deframed) = match self.locator.extract(&stream.symbols) {
            Ok(found) => found,
            Err(e) => {
                return Attempt {
                    outcome: Err(e),
                    next: retry_at,
                };
            }
        };

        let sample_offset = pos + stream.sample_index(start.training_at);
        let end_sample = pos + stream.sample_index(deframed.frame_end);
        debug!(
            "Frame at sample {} ({:?}, score {:.2}), {} message bits",
            sample_offset,
            stream.polarity,
            stream.score,
            deframed.message.len()
        );

        // a CRC-valid frame is consumed even when its content is not for us
        let outcome = PositionReport::from_bits(&deframed.message).map(|report| DecodedMessage {
            report,
            nmea: NmeaSentence::from_bits(&deframed.message, None).to_string(),
            sample_offset: sample_offset as u64,
            end_sample: end_sample as u64,
            polarity: stream.polarity,
            freq_offset_hz: stream.freq_offset * self.deviation_hz,
            score: stream.score,
            crc: deframed.crc,
        });

        Attempt {
            outcome,
            next: end_sample.max(retry_at),
        }
    }
}

/// One-shot decode of a sample buffer.
pub fn decode_samples(samples: &[Complex32], config: &ModemConfig) -> Result<DecodedMessage> {
    Demodulator::new(config.clone())?.decode(samples)
}

/// Decodes a continuous sample stream delivered in arbitrary chunks.
///
/// The tail of each chunk is carried into the next so bursts straddling a
/// chunk boundary are decoded once, whole.
#[derive(Debug, Clone)]
pub struct StreamDemodulator {
    demodulator: Demodulator,
    buffer: Vec<Complex32>,
    /// Absolute sample index of `buffer[0]`
    base: u64,
}

impl StreamDemodulator {
    pub fn new(demodulator: Demodulator) -> Self {
        Self {
            demodulator,
            buffer: Vec::new(),
            base: 0,
        }
    }

    pub fn demodulator(&self) -> &Demodulator {
        &self.demodulator
    }

    /// Samples consumed so far, including those still buffered.
    pub fn position(&self) -> u64 {
        self.base + self.buffer.len() as u64
    }

    pub fn push(&mut self, chunk: &[Complex32], session: &mut DecoderSession) -> Vec<DecodedMessage> {
        self.buffer.extend_from_slice(chunk);
        let overlap = self.demodulator.overlap_samples();
        if self.buffer.len() <= overlap {
            return Vec::new();
        }
        let accept_before = self.buffer.len() - overlap;
        self.run(accept_before, session)
    }

    /// Decode whatever is left at end of stream.
    pub fn finish(&mut self, session: &mut DecoderSession) -> Vec<DecodedMessage> {
        let len = self.buffer.len();
        let messages = self.run(len, session);
        self.base += self.buffer.len() as u64;
        self.buffer.clear();
        messages
    }

    /// Account for `samples` lost from the stream. What is buffered is
    /// decoded as a stream end, and the next chunk is acquired afresh at its
    /// true position.
    pub fn skip(&mut self, samples: usize, session: &mut DecoderSession) -> Vec<DecodedMessage> {
        let messages = self.finish(session);
        self.base += samples as u64;
        messages
    }

    fn run(&mut self, accept_before: usize, session: &mut DecoderSession) -> Vec<DecodedMessage> {
        let (mut messages, carry_from) =
            self.demodulator
                .scan_region(&self.buffer, accept_before, session);
        for message in &mut messages {
            message.sample_offset += self.base;
            message.end_sample += self.base;
        }
        self.buffer.drain(..carry_from);
        self.base += carry_from as u64;
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_frame;
    use crate::gmsk::GmskModulator;
    use crate::message::{encode_position_report, VesselState};

    fn vessel(mmsi: u32) -> VesselState {
        VesselState {
            mmsi,
            latitude: 37.7749,
            longitude: -122.4194,
            speed_over_ground: 12.5,
            course_over_ground: 45.0,
            true_heading: 45,
            nav_status: 0,
            timestamp: 0,
        }
    }

    fn burst(mmsi: u32) -> Vec<Complex32> {
        let config = ModemConfig::default();
        let frame = build_frame(&encode_position_report(&vessel(mmsi)).unwrap());
        GmskModulator::new(&config).unwrap().modulate(frame.bits())
    }

    fn silence(len: usize) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); len]
    }

    #[test]
    fn test_decode_single_burst() {
        let mut samples = silence(1000);
        samples.extend(burst(123456789));
        samples.extend(silence(500));

        let demod = Demodulator::new(ModemConfig::default()).unwrap();
        let message = demod.decode(&samples).unwrap();
        assert_eq!(message.report.vessel.mmsi, 123456789);
        assert_eq!(message.polarity, Polarity::Normal);
        assert!(message.nmea.starts_with("!AIVDM,1,1,,,"));
        assert!((message.sample_offset as i64 - 1000).abs() <= 10);
        assert!(message.end_sample > message.sample_offset);
    }

    #[test]
    fn test_scan_finds_every_burst() {
        let mut samples = silence(300);
        samples.extend(burst(111111111));
        samples.extend(silence(4000));
        samples.extend(burst(222222222));
        samples.extend(silence(300));

        let demod = Demodulator::new(ModemConfig::default()).unwrap();
        let mut session = DecoderSession::new();
        let messages = demod.scan(&samples, &mut session);
        let mmsis: Vec<u32> = messages.iter().map(|m| m.report.vessel.mmsi).collect();
        assert_eq!(mmsis, vec![111111111, 222222222]);
        assert_eq!(session.decoded, 2);
    }

    #[test]
    fn test_stream_across_chunk_boundaries() {
        let mut samples = silence(2000);
        samples.extend(burst(333333333));
        samples.extend(silence(3000));

        let demod = Demodulator::new(ModemConfig::default()).unwrap();
        let mut stream = StreamDemodulator::new(demod);
        let mut session = DecoderSession::new();
        let mut messages = Vec::new();
        // the burst straddles several chunks
        for chunk in samples.chunks(700) {
            messages.extend(stream.push(chunk, &mut session));
        }
        messages.extend(stream.finish(&mut session));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].report.vessel.mmsi, 333333333);
        assert!((messages[0].sample_offset as i64 - 2000).abs() <= 10);
        assert_eq!(stream.position(), samples.len() as u64);
    }

    #[test]
    fn test_stream_offsets_after_gap() {
        let mut samples = silence(1000);
        samples.extend(burst(444444444));
        samples.extend(silence(3000));
        let gap_start = samples.len();
        // the front of this burst is lost with the gap
        samples.extend(silence(2000));
        samples.extend(burst(555555555));
        let gap_end = samples.len() - 1200;
        samples.extend(silence(600));
        let second = samples.len();
        samples.extend(burst(666666666));
        samples.extend(silence(1500));

        let demod = Demodulator::new(ModemConfig::default()).unwrap();
        let mut stream = StreamDemodulator::new(demod);
        let mut session = DecoderSession::new();
        let mut messages = Vec::new();
        for chunk in samples[..gap_start].chunks(900) {
            messages.extend(stream.push(chunk, &mut session));
        }
        messages.extend(stream.skip(gap_end - gap_start, &mut session));
        for chunk in samples[gap_end..].chunks(900) {
            messages.extend(stream.push(chunk, &mut session));
        }
        messages.extend(stream.finish(&mut session));

        let mmsis: Vec<u32> = messages.iter().map(|m| m.report.vessel.mmsi).collect();
        assert_eq!(mmsis, vec![444444444, 666666666]);
        assert!((messages[0].sample_offset as i64 - 1000).abs() <= 10);
        assert!((messages[1].sample_offset as i64 - second as i64).abs() <= 10);
        assert_eq!(stream.position(), samples.len() as u64);
    }

    #[test]
    fn test_short_buffer() {
        let demod = Demodulator::new(ModemConfig::default()).unwrap();
        assert!(matches!(
            demod.decode(&silence(500)),
            Err(AisError::FrameTooShort { .. })
        ));
    }
}
