//! AIS transmit pipeline
//!
//! Vessel state -> message bits -> frame -> GMSK samples, with an optional
//! loopback self-check of every burst before it leaves, and a stoppable
//! loop that keeps reporting at a fixed interval.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use num_complex::Complex32;
use tracing::{debug, info};

use crate::bits::BitSequence;
use crate::config::ModemConfig;
use crate::crc::crc16_cross_check;
use crate::demodulator::Demodulator;
use crate::error::{AisError, Result};
use crate::frame::{build_frame_with, disassemble_frame, AisFrame, FrameOptions, BUFFER_BITS};
use crate::gmsk::{max_phase_step, GmskModulator, MAX_PHASE_STEP};
use crate::message::{encode_position_report, PositionReport, VesselState};
use crate::radio::SampleSink;

/// Silence placed either side of a burst, in symbols.
pub const GUARD_SYMBOLS: usize = 16;

/// How often a waiting transmit loop looks at its stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// One modulated transmission.
#[derive(Debug, Clone)]
pub struct Burst {
    pub message: BitSequence,
    pub frame: AisFrame,
    pub samples: Vec<Complex32>,
}

#[derive(Debug, Clone)]
pub struct Transmitter {
    options: FrameOptions,
    modulator: GmskModulator,
    /// Present when every burst is checked by decoding it again
    loopback: Option<Demodulator>,
}

impl Transmitter {
    pub fn new(config: ModemConfig) -> Result<Self> {
        let loopback = if config.verify_transmit {
            Some(Demodulator::new(config.clone())?)
        } else {
            None
        };
        Ok(Self {
            options: config.frame_options(),
            modulator: GmskModulator::new(&config)?,
            loopback,
        })
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.modulator.samples_per_symbol()
    }

    /// Burst for a Type 1 report of this vessel.
    pub fn build_burst(&self, vessel: &VesselState) -> Result<Burst> {
        self.build_burst_from_bits(&encode_position_report(vessel)?)
    }

    pub fn build_report_burst(&self, report: &PositionReport) -> Result<Burst> {
        self.build_burst_from_bits(&report.to_bits()?)
    }

    /// Frame and modulate already-encoded message bits.
    pub fn build_burst_from_bits(&self, message: &[u8]) -> Result<Burst> {
        let frame = build_frame_with(message, &self.options);
        let samples = self.modulator.modulate(frame.bits());
        let burst = Burst {
            message: message.to_vec(),
            frame,
            samples,
        };
        if self.loopback.is_some() {
            self.verify(&burst)?;
        }
        Ok(burst)
    }

    /// Check that a burst decodes back to its own message.
    pub fn verify(&self, burst: &Burst) -> Result<()> {
        let deframed = disassemble_frame(burst.frame.bits(), &self.options)?;
        if deframed != burst.message {
            return Err(AisError::ProtocolInconsistency(
                "frame does not disassemble to its message".into(),
            ));
        }
        crc16_cross_check(&burst.message)?;

        let step = max_phase_step(&burst.samples);
        if step >= MAX_PHASE_STEP {
            return Err(AisError::ProtocolInconsistency(format!(
                "phase jump of {step:.3} rad in modulated burst"
            )));
        }

        let Some(demodulator) = &self.loopback else {
            return Ok(());
        };
        match demodulator.decode(&self.with_guard(&burst.samples)) {
            Ok(decoded) => {
                if decoded.report.to_bits()? != burst.message {
                    return Err(AisError::ProtocolInconsistency(format!(
                        "loopback decoded a different message for MMSI {}",
                        decoded.report.vessel.mmsi
                    )));
                }
            }
            // framing was checked above; only position reports parse further
            Err(AisError::UnsupportedMessageType(t)) => {
                debug!("Loopback skipped for message type {}", t)
            }
            Err(e) => {
                return Err(AisError::ProtocolInconsistency(format!(
                    "loopback decode failed: {e}"
                )));
            }
        }
        Ok(())
    }

    /// Burst samples with silent guard intervals either side.
    pub fn with_guard(&self, samples: &[Complex32]) -> Vec<Complex32> {
        let guard = GUARD_SYMBOLS * self.samples_per_symbol();
        let mut out = Vec::with_capacity(samples.len() + 2 * guard);
        out.resize(guard, Complex32::default());
        out.extend_from_slice(samples);
        out.resize(out.len() + guard, Complex32::default());
        out
    }

    /// Length of the power ramp at each end of a burst.
    pub fn ramp_samples(&self) -> usize {
        BUFFER_BITS * self.samples_per_symbol()
    }
}

/// Raised-cosine power ramp over the first and last `len` samples.
pub fn apply_ramp(samples: &mut [Complex32], len: usize) {
    let len = len.min(samples.len() / 2);
    if len == 0 {
        return;
    }
    let total = samples.len();
    for i in 0..len {
        let gain = 0.5 - 0.5 * (std::f32::consts::PI * (i as f32 + 0.5) / len as f32).cos();
        samples[i] *= gain;
        samples[total - 1 - i] *= gain;
    }
}

fn write_all(sink: &mut dyn SampleSink, mut samples: &[Complex32]) -> io::Result<()> {
    while !samples.is_empty() {
        let n = sink.write_samples(samples)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink accepted no samples"));
        }
        samples = &samples[n..];
    }
    Ok(())
}

/// Transmit a burst `count` times (0 = until stopped), one every `interval`.
///
/// The stop flag is checked between chunks and while waiting. Returns the
/// number of complete bursts written.
pub fn run_transmit_loop(
    transmitter: &Transmitter,
    burst: &Burst,
    sink: &mut dyn SampleSink,
    count: u64,
    interval: Duration,
    stop: &AtomicBool,
    chunk_size: usize,
) -> io::Result<u64> {
    let mut samples = burst.samples.clone();
    apply_ramp(&mut samples, transmitter.ramp_samples());
    let samples = transmitter.with_guard(&samples);
    let chunk_size = chunk_size.max(1);

    let mut sent = 0u64;
    while !stop.load(Ordering::Relaxed) && (count == 0 || sent < count) {
        let started = Instant::now();
        for chunk in samples.chunks(chunk_size) {
            if stop.load(Ordering::Relaxed) {
                info!("Transmission stopped mid-burst");
                sink.flush()?;
                return Ok(sent);
            }
            write_all(sink, chunk)?;
        }
        sink.flush()?;
        sent += 1;
        debug!("Burst {} sent ({} samples)", sent, samples.len());

        if count != 0 && sent >= count {
            break;
        }
        while started.elapsed() < interval {
            if stop.load(Ordering::Relaxed) {
                return Ok(sent);
            }
            thread::sleep(STOP_POLL.min(interval.saturating_sub(started.elapsed())));
        }
    }

    Ok(sent)
}
