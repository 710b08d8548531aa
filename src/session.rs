//! Decoder statistics and retry pacing
//!
//! A `DecoderSession` is owned by whoever drives the decode loop and is
//! passed into each scan; nothing in the codec keeps global counters.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AisError, CorruptKind};

/// Consecutive failures between summary log lines.
const FAILURE_SUMMARY_EVERY: u64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecoderSession {
    pub buffers: u64,
    pub samples: u64,
    pub attempts: u64,
    pub decoded: u64,
    pub acquisition_failures: u64,
    pub flag_not_found: u64,
    pub too_short: u64,
    pub crc_errors: u64,
    pub stuffing_errors: u64,
    pub length_errors: u64,
    pub unsupported: u64,
    pub inconsistencies: u64,
    pub other_errors: u64,
    /// Buffers dropped by the reader because the decoder was busy
    pub dropped_buffers: u64,
    #[serde(skip)]
    consecutive_failures: u64,
}

impl DecoderSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_buffer(&mut self, samples: usize) {
        self.buffers += 1;
        self.samples += samples as u64;
    }

    pub fn record_decoded(&mut self) {
        self.attempts += 1;
        self.decoded += 1;
        self.consecutive_failures = 0;
    }

    /// Count a failed decode attempt under its typed reason.
    pub fn record_failure(&mut self, error: &AisError) {
        self.attempts += 1;
        self.consecutive_failures += 1;

        match error {
            AisError::AcquisitionFailed { .. } => self.acquisition_failures += 1,
            AisError::FlagNotFound => self.flag_not_found += 1,
            AisError::FrameTooShort { .. } => self.too_short += 1,
            AisError::FrameCorrupt(CorruptKind::CrcMismatch { .. }) => self.crc_errors += 1,
            AisError::FrameCorrupt(CorruptKind::StuffingViolation { .. }) => {
                self.stuffing_errors += 1
            }
            AisError::FrameCorrupt(CorruptKind::PayloadLength { .. }) => self.length_errors += 1,
            AisError::UnsupportedMessageType(_) => self.unsupported += 1,
            AisError::ProtocolInconsistency(_) => self.inconsistencies += 1,
            _ => self.other_errors += 1,
        }

        match error {
            AisError::ProtocolInconsistency(msg) => warn!("Decoder inconsistency: {}", msg),
            // silent channels produce these constantly
            AisError::AcquisitionFailed { .. } => {}
            e => debug!("Decode attempt failed: {}", e),
        }

        if self.consecutive_failures % FAILURE_SUMMARY_EVERY == 0 {
            info!(
                "{} decode attempts without a message ({} acquisition failures so far)",
                self.consecutive_failures, self.acquisition_failures
            );
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    pub fn failures(&self) -> u64 {
        self.attempts - self.decoded
    }

    /// Fold another session's counters into this one.
    pub fn merge(&mut self, other: &DecoderSession) {
        self.buffers += other.buffers;
        self.samples += other.samples;
        self.attempts += other.attempts;
        self.decoded += other.decoded;
        self.acquisition_failures += other.acquisition_failures;
        self.flag_not_found += other.flag_not_found;
        self.too_short += other.too_short;
        self.crc_errors += other.crc_errors;
        self.stuffing_errors += other.stuffing_errors;
        self.length_errors += other.length_errors;
        self.unsupported += other.unsupported;
        self.inconsistencies += other.inconsistencies;
        self.other_errors += other.other_errors;
        self.dropped_buffers += other.dropped_buffers;
    }
}

impl fmt::Display for DecoderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} sample buffers ({} samples)", self.buffers, self.samples)?;
        writeln!(f, "{} buffers dropped", self.dropped_buffers)?;
        writeln!(f, "{} decode attempts", self.attempts)?;
        writeln!(f, "{} messages decoded", self.decoded)?;
        writeln!(f, "{} acquisition failures", self.acquisition_failures)?;
        writeln!(f, "{} start flags not found", self.flag_not_found)?;
        writeln!(f, "{} frames too short", self.too_short)?;
        writeln!(f, "{} CRC errors", self.crc_errors)?;
        writeln!(f, "{} bit stuffing violations", self.stuffing_errors)?;
        writeln!(f, "{} bad payload lengths", self.length_errors)?;
        writeln!(f, "{} unsupported message types", self.unsupported)?;
        write!(f, "{} protocol inconsistencies", self.inconsistencies)
    }
}

/// Exponential backoff for polling an idle source.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(250))
    }
}
