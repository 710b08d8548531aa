//! AIS frame assembly and disassembly
//!
//! On-air layout:
//!
//! ```text
//! training(24) | start flag(8) | NRZI(stuff(message + CRC)) | end flag(8) | [buffer(8)]
//! ```
//!
//! Training and flags are sent as-is; only the payload region is stuffed and
//! NRZI coded. Because NRZI output of stuffed data can still contain the flag
//! pattern, the end flag is confirmed by the CRC: every exact flag match far
//! enough past the start is tried in order and the first one whose payload
//! verifies wins.

use crate::bits::BitSequence;
use crate::crc::{append_crc, compute_crc16, crc_to_bits, extract_crc, CRC_BITS};
use crate::error::{AisError, CorruptKind, Result};
use crate::hdlc::{
    bit_destuff, bit_stuff, flag_agreement, training_sequence, FlagMatch, FLAG, FLAG_BITS,
    TRAINING_BITS,
};
use crate::message::POSITION_REPORT_BITS;
use crate::nrzi::{nrzi_decode_from, nrzi_encode_from, NRZI_INITIAL_LEVEL};

/// Zero bits appended after the end flag when the trailing buffer is on.
pub const BUFFER_BITS: usize = 8;
/// Smallest message accepted on the air.
pub const MIN_PAYLOAD_BITS: usize = POSITION_REPORT_BITS;
/// Smallest complete frame: training, both flags and a position report.
pub const MIN_FRAME_BITS: usize = TRAINING_BITS + 2 * FLAG_BITS + MIN_PAYLOAD_BITS;
/// Length of one SOTDMA slot; a single-slot burst never exceeds it.
pub const SLOT_BITS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub nrzi_initial_level: u8,
    pub trailing_buffer: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            nrzi_initial_level: NRZI_INITIAL_LEVEL,
            trailing_buffer: true,
        }
    }
}

/// A complete on-air bit pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AisFrame {
    bits: BitSequence,
    payload_start: usize,
    payload_len: usize,
}

impl AisFrame {
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn into_bits(self) -> BitSequence {
        self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The stuffed, NRZI-coded region between the flags.
    pub fn payload_region(&self) -> &[u8] {
        &self.bits[self.payload_start..self.payload_start + self.payload_len]
    }
}

/// Build a frame around message bits with the default options.
pub fn build_frame(message: &[u8]) -> AisFrame {
    build_frame_with(message, &FrameOptions::default())
}

/// Build a frame around message bits, computing and appending the CRC.
pub fn build_frame_with(message: &[u8], options: &FrameOptions) -> AisFrame {
    let mut data = message.to_vec();
    append_crc(&mut data);
    assemble_frame(&data, options)
}

/// Frame bits that already carry their CRC (correct or not).
pub fn assemble_frame(data_with_crc: &[u8], options: &FrameOptions) -> AisFrame {
    let coded = nrzi_encode_from(&bit_stuff(data_with_crc), options.nrzi_initial_level);

    let mut bits = training_sequence();
    bits.reserve(2 * FLAG_BITS + coded.len() + BUFFER_BITS);
    bits.extend_from_slice(&FLAG);
    let payload_start = bits.len();
    bits.extend_from_slice(&coded);
    bits.extend_from_slice(&FLAG);
    if options.trailing_buffer {
        bits.extend(std::iter::repeat_n(0u8, BUFFER_BITS));
    }

    AisFrame {
        bits,
        payload_start,
        payload_len: coded.len(),
    }
}

/// Message bits recovered from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deframed {
    pub message: BitSequence,
    pub crc: u16,
    /// Index of the first payload bit
    pub payload_start: usize,
    /// Index just past the end flag
    pub frame_end: usize,
}

/// Try each exact end flag after `payload_start` until one yields a payload
/// that destuffs to whole bytes and passes the CRC.
fn deframe_from(bits: &[u8], payload_start: usize, nrzi_level: u8) -> Result<Deframed> {
    let min_end = payload_start + MIN_PAYLOAD_BITS + CRC_BITS;
    if bits.len() < min_end + FLAG_BITS {
        return Err(AisError::FrameTooShort {
            len: bits.len(),
            min: min_end + FLAG_BITS,
        });
    }

    let mut first_error: Option<AisError> = None;
    let mut rank = 0u8;
    let mut keep = |e: AisError, r: u8| {
        if first_error.is_none() || r > rank {
            first_error = Some(e);
            rank = r;
        }
    };

    for end in min_end..=bits.len() - FLAG_BITS {
        if !FlagMatch::Exact.matches_at(bits, end) {
            continue;
        }

        let stuffed = nrzi_decode_from(&bits[payload_start..end], nrzi_level);
        let data = match bit_destuff(&stuffed) {
            Ok(data) => data,
            Err(e) => {
                keep(e, 2);
                continue;
            }
        };
        if data.len() % 8 != 0 || data.len() < MIN_PAYLOAD_BITS + CRC_BITS {
            keep(AisError::FrameCorrupt(CorruptKind::PayloadLength { len: data.len() }), 1);
            continue;
        }

        let message = &data[..data.len() - CRC_BITS];
        let expected = extract_crc(&data).unwrap_or_default();
        let computed = compute_crc16(message);
        if computed != expected {
            keep(
                AisError::FrameCorrupt(CorruptKind::CrcMismatch { expected, computed }),
                3,
            );
            continue;
        }

        return Ok(Deframed {
            message: message.to_vec(),
            crc: computed,
            payload_start,
            frame_end: end + FLAG_BITS,
        });
    }

    Err(first_error.unwrap_or(AisError::FlagNotFound))
}

/// Check the frame header and return the index of the first payload bit.
fn exact_header(frame: &[u8]) -> Result<usize> {
    if frame.len() < MIN_FRAME_BITS {
        return Err(AisError::FrameTooShort {
            len: frame.len(),
            min: MIN_FRAME_BITS,
        });
    }
    if !FlagMatch::Exact.matches_at(frame, TRAINING_BITS) {
        return Err(AisError::FlagNotFound);
    }
    Ok(TRAINING_BITS + FLAG_BITS)
}

/// The NRZI-coded, stuffed region between the start and end flags of a
/// frame laid out by [`build_frame`].
pub fn extract_payload(frame: &[u8]) -> Result<BitSequence> {
    let start = exact_header(frame)?;
    let deframed = deframe_from(frame, start, NRZI_INITIAL_LEVEL)?;
    Ok(frame[start..deframed.frame_end - FLAG_BITS].to_vec())
}

/// Full inverse of [`build_frame_with`]: message bits with the CRC checked and removed.
pub fn disassemble_frame(frame: &[u8], options: &FrameOptions) -> Result<BitSequence> {
    let start = exact_header(frame)?;
    deframe_from(frame, start, options.nrzi_initial_level).map(|d| d.message)
}

/// Where a frame starts in a noisy symbol stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStart {
    /// Index of the first training bit
    pub training_at: usize,
    pub payload_start: usize,
    /// Training agreement plus flag agreement, out of 32
    pub score: usize,
}

/// Finds and deframes a burst in hard-decision symbols from clock recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocator {
    /// Training must begin within this many symbols of the stream start
    pub training_search_span: usize,
    pub min_training_agreement: usize,
    pub min_flag_agreement: usize,
    pub nrzi_initial_level: u8,
}

impl Default for FrameLocator {
    fn default() -> Self {
        Self {
            training_search_span: 40,
            min_training_agreement: 21,
            min_flag_agreement: 6,
            nrzi_initial_level: NRZI_INITIAL_LEVEL,
        }
    }
}

impl FrameLocator {
    /// Best training + start flag candidate near the start of the stream.
    ///
    /// Candidates are scored by total bit agreement; ties go to the earliest.
    pub fn locate(&self, symbols: &[u8]) -> Result<FrameStart> {
        if symbols.len() < MIN_FRAME_BITS {
            return Err(AisError::FrameTooShort {
                len: symbols.len(),
                min: MIN_FRAME_BITS,
            });
        }

        let training = training_sequence();
        let flag_policy = FlagMatch::Fuzzy {
            min_agreement: self.min_flag_agreement,
        };
        let last = self
            .training_search_span
            .min(symbols.len() - TRAINING_BITS - FLAG_BITS);

        let mut best: Option<FrameStart> = None;
        for p in 0..=last {
            let training_score = crate::bits::agreement(&symbols[p..p + TRAINING_BITS], &training);
            if training_score < self.min_training_agreement {
                continue;
            }
            let flag_at = p + TRAINING_BITS;
            if !flag_policy.matches_at(symbols, flag_at) {
                continue;
            }
            let score = training_score + flag_agreement(symbols, flag_at).unwrap_or(0);
            if best.is_none_or(|b| score > b.score) {
                best = Some(FrameStart {
                    training_at: p,
                    payload_start: flag_at + FLAG_BITS,
                    score,
                });
            }
        }

        best.ok_or(AisError::FlagNotFound)
    }

    /// Locate the frame and recover its CRC-checked message bits.
    pub fn extract(&self, symbols: &[u8]) -> Result<(FrameStart, Deframed)> {
        let start = self.locate(symbols)?;
        let deframed = deframe_from(symbols, start.payload_start, self.nrzi_initial_level)?;
        Ok((start, deframed))
    }
}

/// Corrupt the CRC of a message for negative tests and self-checks.
pub fn frame_with_bad_crc(message: &[u8], options: &FrameOptions) -> AisFrame {
    let mut data = message.to_vec();
    let crc = compute_crc16(message) ^ 0x0001;
    data.extend_from_slice(&crc_to_bits(crc));
    assemble_frame(&data, options)
}
