//! HDLC framing primitives: training sequence, flags, bit stuffing

use crate::bits::{agreement, BitSequence};
use crate::error::{AisError, CorruptKind, Result};

/// Training sequence length in bits.
pub const TRAINING_BITS: usize = 24;
/// HDLC flag length in bits.
pub const FLAG_BITS: usize = 8;
/// The HDLC flag 0x7E as transmitted.
pub const FLAG: [u8; FLAG_BITS] = [0, 1, 1, 1, 1, 1, 1, 0];
/// Consecutive 1s after which a 0 is stuffed.
const STUFF_AFTER_ONES: usize = 5;

/// 24 bits alternating 0/1, starting with 0.
pub fn training_sequence() -> BitSequence {
    (0..TRAINING_BITS).map(|i| (i % 2) as u8).collect()
}

/// Insert a 0 after every run of five consecutive 1s.
pub fn bit_stuff(bits: &[u8]) -> BitSequence {
    let mut output = Vec::with_capacity(bits.len() + bits.len() / STUFF_AFTER_ONES);
    let mut ones = 0;

    for &bit in bits {
        output.push(bit);
        if bit != 0 {
            ones += 1;
            if ones == STUFF_AFTER_ONES {
                output.push(0);
                ones = 0;
            }
        } else {
            ones = 0;
        }
    }

    output
}

/// Remove stuffed 0s.
///
/// A 1 directly after five 1s means the region contained a flag or abort
/// sequence, which is reported as a stuffing violation rather than skipped.
pub fn bit_destuff(bits: &[u8]) -> Result<BitSequence> {
    let mut output = Vec::with_capacity(bits.len());
    let mut ones = 0;

    for (position, &bit) in bits.iter().enumerate() {
        if ones == STUFF_AFTER_ONES {
            if bit != 0 {
                return Err(AisError::FrameCorrupt(CorruptKind::StuffingViolation {
                    position,
                }));
            }
            // stuffed zero
            ones = 0;
            continue;
        }

        output.push(bit);
        if bit != 0 {
            ones += 1;
        } else {
            ones = 0;
        }
    }

    Ok(output)
}

/// How strictly a flag (or training) pattern has to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMatch {
    /// All 8 bits must agree
    Exact,
    /// At least `min_agreement` of 8 bits must agree (noisy symbol streams)
    Fuzzy { min_agreement: usize },
}

impl FlagMatch {
    fn required(self) -> usize {
        match self {
            FlagMatch::Exact => FLAG_BITS,
            FlagMatch::Fuzzy { min_agreement } => min_agreement.min(FLAG_BITS),
        }
    }

    /// Whether the 8 bits at `pos` count as a flag under this policy.
    pub fn matches_at(self, bits: &[u8], pos: usize) -> bool {
        flag_agreement(bits, pos).is_some_and(|n| n >= self.required())
    }
}

/// Number of bits agreeing with the flag at `pos`, or `None` if fewer than 8
/// bits remain.
pub fn flag_agreement(bits: &[u8], pos: usize) -> Option<usize> {
    let window = bits.get(pos..pos + FLAG_BITS)?;
    Some(agreement(window, &FLAG))
}

/// Scan for the first flag at or after `from`.
pub fn find_flag(bits: &[u8], from: usize, policy: FlagMatch) -> Option<usize> {
    if bits.len() < FLAG_BITS {
        return None;
    }
    (from..=bits.len() - FLAG_BITS).find(|&pos| policy.matches_at(bits, pos))
}
