//! NRZI line coding
//!
//! A 0 toggles the line level, a 1 holds it. Encoder and decoder both start
//! from the same level, [`NRZI_INITIAL_LEVEL`] unless configured otherwise.

use crate::bits::BitSequence;

/// Line level assumed before the first coded bit.
pub const NRZI_INITIAL_LEVEL: u8 = 1;

/// Encode starting from [`NRZI_INITIAL_LEVEL`].
pub fn nrzi_encode(bits: &[u8]) -> BitSequence {
    nrzi_encode_from(bits, NRZI_INITIAL_LEVEL)
}

/// Decode starting from [`NRZI_INITIAL_LEVEL`].
pub fn nrzi_decode(symbols: &[u8]) -> BitSequence {
    nrzi_decode_from(symbols, NRZI_INITIAL_LEVEL)
}

pub fn nrzi_encode_from(bits: &[u8], initial_level: u8) -> BitSequence {
    let mut level = initial_level & 1;
    bits.iter()
        .map(|&bit| {
            if bit == 0 {
                level ^= 1;
            }
            level
        })
        .collect()
}

pub fn nrzi_decode_from(symbols: &[u8], initial_level: u8) -> BitSequence {
    let mut previous = initial_level & 1;
    symbols
        .iter()
        .map(|&symbol| {
            let symbol = symbol & 1;
            let bit = (symbol == previous) as u8;
            previous = symbol;
            bit
        })
        .collect()
}
