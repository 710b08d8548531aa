//! 6-bit ASCII armoring (ITU-R M.1371 / IEC 61162-1)
//!
//! Values 0-39 map to '0'..'W' (ASCII 48-87) and values 40-63 map to
//! '`'..'w' (ASCII 96-119). Payload bits are taken six at a time, MSB
//! first; a final partial group is zero-filled and the number of fill bits
//! is reported alongside the string.

use crate::bits::{push_bits, read_uint, BitSequence};
use crate::error::{AisError, Result};

/// Map a 6-bit value (0..=63) to its armor character.
pub fn sixbit_to_ascii(value: u8) -> char {
    let value = value & 0x3F;
    let code = if value < 40 { value + 48 } else { value + 56 };
    code as char
}

/// Map an armor character back to its 6-bit value.
pub fn ascii_to_sixbit(c: char) -> Option<u8> {
    match c {
        '0'..='W' => Some(c as u8 - 48),
        '`'..='w' => Some(c as u8 - 56),
        _ => None,
    }
}

/// Armor a bit sequence. Returns the payload string and the number of fill bits.
pub fn armor(bits: &[u8]) -> (String, u8) {
    let fill = ((6 - bits.len() % 6) % 6) as u8;
    let payload = bits
        .chunks(6)
        .map(|group| {
            // read_uint zero-fills past the end of a short final group
            sixbit_to_ascii(read_uint(group, 0, 6) as u8)
        })
        .collect();
    (payload, fill)
}

/// Recover the bits from an armored payload, dropping `fill_bits` trailing bits.
pub fn dearmor(payload: &str, fill_bits: u8) -> Result<BitSequence> {
    if fill_bits > 5 {
        return Err(AisError::Nmea(format!("fill bits {fill_bits} out of range 0-5")));
    }

    let mut bits = Vec::with_capacity(payload.len() * 6);
    for (position, character) in payload.chars().enumerate() {
        let value = ascii_to_sixbit(character)
            .ok_or(AisError::InvalidArmor { character, position })?;
        push_bits(&mut bits, value as u64, 6);
    }

    let fill = fill_bits as usize;
    if fill > bits.len() {
        return Err(AisError::Nmea(format!(
            "{fill} fill bits on a {}-bit payload",
            bits.len()
        )));
    }
    bits.truncate(bits.len() - fill);
    Ok(bits)
}
