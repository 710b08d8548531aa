//! CRC-16 implementation for AIS frames
//!
//! CRC-16-CCITT, polynomial 0x1021, initial value 0xFFFF, final XOR 0xFFFF,
//! processed MSB-first. The bit-oriented routine is the reference: it runs a
//! 16-bit shift register, XORing each data bit into the register MSB. The
//! table-driven byte routine must give the same answer for byte-aligned input.
//!
//! The 16 CRC bits are appended MSB-first after the message bits.

use crate::error::{AisError, CorruptKind, Result};

pub const CRC16_POLY: u16 = 0x1021;
pub const CRC16_INIT: u16 = 0xFFFF;
pub const CRC16_XOROUT: u16 = 0xFFFF;

/// Number of CRC bits appended to a message.
pub const CRC_BITS: usize = 16;

/// Byte-at-a-time table for the MSB-first register.
const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Compute the CRC over a bit sequence, one bit at a time.
pub fn compute_crc16(bits: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &bit in bits {
        let feedback = ((crc >> 15) as u8 ^ bit) & 1;
        crc <<= 1;
        if feedback == 1 {
            crc ^= CRC16_POLY;
        }
    }
    crc ^ CRC16_XOROUT
}

/// Compute the CRC over bytes (MSB of each byte first) using the lookup table.
pub fn compute_crc16_bytes(bytes: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in bytes {
        let idx = ((crc >> 8) ^ byte as u16) & 0xFF;
        crc = (crc << 8) ^ CRC16_TABLE[idx as usize];
    }
    crc ^ CRC16_XOROUT
}

/// Compute the CRC with both routines and insist they agree.
///
/// Input that is not byte-aligned only runs the bit routine. Disagreement is
/// reported as [`AisError::ProtocolInconsistency`].
pub fn crc16_cross_check(bits: &[u8]) -> Result<u16> {
    let by_bit = compute_crc16(bits);
    if bits.len() % 8 == 0 {
        let bytes = crate::bits::bits_to_bytes_msb(bits)?;
        let by_byte = compute_crc16_bytes(&bytes);
        if by_byte != by_bit {
            return Err(AisError::ProtocolInconsistency(format!(
                "bit-level CRC {by_bit:#06x} disagrees with byte-level CRC {by_byte:#06x}"
            )));
        }
    }
    Ok(by_bit)
}

/// Expand a CRC value into its 16 transmitted bits, MSB first.
pub fn crc_to_bits(crc: u16) -> [u8; CRC_BITS] {
    let mut bits = [0u8; CRC_BITS];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = ((crc >> (15 - i)) & 1) as u8;
    }
    bits
}

/// Append the CRC of `bits` to the sequence in place.
pub fn append_crc(bits: &mut Vec<u8>) {
    let crc = compute_crc16(bits);
    bits.extend_from_slice(&crc_to_bits(crc));
}

/// Extract the CRC from the last 16 bits of a message.
pub fn extract_crc(bits: &[u8]) -> Option<u16> {
    if bits.len() < CRC_BITS {
        return None;
    }
    let tail = &bits[bits.len() - CRC_BITS..];
    Some(crate::bits::read_uint(tail, 0, CRC_BITS) as u16)
}

/// Verify a message carrying its CRC in the last 16 bits and return the
/// message bits without it.
pub fn verify_crc(bits_with_crc: &[u8]) -> Result<&[u8]> {
    let expected = extract_crc(bits_with_crc).ok_or(AisError::FrameTooShort {
        len: bits_with_crc.len(),
        min: CRC_BITS,
    })?;
    let data = &bits_with_crc[..bits_with_crc.len() - CRC_BITS];
    let computed = compute_crc16(data);
    if computed != expected {
        return Err(AisError::FrameCorrupt(CorruptKind::CrcMismatch {
            expected,
            computed,
        }));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{bytes_to_bits_msb, from_str01};

    #[test]
    fn test_known_check_value() {
        // CRC-16/GENIBUS (0x1021, init/xorout 0xFFFF, unreflected) of "123456789"
        assert_eq!(compute_crc16_bytes(b"123456789"), 0xD64E);
        assert_eq!(compute_crc16(&bytes_to_bits_msb(b"123456789")), 0xD64E);
    }

    #[test]
    fn test_bit_and_byte_routines_agree() {
        for len in 0..64usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            let bits = bytes_to_bits_msb(&data);
            assert_eq!(compute_crc16(&bits), compute_crc16_bytes(&data), "len {len}");
            assert_eq!(crc16_cross_check(&bits).unwrap(), compute_crc16(&bits));
        }
    }

    #[test]
    fn test_cross_check_unaligned_input() {
        let bits = from_str01("101");
        assert_eq!(crc16_cross_check(&bits).unwrap(), compute_crc16(&bits));
    }

    #[test]
    fn test_deterministic() {
        let bits = from_str01("000001000001011101011111011010101");
        assert_eq!(compute_crc16(&bits), compute_crc16(&bits));
    }

    #[test]
    fn test_detects_every_single_bit_error() {
        let bits: Vec<u8> = (0..168).map(|i| ((i * 7 + i / 3) % 2) as u8).collect();
        let reference = compute_crc16(&bits);
        for i in 0..bits.len() {
            let mut flipped = bits.clone();
            flipped[i] ^= 1;
            assert_ne!(compute_crc16(&flipped), reference, "bit {i} flip undetected");
        }
    }

    #[test]
    fn test_append_and_verify() {
        let mut bits = from_str01("0000010000010111010111110110101");
        let original = bits.clone();
        append_crc(&mut bits);
        assert_eq!(bits.len(), original.len() + CRC_BITS);
        assert_eq!(verify_crc(&bits).unwrap(), &original[..]);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut bits = from_str01("1100101011110000110010101111");
        append_crc(&mut bits);
        bits[3] ^= 1;
        assert!(matches!(
            verify_crc(&bits),
            Err(AisError::FrameCorrupt(CorruptKind::CrcMismatch { .. }))
        ));
    }

    #[test]
    fn test_crc_bits_msb_first() {
        assert_eq!(crc_to_bits(0x8001)[0], 1);
        assert_eq!(crc_to_bits(0x8001)[15], 1);
        assert_eq!(crc_to_bits(0x8001)[1..15].iter().sum::<u8>(), 0);
        assert_eq!(extract_crc(&crc_to_bits(0xBEEF)), Some(0xBEEF));
    }
}
