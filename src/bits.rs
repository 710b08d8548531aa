//! Bit sequence helpers
//!
//! Every codec stage passes bits around as `Vec<u8>` holding one 0/1 value
//! per element, first-transmitted bit first. Conversions to and from bytes
//! state their ordering (MSB-first or LSB-first) in the function name.

use crate::error::{AisError, Result};

/// Ordered sequence of single-bit values (each element 0 or 1).
pub type BitSequence = Vec<u8>;

/// Append the low `width` bits of `value`, MSB first.
pub fn push_bits(out: &mut BitSequence, value: u64, width: usize) {
    debug_assert!(width <= 64);
    for i in (0..width).rev() {
        out.push(((value >> i) & 1) as u8);
    }
}

/// Append a signed value as a `width`-bit two's complement field.
pub fn push_signed(out: &mut BitSequence, value: i64, width: usize) {
    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    push_bits(out, (value as u64) & mask, width);
}

/// Read an unsigned MSB-first field. Bits past the end read as zero.
pub fn read_uint(bits: &[u8], start: usize, width: usize) -> u64 {
    let mut value = 0u64;
    for i in 0..width {
        value <<= 1;
        if bits.get(start + i).copied().unwrap_or(0) != 0 {
            value |= 1;
        }
    }
    value
}

/// Read a two's complement MSB-first field.
///
/// If the top bit is set the field is negative and `2^width` is subtracted.
pub fn read_int(bits: &[u8], start: usize, width: usize) -> i64 {
    let raw = read_uint(bits, start, width) as i64;
    if width > 0 && width < 64 && (raw >> (width - 1)) & 1 == 1 {
        raw - (1i64 << width)
    } else {
        raw
    }
}

/// Pack bits into bytes, MSB of each byte first.
///
/// The length must be a multiple of 8; use [`bits_to_bytes_padded`] when
/// trailing zero-fill is acceptable.
pub fn bits_to_bytes_msb(bits: &[u8]) -> Result<Vec<u8>> {
    if bits.len() % 8 != 0 {
        return Err(AisError::Configuration(format!(
            "bit length {} is not a multiple of 8",
            bits.len()
        )));
    }
    Ok(bits_to_bytes_padded(bits))
}

/// Pack bits into bytes MSB-first, zero-filling the final partial byte.
pub fn bits_to_bytes_padded(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &b)| byte | ((b & 1) << (7 - i)))
        })
        .collect()
}

/// Unpack bytes into bits, MSB of each byte first.
pub fn bytes_to_bits_msb(bytes: &[u8]) -> BitSequence {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        push_bits(&mut bits, byte as u64, 8);
    }
    bits
}

/// Unpack bytes into bits, LSB of each byte first (HDLC wire order).
pub fn bytes_to_bits_lsb(bytes: &[u8]) -> BitSequence {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte >> i) & 1);
        }
    }
    bits
}

/// Pack bits into bytes, LSB of each byte first. Length must be a multiple of 8.
pub fn bits_to_bytes_lsb(bits: &[u8]) -> Result<Vec<u8>> {
    if bits.len() % 8 != 0 {
        return Err(AisError::Configuration(format!(
            "bit length {} is not a multiple of 8",
            bits.len()
        )));
    }
    Ok(bits
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &b)| byte | ((b & 1) << i))
        })
        .collect())
}

/// Number of positions where `a` and `b` agree, over their common length.
pub fn agreement(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x == y).count()
}

/// Length of the longest run of consecutive 1 bits.
pub fn longest_run_of_ones(bits: &[u8]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for &b in bits {
        if b != 0 {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

/// Parse a string of '0'/'1' characters, ignoring anything else.
pub fn from_str01(s: &str) -> BitSequence {
    s.chars()
        .filter_map(|c| match c {
            '0' => Some(0),
            '1' => Some(1),
            _ => None,
        })
        .collect()
}

/// Render bits as a string of '0'/'1' characters.
pub fn to_str01(bits: &[u8]) -> String {
    bits.iter().map(|&b| if b != 0 { '1' } else { '0' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_uint() {
        let mut bits = Vec::new();
        push_bits(&mut bits, 0b101, 3);
        push_bits(&mut bits, 366982330, 30);
        assert_eq!(&bits[..3], &[1, 0, 1]);
        assert_eq!(read_uint(&bits, 0, 3), 5);
        assert_eq!(read_uint(&bits, 3, 30), 366982330);
    }

    #[test]
    fn test_signed_fields() {
        let mut bits = Vec::new();
        push_signed(&mut bits, -1, 8);
        assert_eq!(bits, vec![1; 8]);
        assert_eq!(read_int(&bits, 0, 8), -1);

        let mut bits = Vec::new();
        push_signed(&mut bits, -73_451_640, 28);
        assert_eq!(bits.len(), 28);
        assert_eq!(read_int(&bits, 0, 28), -73_451_640);
        assert_eq!(read_uint(&bits, 0, 28), (1 << 28) - 73_451_640);
    }

    #[test]
    fn test_read_past_end_is_zero() {
        let bits = from_str01("11");
        assert_eq!(read_uint(&bits, 0, 4), 0b1100);
    }

    #[test]
    fn test_byte_conversion_msb() {
        let bits = from_str01("01111110 10000001");
        assert_eq!(bits_to_bytes_msb(&bits).unwrap(), vec![0x7E, 0x81]);
        assert_eq!(bytes_to_bits_msb(&[0x7E, 0x81]), bits);
    }

    #[test]
    fn test_byte_conversion_rejects_partial_byte() {
        let bits = from_str01("0111111");
        assert!(matches!(
            bits_to_bytes_msb(&bits),
            Err(AisError::Configuration(_))
        ));
        // Explicit zero-fill variant pads the last byte
        assert_eq!(bits_to_bytes_padded(&bits), vec![0x7E]);
    }

    #[test]
    fn test_byte_conversion_lsb() {
        let bits = bytes_to_bits_lsb(&[0x01, 0x80]);
        assert_eq!(to_str01(&bits), "1000000000000001");
        assert_eq!(bits_to_bytes_lsb(&bits).unwrap(), vec![0x01, 0x80]);
    }

    #[test]
    fn test_agreement_and_runs() {
        assert_eq!(agreement(&[0, 1, 1, 0], &[0, 1, 0, 0]), 3);
        assert_eq!(longest_run_of_ones(&from_str01("0111011111010")), 5);
        assert_eq!(longest_run_of_ones(&[]), 0);
    }
}
