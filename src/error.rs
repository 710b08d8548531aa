//! Error taxonomy for the AIS codec and modem

use thiserror::Error;

/// Why a candidate frame was rejected as corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptKind {
    /// CRC carried in the frame does not match the one computed over the payload
    #[error("CRC mismatch (frame {expected:#06x}, computed {computed:#06x})")]
    CrcMismatch { expected: u16, computed: u16 },
    /// A 1 followed five consecutive 1s where a stuffed 0 was required
    #[error("bit stuffing violation at bit {position}")]
    StuffingViolation { position: usize },
    /// Destuffed payload is not a whole number of bytes, or has the wrong size
    #[error("bad payload length {len}")]
    PayloadLength { len: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AisError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Frame too short: {len} bits, need at least {min}")]
    FrameTooShort { len: usize, min: usize },

    #[error("HDLC flag not found")]
    FlagNotFound,

    #[error("Training sequence acquisition failed (best correlation {best_score:.3})")]
    AcquisitionFailed { best_score: f32 },

    #[error("Frame corrupt: {0}")]
    FrameCorrupt(CorruptKind),

    #[error("Protocol inconsistency: {0}")]
    ProtocolInconsistency(String),

    #[error("Unsupported AIS message type {0}")]
    UnsupportedMessageType(u8),

    #[error("Invalid 6-bit armor character {character:?} at position {position}")]
    InvalidArmor { character: char, position: usize },

    #[error("NMEA error: {0}")]
    Nmea(String),
}

impl AisError {
    /// Conditions a receive loop discards before moving on to the next candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AisError::FrameTooShort { .. }
                | AisError::FlagNotFound
                | AisError::AcquisitionFailed { .. }
                | AisError::FrameCorrupt(_)
                | AisError::UnsupportedMessageType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(AisError::FlagNotFound.is_recoverable());
        assert!(AisError::AcquisitionFailed { best_score: 0.1 }.is_recoverable());
        assert!(AisError::FrameCorrupt(CorruptKind::PayloadLength { len: 3 }).is_recoverable());
        assert!(!AisError::Configuration("bad".into()).is_recoverable());
        assert!(!AisError::ProtocolInconsistency("bug".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let e = AisError::FrameCorrupt(CorruptKind::CrcMismatch {
            expected: 0x1234,
            computed: 0xabcd,
        });
        assert_eq!(
            e.to_string(),
            "Frame corrupt: CRC mismatch (frame 0x1234, computed 0xabcd)"
        );
        assert_eq!(
            CorruptKind::StuffingViolation { position: 17 }.to_string(),
            "bit stuffing violation at bit 17"
        );
        assert_eq!(CorruptKind::PayloadLength { len: 3 }.to_string(), "bad payload length 3");
    }
}
