//! AIS position report codec (message types 1, 2 and 3)
//!
//! Packs a [`VesselState`] into the 168-bit Class A position report and
//! back. Fields are MSB-first; longitude and latitude are two's complement
//! in 1/10000 minute units.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bits::{push_bits, push_signed, read_int, read_uint, BitSequence};
use crate::error::{AisError, CorruptKind, Result};

/// Length of a Type 1/2/3 message in bits.
pub const POSITION_REPORT_BITS: usize = 168;

/// Scale between degrees and the lat/lon fields (1/10000 minute).
pub const LATLON_SCALE: f64 = 600_000.0;

pub const MMSI_MIN: u32 = 100_000_000;
pub const MMSI_MAX: u32 = 999_999_999;
pub const LATITUDE_NOT_AVAILABLE: f64 = 91.0;
pub const LONGITUDE_NOT_AVAILABLE: f64 = 181.0;
pub const SOG_NOT_AVAILABLE: f64 = 102.3;
pub const COG_NOT_AVAILABLE: f64 = 360.0;
pub const HEADING_NOT_AVAILABLE: u16 = 511;
pub const ROT_NOT_AVAILABLE: i8 = -128;
pub const TIMESTAMP_NOT_AVAILABLE: u8 = 60;
/// Largest timestamp field value; 61..=63 flag the positioning system state
pub const TIMESTAMP_MAX: u8 = 63;

const SOG_MAX_RAW: u64 = 1022;
const SOG_NOT_AVAILABLE_RAW: u64 = 1023;
const COG_NOT_AVAILABLE_RAW: u64 = 3600;

/// Snapshot of a vessel's dynamic state, as carried by a position report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VesselState {
    /// Maritime Mobile Service Identity
    pub mmsi: u32,
    /// Degrees, positive north (91 = not available)
    pub latitude: f64,
    /// Degrees, positive east (181 = not available)
    pub longitude: f64,
    /// Knots, 0.1 resolution (102.3 = not available)
    pub speed_over_ground: f64,
    /// Degrees, 0.1 resolution (360 = not available)
    pub course_over_ground: f64,
    /// Degrees (511 = not available)
    pub true_heading: u16,
    /// Navigation status, 0..=15
    pub nav_status: u8,
    /// UTC second of the report (60 = not available)
    pub timestamp: u8,
}

impl VesselState {
    /// A vessel at a position with every other field "not available".
    pub fn new(mmsi: u32, latitude: f64, longitude: f64) -> Self {
        Self {
            mmsi,
            latitude,
            longitude,
            speed_over_ground: 0.0,
            course_over_ground: COG_NOT_AVAILABLE,
            true_heading: HEADING_NOT_AVAILABLE,
            nav_status: 15,
            timestamp: 0,
        }
    }

    /// Check every field against its encodable range.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(AisError::Configuration(msg));

        if !(MMSI_MIN..=MMSI_MAX).contains(&self.mmsi) {
            return err(format!("MMSI {} is not a 9-digit identity", self.mmsi));
        }
        if !(self.latitude.is_finite()
            && ((-90.0..=90.0).contains(&self.latitude) || self.latitude == LATITUDE_NOT_AVAILABLE))
        {
            return err(format!("latitude {} out of range", self.latitude));
        }
        if !(self.longitude.is_finite()
            && ((-180.0..=180.0).contains(&self.longitude)
                || self.longitude == LONGITUDE_NOT_AVAILABLE))
        {
            return err(format!("longitude {} out of range", self.longitude));
        }
        if !(self.speed_over_ground.is_finite()
            && self.speed_over_ground >= 0.0
            && (self.speed_over_ground * 10.0).round() <= SOG_NOT_AVAILABLE_RAW as f64)
        {
            return err(format!("speed over ground {} out of range", self.speed_over_ground));
        }
        if !(self.course_over_ground.is_finite()
            && (0.0..=COG_NOT_AVAILABLE).contains(&self.course_over_ground))
        {
            return err(format!("course over ground {} out of range", self.course_over_ground));
        }
        if self.true_heading > 359 && self.true_heading != HEADING_NOT_AVAILABLE {
            return err(format!("true heading {} out of range", self.true_heading));
        }
        if self.nav_status > 15 {
            return err(format!("navigation status {} out of range", self.nav_status));
        }
        if self.timestamp > TIMESTAMP_MAX {
            return err(format!("timestamp {} out of range", self.timestamp));
        }
        Ok(())
    }
}

/// Every field of a Type 1/2/3 message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// 1, 2 or 3
    pub message_type: u8,
    pub repeat: u8,
    pub vessel: VesselState,
    /// Raw ROT field (-128 = not available)
    pub rate_of_turn: i8,
    pub position_accuracy: bool,
    pub maneuver: u8,
    pub raim: bool,
    /// SOTDMA/ITDMA communication state
    pub radio_status: u32,
}

impl PositionReport {
    /// A Type 1 report with the defaults used for transmission.
    pub fn new(vessel: VesselState) -> Self {
        Self {
            message_type: 1,
            repeat: 0,
            vessel,
            rate_of_turn: ROT_NOT_AVAILABLE,
            position_accuracy: false,
            maneuver: 0,
            raim: false,
            radio_status: 0,
        }
    }

    /// Pack into exactly [`POSITION_REPORT_BITS`] bits. Field values are
    /// written as they are, so a decoded report re-encodes bit for bit.
    pub fn to_bits(&self) -> Result<BitSequence> {
        if !(1..=3).contains(&self.message_type) {
            return Err(AisError::UnsupportedMessageType(self.message_type));
        }
        self.vessel.validate()?;
        let v = &self.vessel;

        let sog = (v.speed_over_ground * 10.0).round() as u64;
        let cog = if v.course_over_ground >= COG_NOT_AVAILABLE {
            COG_NOT_AVAILABLE_RAW
        } else {
            ((v.course_over_ground * 10.0).round() as u64).min(COG_NOT_AVAILABLE_RAW - 1)
        };
        let lon = (v.longitude * LATLON_SCALE).round() as i64;
        let lat = (v.latitude * LATLON_SCALE).round() as i64;

        let mut bits = Vec::with_capacity(POSITION_REPORT_BITS);
        push_bits(&mut bits, self.message_type as u64, 6);
        push_bits(&mut bits, self.repeat as u64, 2);
        push_bits(&mut bits, v.mmsi as u64, 30);
        push_bits(&mut bits, v.nav_status as u64, 4);
        push_signed(&mut bits, self.rate_of_turn as i64, 8);
        push_bits(&mut bits, sog, 10);
        push_bits(&mut bits, self.position_accuracy as u64, 1);
        push_signed(&mut bits, lon, 28);
        push_signed(&mut bits, lat, 27);
        push_bits(&mut bits, cog, 12);
        push_bits(&mut bits, v.true_heading as u64, 9);
        push_bits(&mut bits, v.timestamp as u64, 6);
        push_bits(&mut bits, self.maneuver as u64, 2);
        push_bits(&mut bits, 0, 3); // spare
        push_bits(&mut bits, self.raim as u64, 1);
        push_bits(&mut bits, self.radio_status as u64, 19);

        debug_assert_eq!(bits.len(), POSITION_REPORT_BITS);
        Ok(bits)
    }

    /// Unpack a 168-bit Type 1/2/3 message.
    pub fn from_bits(bits: &[u8]) -> Result<Self> {
        if bits.len() < 6 {
            return Err(AisError::FrameTooShort {
                len: bits.len(),
                min: POSITION_REPORT_BITS,
            });
        }
        let message_type = read_uint(bits, 0, 6) as u8;
        if !(1..=3).contains(&message_type) {
            return Err(AisError::UnsupportedMessageType(message_type));
        }
        if bits.len() < POSITION_REPORT_BITS {
            return Err(AisError::FrameTooShort {
                len: bits.len(),
                min: POSITION_REPORT_BITS,
            });
        }
        if bits.len() > POSITION_REPORT_BITS {
            return Err(AisError::FrameCorrupt(CorruptKind::PayloadLength {
                len: bits.len(),
            }));
        }

        let vessel = VesselState {
            mmsi: read_uint(bits, 8, 30) as u32,
            nav_status: read_uint(bits, 38, 4) as u8,
            speed_over_ground: read_uint(bits, 50, 10) as f64 / 10.0,
            longitude: read_int(bits, 61, 28) as f64 / LATLON_SCALE,
            latitude: read_int(bits, 89, 27) as f64 / LATLON_SCALE,
            course_over_ground: read_uint(bits, 116, 12) as f64 / 10.0,
            true_heading: read_uint(bits, 128, 9) as u16,
            timestamp: read_uint(bits, 137, 6) as u8,
        };

        Ok(Self {
            message_type,
            repeat: read_uint(bits, 6, 2) as u8,
            vessel,
            rate_of_turn: read_int(bits, 42, 8) as i8,
            position_accuracy: bits[60] != 0,
            maneuver: read_uint(bits, 143, 2) as u8,
            raim: bits[148] != 0,
            radio_status: read_uint(bits, 149, 19) as u32,
        })
    }
}

/// Encode a vessel as a Type 1 position report.
///
/// Speed is clamped to 102.2 knots and the timestamp taken modulo 60, so
/// a live vessel state never turns into a "not available" field.
pub fn encode_position_report(vessel: &VesselState) -> Result<BitSequence> {
    let mut vessel = *vessel;
    if vessel.speed_over_ground.is_finite() {
        vessel.speed_over_ground = vessel.speed_over_ground.min(SOG_MAX_RAW as f64 / 10.0);
    }
    vessel.timestamp %= 60;
    PositionReport::new(vessel).to_bits()
}

/// Decode a 168-bit Type 1/2/3 message into the vessel state it carries.
pub fn decode_position_report(bits: &[u8]) -> Result<VesselState> {
    PositionReport::from_bits(bits).map(|report| report.vessel)
}

/// Human readable navigation status.
pub fn nav_status_str(status: u8) -> &'static str {
    match status {
        0 => "Under way using engine",
        1 => "At anchor",
        2 => "Not under command",
        3 => "Restricted manoeuverability",
        4 => "Constrained by her draught",
        5 => "Moored",
        6 => "Aground",
        7 => "Engaged in fishing",
        8 => "Under way sailing",
        9..=13 => "Reserved",
        14 => "AIS-SART active",
        15 => "Not defined",
        _ => "Unknown",
    }
}

impl fmt::Display for PositionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.vessel;
        writeln!(f, "Type {}: Position Report Class A", self.message_type)?;
        writeln!(f, "  MMSI           : {:09}", v.mmsi)?;
        writeln!(f, "  Status         : {}", nav_status_str(v.nav_status))?;
        if v.latitude == LATITUDE_NOT_AVAILABLE || v.longitude == LONGITUDE_NOT_AVAILABLE {
            writeln!(f, "  Position       : not available")?;
        } else {
            writeln!(f, "  Latitude       : {:.6}", v.latitude)?;
            writeln!(f, "  Longitude      : {:.6}", v.longitude)?;
        }
        writeln!(f, "  Speed          : {:.1} kn", v.speed_over_ground)?;
        if v.course_over_ground >= COG_NOT_AVAILABLE {
            writeln!(f, "  Course         : not available")?;
        } else {
            writeln!(f, "  Course         : {:.1}", v.course_over_ground)?;
        }
        if v.true_heading == HEADING_NOT_AVAILABLE {
            writeln!(f, "  Heading        : not available")?;
        } else {
            writeln!(f, "  Heading        : {}", v.true_heading)?;
        }
        writeln!(f, "  UTC second     : {}", v.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armor::dearmor;

    fn sample_vessel() -> VesselState {
        VesselState {
            mmsi: 123456789,
            latitude: 37.7749,
            longitude: -122.4194,
            speed_over_ground: 12.5,
            course_over_ground: 45.0,
            true_heading: 45,
            nav_status: 0,
            timestamp: 30,
        }
    }

    #[test]
    fn test_encode_length_and_header() {
        let bits = encode_position_report(&sample_vessel()).unwrap();
        assert_eq!(bits.len(), POSITION_REPORT_BITS);
        assert_eq!(read_uint(&bits, 0, 6), 1);
        assert_eq!(read_uint(&bits, 6, 2), 0);
        assert_eq!(read_uint(&bits, 8, 30), 123456789);
        // ROT not available
        assert_eq!(read_uint(&bits, 42, 8), 128);
        assert_eq!(read_uint(&bits, 50, 10), 125);
    }

    #[test]
    fn test_negative_longitude_twos_complement() {
        let bits = encode_position_report(&sample_vessel()).unwrap();
        // top bit of the 28-bit longitude field is the sign
        assert_eq!(bits[61], 1);
        assert_eq!(read_int(&bits, 61, 28), (-122.4194f64 * LATLON_SCALE).round() as i64);
        assert_eq!(bits[89], 0);
    }

    #[test]
    fn test_round_trip() {
        let vessel = sample_vessel();
        let decoded = decode_position_report(&encode_position_report(&vessel).unwrap()).unwrap();
        assert_eq!(decoded.mmsi, vessel.mmsi);
        assert!((decoded.latitude - vessel.latitude).abs() <= 1.0 / LATLON_SCALE);
        assert!((decoded.longitude - vessel.longitude).abs() <= 1.0 / LATLON_SCALE);
        assert!((decoded.speed_over_ground - vessel.speed_over_ground).abs() <= 0.1);
        assert_eq!(decoded.course_over_ground, 45.0);
        assert_eq!(decoded.true_heading, 45);
        assert_eq!(decoded.nav_status, 0);
        assert_eq!(decoded.timestamp, 30);
    }

    #[test]
    fn test_southern_hemisphere_round_trip() {
        let vessel = VesselState {
            latitude: -33.8568,
            longitude: 151.2153,
            ..sample_vessel()
        };
        let decoded = decode_position_report(&encode_position_report(&vessel).unwrap()).unwrap();
        assert!((decoded.latitude - vessel.latitude).abs() <= 1.0 / LATLON_SCALE);
        assert!((decoded.longitude - vessel.longitude).abs() <= 1.0 / LATLON_SCALE);
    }

    #[test]
    fn test_speed_clamped_and_sentinels() {
        let vessel = VesselState {
            speed_over_ground: 150.0,
            course_over_ground: COG_NOT_AVAILABLE,
            true_heading: HEADING_NOT_AVAILABLE,
            timestamp: 75,
            ..sample_vessel()
        };
        let bits = encode_position_report(&vessel).unwrap();
        assert_eq!(read_uint(&bits, 50, 10), 1022);
        assert_eq!(read_uint(&bits, 116, 12), 3600);
        assert_eq!(read_uint(&bits, 128, 9), 511);
        assert_eq!(read_uint(&bits, 137, 6), 15);
    }

    #[test]
    fn test_unavailable_fields_reencode_exactly() {
        let mut bits = encode_position_report(&sample_vessel()).unwrap();
        for (i, bit) in (0..10).map(|i| (SOG_NOT_AVAILABLE_RAW >> (9 - i)) & 1).enumerate() {
            bits[50 + i] = bit as u8;
        }
        for timestamp in [60u64, 61, 63] {
            for i in 0..6 {
                bits[137 + i] = ((timestamp >> (5 - i)) & 1) as u8;
            }
            let report = PositionReport::from_bits(&bits).unwrap();
            assert_eq!(report.vessel.speed_over_ground, SOG_NOT_AVAILABLE);
            assert_eq!(report.vessel.timestamp as u64, timestamp);
            assert_eq!(report.to_bits().unwrap(), bits);
        }
    }

    #[test]
    fn test_full_record_keeps_sentinels() {
        let report = PositionReport::new(VesselState {
            speed_over_ground: SOG_NOT_AVAILABLE,
            timestamp: TIMESTAMP_NOT_AVAILABLE,
            ..sample_vessel()
        });
        let bits = report.to_bits().unwrap();
        assert_eq!(read_uint(&bits, 50, 10), 1023);
        assert_eq!(read_uint(&bits, 137, 6), 60);

        // the vessel path still folds them into live values
        let bits = encode_position_report(&report.vessel).unwrap();
        assert_eq!(read_uint(&bits, 50, 10), 1022);
        assert_eq!(read_uint(&bits, 137, 6), 0);
    }

    #[test]
    fn test_validation_errors() {
        let bad = [
            VesselState { mmsi: 12345, ..sample_vessel() },
            VesselState { latitude: 90.5, ..sample_vessel() },
            VesselState { longitude: -181.0, ..sample_vessel() },
            VesselState { speed_over_ground: -1.0, ..sample_vessel() },
            VesselState { course_over_ground: 361.0, ..sample_vessel() },
            VesselState { true_heading: 360, ..sample_vessel() },
            VesselState { nav_status: 16, ..sample_vessel() },
            VesselState { speed_over_ground: f64::INFINITY, ..sample_vessel() },
            VesselState { latitude: f64::NAN, ..sample_vessel() },
        ];
        for vessel in bad {
            assert!(
                matches!(encode_position_report(&vessel), Err(AisError::Configuration(_))),
                "{vessel:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_rejects_short_and_other_types() {
        let bits = encode_position_report(&sample_vessel()).unwrap();
        assert!(matches!(
            decode_position_report(&bits[..100]),
            Err(AisError::FrameTooShort { len: 100, min: 168 })
        ));

        let mut type5 = bits.clone();
        type5[3] = 1; // type 1 -> type 5
        assert_eq!(
            decode_position_report(&type5),
            Err(AisError::UnsupportedMessageType(5))
        );
    }

    #[test]
    fn test_known_payload_fields() {
        let bits = dearmor("15MvlfP000G?n@@K>OW`4?vN0<0=", 0).unwrap();
        let report = PositionReport::from_bits(&bits).unwrap();
        assert_eq!(report.message_type, 1);
        assert_eq!(report.vessel.mmsi, 366982330);
        assert!((report.vessel.latitude - 47.581703).abs() < 1e-5);
        assert!((report.vessel.longitude - -122.367133).abs() < 1e-5);
        assert_eq!(report.vessel.course_over_ground, 206.4);
        assert_eq!(report.vessel.true_heading, HEADING_NOT_AVAILABLE);
        assert_eq!(report.vessel.timestamp, 15);
        assert_eq!(report.radio_status, 49165);
        // every field survives a re-encode
        assert_eq!(report.to_bits().unwrap(), bits);
    }

    #[test]
    fn test_display() {
        let report = PositionReport::new(sample_vessel());
        let text = report.to_string();
        assert!(text.contains("123456789"));
        assert!(text.contains("Under way using engine"));
    }
}
