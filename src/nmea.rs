//! `!AIVDM` / `!AIVDO` sentence adapter
//!
//! Only single-fragment sentences are handled. Bits go in and out through
//! [`crate::armor`].

use std::fmt;
use std::str::FromStr;

use crate::armor::{armor, dearmor};
use crate::bits::BitSequence;
use crate::error::{AisError, Result};

/// XOR of every byte between the leading `!` and the `*`.
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSentence {
    /// Talker and sentence formatter, e.g. "AIVDM"
    pub formatter: String,
    pub sequence_id: Option<u8>,
    /// Radio channel, 'A' or 'B'
    pub channel: Option<char>,
    pub payload: String,
    pub fill_bits: u8,
}

impl NmeaSentence {
    /// Wrap message bits as a received (`AIVDM`) sentence.
    pub fn from_bits(bits: &[u8], channel: Option<char>) -> Self {
        let (payload, fill_bits) = armor(bits);
        Self {
            formatter: "AIVDM".to_string(),
            sequence_id: None,
            channel,
            payload,
            fill_bits,
        }
    }

    /// Message bits carried by the payload.
    pub fn to_bits(&self) -> Result<BitSequence> {
        dearmor(&self.payload, self.fill_bits)
    }

    /// Own-ship report (`VDO`) rather than one received from another station.
    pub fn is_own_ship(&self) -> bool {
        self.formatter.ends_with("VDO")
    }

    fn body(&self) -> String {
        let seq = self.sequence_id.map(|s| s.to_string()).unwrap_or_default();
        let channel = self.channel.map(String::from).unwrap_or_default();
        format!(
            "{},1,1,{},{},{},{}",
            self.formatter, seq, channel, self.payload, self.fill_bits
        )
    }
}

impl fmt::Display for NmeaSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body();
        write!(f, "!{}*{:02X}", body, nmea_checksum(&body))
    }
}

impl FromStr for NmeaSentence {
    type Err = AisError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let rest = s
            .strip_prefix('!')
            .ok_or_else(|| AisError::Nmea("sentence must start with '!'".into()))?;
        let (body, checksum) = rest
            .rsplit_once('*')
            .ok_or_else(|| AisError::Nmea("missing checksum".into()))?;

        let expected = u8::from_str_radix(checksum, 16)
            .map_err(|_| AisError::Nmea(format!("bad checksum field {checksum:?}")))?;
        let computed = nmea_checksum(body);
        if expected != computed {
            return Err(AisError::Nmea(format!(
                "checksum mismatch: sentence says {expected:02X}, computed {computed:02X}"
            )));
        }

        let fields: Vec<&str> = body.split(',').collect();
        if fields.len() != 7 {
            return Err(AisError::Nmea(format!(
                "expected 7 fields, found {}",
                fields.len()
            )));
        }

        let formatter = fields[0];
        if formatter.len() != 5 || !(formatter.ends_with("VDM") || formatter.ends_with("VDO")) {
            return Err(AisError::Nmea(format!("unsupported sentence {formatter:?}")));
        }

        let parse_u8 = |field: &str, name: &str| {
            field
                .parse::<u8>()
                .map_err(|_| AisError::Nmea(format!("bad {name} field {field:?}")))
        };

        let count = parse_u8(fields[1], "fragment count")?;
        let number = parse_u8(fields[2], "fragment number")?;
        if count != 1 || number != 1 {
            return Err(AisError::Nmea(format!(
                "multi-fragment sentences are not supported ({number} of {count})"
            )));
        }

        let sequence_id = match fields[3] {
            "" => None,
            seq => Some(parse_u8(seq, "sequence id")?),
        };

        let channel = match fields[4] {
            "" => None,
            "A" | "1" => Some('A'),
            "B" | "2" => Some('B'),
            other => return Err(AisError::Nmea(format!("bad channel {other:?}"))),
        };

        let fill_bits = parse_u8(fields[6], "fill bits")?;
        if fill_bits > 5 {
            return Err(AisError::Nmea(format!("fill bits {fill_bits} out of range 0-5")));
        }

        Ok(Self {
            formatter: formatter.to_string(),
            sequence_id,
            channel,
            payload: fields[5].to_string(),
            fill_bits,
        })
    }
}
