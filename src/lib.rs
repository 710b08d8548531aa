//! ais-modem: AIS frame codec and GMSK modem
//!
//! Transmit: [`VesselState`] -> [`encode_position_report`] -> [`build_frame`]
//! -> [`gmsk::GmskModulator`]. Receive: complex baseband ->
//! [`discriminator::Discriminator`] -> [`clock::ClockRecovery`] ->
//! [`frame::FrameLocator`] -> [`PositionReport`].
//!
//! Everything below `demodulator` and `transmitter` is synchronous and
//! keeps no state between calls. `receiver`, `radio`, `vessels` and
//! `network` are the collaborators the `ais-modem` binary is built from.

pub mod armor;
pub mod bits;
pub mod clock;
pub mod config;
pub mod crc;
pub mod demodulator;
pub mod discriminator;
pub mod error;
pub mod frame;
pub mod gmsk;
pub mod hdlc;
pub mod message;
pub mod network;
pub mod nmea;
pub mod nrzi;
pub mod radio;
pub mod receiver;
pub mod session;
pub mod transmitter;
pub mod vessels;

pub use bits::BitSequence;
pub use clock::{recover_clock, DemodulatedSymbolStream, Polarity};
pub use config::ModemConfig;
pub use crc::compute_crc16;
pub use demodulator::{DecodedMessage, Demodulator, StreamDemodulator};
pub use discriminator::demodulate;
pub use error::{AisError, CorruptKind, Result};
pub use frame::{build_frame, disassemble_frame, extract_payload, AisFrame};
pub use gmsk::{modulate, ModulationProfile};
pub use hdlc::{bit_destuff, bit_stuff};
pub use message::{decode_position_report, encode_position_report, PositionReport, VesselState};
pub use nmea::NmeaSentence;
pub use nrzi::{nrzi_decode, nrzi_encode};
pub use session::DecoderSession;
pub use transmitter::{Burst, Transmitter};
