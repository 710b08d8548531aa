//! Configuration and command-line argument parsing

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{AisError, Result};
use crate::frame::{FrameLocator, FrameOptions};
use crate::gmsk::{check_phase_step, ModulationProfile};
use crate::nrzi::NRZI_INITIAL_LEVEL;

/// AIS channel symbol rate
pub const AIS_SYMBOL_RATE: u32 = 9_600;

/// Modem parameters shared by the transmit and receive paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemConfig {
    pub sample_rate: u32,
    pub symbol_rate: u32,
    pub profile: ModulationProfile,
    /// Gaussian filter length in symbol periods
    pub pulse_span_symbols: usize,
    pub nrzi_initial_level: u8,
    /// Append 8 zero bits after the end flag
    pub trailing_buffer: bool,

    // Acquisition
    /// Minimum normalised correlation for a training lock
    pub correlation_threshold: f32,
    /// Peaks within this distance of the best score compete on earliness
    pub peak_tolerance: f32,
    /// Residual frequency offsets tried, in units of the nominal deviation
    pub offset_hypotheses: Vec<f32>,
    pub acquisition_window_symbols: usize,
    /// Symbols sliced ahead of the acquired training start
    pub lead_symbols: usize,

    // Frame locator
    pub training_search_span: usize,
    pub min_training_agreement: usize,
    pub min_flag_agreement: usize,

    // Discriminator
    /// Moving-average length; `None` picks sps/2 rounded to odd
    pub lowpass_taps: Option<usize>,
    pub remove_dc: bool,

    /// Decode every built frame before handing it out
    pub verify_transmit: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            sample_rate: 96_000,
            symbol_rate: AIS_SYMBOL_RATE,
            profile: ModulationProfile::default(),
            pulse_span_symbols: 4,
            nrzi_initial_level: NRZI_INITIAL_LEVEL,
            trailing_buffer: true,
            correlation_threshold: 0.6,
            peak_tolerance: 0.05,
            offset_hypotheses: vec![-0.3, -0.2, -0.1, 0.0, 0.1, 0.2, 0.3],
            acquisition_window_symbols: 256,
            lead_symbols: 8,
            training_search_span: 40,
            min_training_agreement: 21,
            min_flag_agreement: 6,
            lowpass_taps: None,
            remove_dc: true,
            verify_transmit: true,
        }
    }
}

impl ModemConfig {
    /// Samples per symbol; the sample rate must be an integer multiple of the symbol rate.
    pub fn samples_per_symbol(&self) -> Result<usize> {
        if self.symbol_rate == 0 || self.sample_rate == 0 {
            return Err(AisError::Configuration(
                "sample rate and symbol rate must be non-zero".into(),
            ));
        }
        if self.sample_rate % self.symbol_rate != 0 {
            return Err(AisError::Configuration(format!(
                "sample rate {} is not an integer multiple of symbol rate {}",
                self.sample_rate, self.symbol_rate
            )));
        }
        Ok((self.sample_rate / self.symbol_rate) as usize)
    }

    pub fn validate(&self) -> Result<()> {
        let sps = self.samples_per_symbol()?;
        let err = |msg: String| Err(AisError::Configuration(msg));

        if let ModulationProfile::Gmsk { bt } = self.profile {
            if !(bt.is_finite() && bt > 0.0) {
                return err(format!("BT product {bt} must be positive"));
            }
        }
        if let ModulationProfile::Fsk { deviation_hz } = self.profile {
            if !(deviation_hz.is_finite() && deviation_hz > 0.0) {
                return err(format!("FSK deviation {deviation_hz} Hz must be positive"));
            }
        }
        if !(1..=8).contains(&self.pulse_span_symbols) {
            return err(format!(
                "pulse span {} outside 1..=8 symbols",
                self.pulse_span_symbols
            ));
        }
        if self.nrzi_initial_level > 1 {
            return err(format!("NRZI level {} is not 0 or 1", self.nrzi_initial_level));
        }
        if !(self.correlation_threshold > 0.0 && self.correlation_threshold <= 1.0) {
            return err(format!(
                "correlation threshold {} outside (0, 1]",
                self.correlation_threshold
            ));
        }
        if !(self.peak_tolerance >= 0.0 && self.peak_tolerance < 1.0) {
            return err(format!("peak tolerance {} outside [0, 1)", self.peak_tolerance));
        }
        if self.offset_hypotheses.is_empty() || self.offset_hypotheses.iter().any(|h| !h.is_finite()) {
            return err("at least one finite offset hypothesis is required".into());
        }
        if self.min_training_agreement > crate::hdlc::TRAINING_BITS
            || self.min_flag_agreement > crate::hdlc::FLAG_BITS
        {
            return err("agreement thresholds exceed pattern length".into());
        }
        if self.lowpass_taps == Some(0) {
            return err("low-pass filter needs at least one tap".into());
        }
        check_phase_step(self.profile.phase_step(self.sample_rate, sps))
    }

    /// Moving-average length used by the discriminator.
    pub fn lowpass_len(&self) -> Result<usize> {
        if let Some(taps) = self.lowpass_taps {
            return Ok(taps.max(1));
        }
        let half = (self.samples_per_symbol()? / 2).max(1);
        Ok(if half % 2 == 0 { half + 1 } else { half })
    }

    pub fn frame_options(&self) -> FrameOptions {
        FrameOptions {
            nrzi_initial_level: self.nrzi_initial_level,
            trailing_buffer: self.trailing_buffer,
        }
    }

    pub fn frame_locator(&self) -> FrameLocator {
        FrameLocator {
            training_search_span: self.training_search_span,
            min_training_agreement: self.min_training_agreement,
            min_flag_agreement: self.min_flag_agreement,
            nrzi_initial_level: self.nrzi_initial_level,
        }
    }
}

/// Transmit-side settings
#[derive(Debug, Clone)]
pub struct TransmitConfig {
    pub output: String,
    pub mmsi: u32,
    pub lat: f64,
    pub lon: f64,
    pub sog: f64,
    pub cog: f64,
    pub heading: u16,
    pub status: u8,
    pub second: u8,
    /// Send this sentence's payload instead of building one from the fields above
    pub nmea: Option<String>,
    /// Bursts to send; 0 repeats until interrupted
    pub count: u64,
    pub interval_ms: u64,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            output: "-".to_string(),
            mmsi: 123_456_789,
            lat: 37.7749,
            lon: -122.4194,
            sog: 0.0,
            cog: 360.0,
            heading: 511,
            status: 15,
            second: 0,
            nmea: None,
            count: 1,
            interval_ms: 2_000,
        }
    }
}

/// Application settings
#[derive(Debug, Clone)]
pub struct Config {
    pub modem: ModemConfig,

    // Input
    pub filename: Option<String>,
    pub loop_file: bool,
    /// Drop incoming buffers instead of blocking the reader when decoding lags
    pub drop_when_busy: bool,

    // Output
    pub raw: bool,
    pub json: bool,
    pub interactive: bool,
    pub interactive_rows: usize,
    pub interactive_ttl: u64,
    /// Minimum messages required before showing a vessel
    pub min_messages: u64,

    // Receiver position (for distance/bearing calculation)
    pub receiver_lat: Option<f64>,
    pub receiver_lon: Option<f64>,

    // Networking
    pub net: bool,
    pub net_nmea_port: u16,
    pub net_http_port: u16,

    // Transmit
    pub transmit: Option<TransmitConfig>,

    // Debug
    pub verbose: bool,
    pub stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modem: ModemConfig::default(),
            filename: None,
            loop_file: false,
            drop_when_busy: false,
            raw: false,
            json: false,
            interactive: false,
            interactive_rows: 15,
            interactive_ttl: 360,
            min_messages: 1,
            receiver_lat: None,
            receiver_lon: None,
            net: false,
            net_nmea_port: 10110,
            net_http_port: 8080,
            transmit: None,
            verbose: false,
            stats: false,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        if args.iter().any(|a| a == "--help") {
            print_help();
            std::process::exit(0);
        }
        match Self::parse(&args) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                print_help();
                std::process::exit(1);
            }
        }
    }

    /// Parse options (without the program name).
    pub fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut config = Config::default();
        let mut tx = TransmitConfig::default();
        let mut transmit = false;

        fn value<T: std::str::FromStr>(args: &[String], i: &mut usize) -> std::result::Result<T, String> {
            let flag = &args[*i];
            *i += 1;
            args.get(*i)
                .ok_or_else(|| format!("Missing value for {}", flag))?
                .parse()
                .map_err(|_| format!("Invalid value for {}: {}", flag, args[*i]))
        }

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--ifile" => config.filename = Some(value(args, &mut i)?),
                "--loop" => config.loop_file = true,
                "--sample-rate" => config.modem.sample_rate = value(args, &mut i)?,
                "--bt" => config.modem.profile = ModulationProfile::Gmsk { bt: value(args, &mut i)? },
                "--fsk" => config.modem.profile = ModulationProfile::Fsk { deviation_hz: 2400.0 },
                "--drop-when-busy" => config.drop_when_busy = true,
                "--raw" => config.raw = true,
                "--json" => config.json = true,
                "--interactive" => config.interactive = true,
                "--interactive-rows" => config.interactive_rows = value(args, &mut i)?,
                "--interactive-ttl" => config.interactive_ttl = value(args, &mut i)?,
                "--min-messages" => config.min_messages = value(args, &mut i)?,
                "--receiver-lat" => config.receiver_lat = Some(value(args, &mut i)?),
                "--receiver-lon" => config.receiver_lon = Some(value(args, &mut i)?),
                "--net" => config.net = true,
                "--net-nmea-port" => config.net_nmea_port = value(args, &mut i)?,
                "--net-http-port" => config.net_http_port = value(args, &mut i)?,
                "--stats" => config.stats = true,
                "--verbose" | "--debug" => config.verbose = true,
                "--transmit" => transmit = true,
                "--ofile" => tx.output = value(args, &mut i)?,
                "--mmsi" => tx.mmsi = value(args, &mut i)?,
                "--lat" => tx.lat = value(args, &mut i)?,
                "--lon" => tx.lon = value(args, &mut i)?,
                "--sog" => tx.sog = value(args, &mut i)?,
                "--cog" => tx.cog = value(args, &mut i)?,
                "--heading" => tx.heading = value(args, &mut i)?,
                "--status" => tx.status = value(args, &mut i)?,
                "--second" => tx.second = value(args, &mut i)?,
                "--nmea" => tx.nmea = Some(value(args, &mut i)?),
                "--count" => tx.count = value(args, &mut i)?,
                "--interval-ms" => tx.interval_ms = value(args, &mut i)?,
                other => return Err(format!("Unknown option: {}", other)),
            }
            i += 1;
        }

        if transmit {
            config.transmit = Some(tx);
        }
        config.modem.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

fn print_help() {
    println!(
        r#"ais-modem - AIS GMSK modem and frame codec

Usage: ais-modem [OPTIONS]

Receive options:
  --ifile <filename>       Read cf32 samples from file (use '-' for stdin)
  --loop                   With --ifile, read the same file in a loop
  --sample-rate <hz>       Sample rate, multiple of 9600 (default: 96000)
  --bt <product>           GMSK BT product (default: 0.4)
  --fsk                    Use the 2400 Hz FSK profile instead of GMSK
  --drop-when-busy         Drop sample buffers when the decoder falls behind
  --raw                    Print NMEA sentences only
  --json                   Print decoded messages as JSON
  --interactive            Interactive mode refreshing data on screen
  --interactive-rows <N>   Max rows in interactive mode (default: 15)
  --interactive-ttl <s>    Remove from list if idle for <s> seconds (default: 360)
  --min-messages <N>       Min messages before showing a vessel (default: 1)
  --receiver-lat <deg>     Receiver latitude for distance calculation
  --receiver-lon <deg>     Receiver longitude for distance calculation
  --net                    Enable networking
  --net-nmea-port <port>   TCP port for NMEA output (default: 10110)
  --net-http-port <port>   HTTP server port (default: 8080)
  --stats                  Print decoder statistics at exit
  --verbose, --debug      Debug logging

Transmit options:
  --transmit               Generate bursts instead of receiving
  --ofile <filename>       Write cf32 samples to file (default: '-' for stdout)
  --mmsi <N>               Vessel MMSI (default: 123456789)
  --lat <deg>              Latitude (default: 37.7749)
  --lon <deg>              Longitude (default: -122.4194)
  --sog <kn>               Speed over ground (default: 0)
  --cog <deg>              Course over ground (default: 360, not available)
  --heading <deg>          True heading (default: 511, not available)
  --status <N>             Navigation status (default: 15)
  --second <s>             UTC second (default: 0)
  --nmea <sentence>        Transmit the payload of an !AIVDM sentence
  --count <N>              Number of bursts, 0 for continuous (default: 1)
  --interval-ms <ms>       Time between bursts (default: 2000)

  --help                   Show this help
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_modem_config_is_valid() {
        let config = ModemConfig::default();
        config.validate().unwrap();
        assert_eq!(config.samples_per_symbol().unwrap(), 10);
        assert_eq!(config.lowpass_len().unwrap(), 5);
    }

    #[test]
    fn test_non_integer_sps() {
        let config = ModemConfig {
            sample_rate: 100_000,
            ..ModemConfig::default()
        };
        assert!(matches!(config.validate(), Err(AisError::Configuration(_))));
    }

    #[test]
    fn test_invalid_settings() {
        let bad = [
            ModemConfig { profile: ModulationProfile::Gmsk { bt: 0.0 }, ..ModemConfig::default() },
            ModemConfig { pulse_span_symbols: 9, ..ModemConfig::default() },
            ModemConfig { correlation_threshold: 1.5, ..ModemConfig::default() },
            ModemConfig { nrzi_initial_level: 2, ..ModemConfig::default() },
            // 2 samples per symbol puts the phase step at pi/4
            ModemConfig { sample_rate: 19_200, ..ModemConfig::default() },
            ModemConfig { offset_hypotheses: vec![], ..ModemConfig::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_lowpass_len_is_odd() {
        let config = ModemConfig {
            sample_rate: 48_000,
            ..ModemConfig::default()
        };
        assert_eq!(config.lowpass_len().unwrap(), 3);
        let config = ModemConfig {
            sample_rate: 76_800,
            ..ModemConfig::default()
        };
        assert_eq!(config.lowpass_len().unwrap(), 5);
    }

    #[test]
    fn test_parse_receive_args() {
        let config = Config::parse(&args(&[
            "--ifile", "capture.cf32", "--loop", "--net", "--net-nmea-port", "2000", "--fsk",
        ]))
        .unwrap();
        assert_eq!(config.filename.as_deref(), Some("capture.cf32"));
        assert!(config.loop_file);
        assert!(config.net);
        assert_eq!(config.net_nmea_port, 2000);
        assert_eq!(config.modem.profile, ModulationProfile::Fsk { deviation_hz: 2400.0 });
        assert!(config.transmit.is_none());
    }

    #[test]
    fn test_parse_transmit_args() {
        let config = Config::parse(&args(&[
            "--transmit", "--mmsi", "366982330", "--lat", "-33.5", "--count", "0",
        ]))
        .unwrap();
        let tx = config.transmit.unwrap();
        assert_eq!(tx.mmsi, 366982330);
        assert_eq!(tx.lat, -33.5);
        assert_eq!(tx.count, 0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Config::parse(&args(&["--bogus"])).is_err());
        assert!(Config::parse(&args(&["--mmsi"])).is_err());
        assert!(Config::parse(&args(&["--sample-rate", "abc"])).is_err());
        assert!(Config::parse(&args(&["--sample-rate", "100000"])).is_err());
    }
}
