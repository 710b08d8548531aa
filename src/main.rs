//! ais-modem: AIS receiver and transmitter for raw cf32 baseband
//!
//! Receive mode decodes position reports from a capture file or stdin;
//! transmit mode writes modulated bursts to a file or stdout.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ais_modem::config::{Config, TransmitConfig};
use ais_modem::demodulator::{DecodedMessage, Demodulator};
use ais_modem::message::{nav_status_str, VesselState, COG_NOT_AVAILABLE, HEADING_NOT_AVAILABLE};
use ais_modem::network::{self, BROADCAST_CAPACITY};
use ais_modem::nmea::NmeaSentence;
use ais_modem::radio::{open_sink, FileSource};
use ais_modem::receiver::{spawn_receiver, Backpressure};
use ais_modem::transmitter::{run_transmit_loop, Transmitter};
use ais_modem::vessels::{distance_bearing, VesselStore};

/// Samples per buffer handed from the reader to the decoder.
const RECEIVE_BUFFER_SAMPLES: usize = 16 * 16384;
/// Samples per write to the transmit sink.
const TRANSMIT_CHUNK_SAMPLES: usize = 4096;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args();

    // Initialize logging only if not in interactive mode
    if !config.interactive {
        let default_level = if config.verbose { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        // stdout may carry samples or sentences
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        info!("ais-modem starting...");
        info!("Configuration: {:?}", config);
    }

    let result = match &config.transmit {
        Some(tx_config) => run_transmit(&config, tx_config),
        None => run_receive(config.clone()),
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

fn run_transmit(config: &Config, tx_config: &TransmitConfig) -> Result<(), Box<dyn std::error::Error>> {
    let transmitter = Transmitter::new(config.modem.clone())?;

    let burst = match &tx_config.nmea {
        Some(sentence) => {
            let sentence: NmeaSentence = sentence.parse()?;
            transmitter.build_burst_from_bits(&sentence.to_bits()?)?
        }
        None => {
            let vessel = VesselState {
                mmsi: tx_config.mmsi,
                latitude: tx_config.lat,
                longitude: tx_config.lon,
                speed_over_ground: tx_config.sog,
                course_over_ground: tx_config.cog,
                true_heading: tx_config.heading,
                nav_status: tx_config.status,
                timestamp: tx_config.second,
            };
            transmitter.build_burst(&vessel)?
        }
    };
    info!(
        "Burst: {} message bits, {} frame bits, {} samples",
        burst.message.len(),
        burst.frame.len(),
        burst.samples.len()
    );
    info!("Message: {}", NmeaSentence::from_bits(&burst.message, None));

    let mut sink = open_sink(&tx_config.output, config.modem.sample_rate)?;
    let count = tx_config.count;
    let interval = Duration::from_millis(tx_config.interval_ms);
    let stop = Arc::new(AtomicBool::new(false));

    let rt = tokio::runtime::Runtime::new()?;
    let sent = rt.block_on(async {
        let stop_on_signal = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop_on_signal.store(true, Ordering::Relaxed);
            }
        });

        tokio::task::spawn_blocking(move || {
            run_transmit_loop(
                &transmitter,
                &burst,
                &mut sink,
                count,
                interval,
                &stop,
                TRANSMIT_CHUNK_SAMPLES,
            )
        })
        .await
    })??;

    info!("Sent {} bursts", sent);
    Ok(())
}

fn run_receive(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let filename = config.filename.clone().unwrap_or_else(|| "-".to_string());
    let demodulator = Demodulator::new(config.modem.clone())?;
    let source = FileSource::open(&filename, config.modem.sample_rate, config.loop_file)?;
    if !config.interactive {
        info!("Reading from: {}", filename);
    }

    let vessel_store = Arc::new(RwLock::new(VesselStore::with_min_messages(
        config.interactive_ttl,
        config.min_messages,
    )));
    let (msg_tx, msg_rx): (Sender<DecodedMessage>, Receiver<DecodedMessage>) = bounded(1024);
    let (nmea_tx, _) = broadcast::channel::<String>(BROADCAST_CAPACITY);
    let stop = Arc::new(AtomicBool::new(false));

    let policy = if config.drop_when_busy {
        Backpressure::DropNewest
    } else {
        Backpressure::Block
    };
    let receiver = spawn_receiver(
        source,
        demodulator,
        RECEIVE_BUFFER_SAMPLES,
        policy,
        msg_tx,
        Arc::clone(&stop),
    );

    let rt = tokio::runtime::Runtime::new()?;
    let session = rt.block_on(async {
        let net_handle = if config.net {
            let store = Arc::clone(&vessel_store);
            let tx = nmea_tx.clone();
            let (nmea_port, http_port) = (config.net_nmea_port, config.net_http_port);
            Some(tokio::spawn(async move {
                if let Err(e) = network::run_servers(nmea_port, http_port, tx, store).await {
                    error!("Network error: {}", e);
                }
            }))
        } else {
            None
        };

        let processor_handle = {
            let store = Arc::clone(&vessel_store);
            let cfg = config.clone();
            tokio::task::spawn_blocking(move || process_messages(msg_rx, store, nmea_tx, &cfg))
        };

        let interactive_handle = if config.interactive {
            let store = Arc::clone(&vessel_store);
            let rows = config.interactive_rows;
            let receiver_pos = config.receiver_lat.zip(config.receiver_lon);
            Some(tokio::spawn(async move {
                interactive_display(store, rows, receiver_pos).await;
            }))
        } else {
            None
        };

        // Stale vessel removal task
        let cleanup_handle = {
            let store = Arc::clone(&vessel_store);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    store.write().remove_stale();
                }
            })
        };

        let stop_on_signal = Arc::clone(&stop);
        let signal_handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop_on_signal.store(true, Ordering::Relaxed);
            }
        });

        let (read, session) = tokio::task::spawn_blocking(move || receiver.join())
            .await
            .unwrap_or_else(|e| (Err(io::Error::other(e)), Default::default()));
        match read {
            Ok(samples) => info!("Input complete after {} samples", samples),
            Err(e) => error!("Error reading samples: {}", e),
        }
        processor_handle.await.ok();

        // After the input ends, keep serving if interactive or net mode
        if config.interactive || config.net {
            if config.interactive {
                println!("\nInput complete. Press Ctrl+C to exit...");
            }
            while !stop.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        cleanup_handle.abort();
        signal_handle.abort();
        if let Some(h) = net_handle {
            h.abort();
        }
        if let Some(h) = interactive_handle {
            h.abort();
        }
        session
    });

    if config.stats {
        println!("{}", session);
    }
    Ok(())
}

fn process_messages(
    rx: Receiver<DecodedMessage>,
    store: Arc<RwLock<VesselStore>>,
    nmea_tx: broadcast::Sender<String>,
    config: &Config,
) {
    while let Ok(msg) = rx.recv() {
        store.write().update_from_message(&msg);

        // no subscribers is fine
        let _ = nmea_tx.send(msg.nmea.clone());

        if !config.interactive {
            if config.raw {
                println!("{}", msg.nmea);
            } else if config.json {
                match serde_json::to_string(&msg) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("JSON encoding failed: {}", e),
                }
            } else {
                println!("{}", msg);
            }
        }
    }
}

async fn interactive_display(
    store: Arc<RwLock<VesselStore>>,
    max_rows: usize,
    receiver_pos: Option<(f64, f64)>,
) {
    let refresh_interval = Duration::from_millis(250);

    const RED: &str = "\x1B[91m";
    const YELLOW: &str = "\x1B[93m";
    const BOLD: &str = "\x1B[1m";
    const RESET: &str = "\x1B[0m";

    loop {
        tokio::time::sleep(refresh_interval).await;

        // Clear screen and move cursor to top
        print!("\x1B[2J\x1B[H");

        if receiver_pos.is_some() {
            println!(
                "{BOLD}{:<9} {:<26} {:>8} {:>5} {:>5} {:>5} {:>4} {:>6} {:>3}{RESET}",
                "MMSI", "Status", "Dist", "Brg", "SOG", "COG", "Hdg", "Msgs", "Age"
            );
        } else {
            println!(
                "{BOLD}{:<9} {:<26} {:>10} {:>11} {:>5} {:>5} {:>4} {:>6} {:>3}{RESET}",
                "MMSI", "Status", "Lat", "Lon", "SOG", "COG", "Hdg", "Msgs", "Age"
            );
        }
        let width = if receiver_pos.is_some() { 80 } else { 90 };
        println!("{}", "-".repeat(width));

        let store = store.read();
        let now = Instant::now();

        let mut vessels: Vec<_> = store.all().collect();
        // Most recently heard first
        vessels.sort_by(|a, b| b.seen.cmp(&a.seen));

        for vessel in vessels.iter().take(max_rows) {
            let state = &vessel.report.vessel;
            let seen_secs = now.duration_since(vessel.seen).as_secs();

            let status_color = match state.nav_status {
                14 => RED,
                2 | 6 => YELLOW,
                _ => "",
            };
            let status = format!(
                "{}{:<26}{}",
                status_color,
                nav_status_str(state.nav_status),
                if status_color.is_empty() { "" } else { RESET }
            );

            let cog = if state.course_over_ground >= COG_NOT_AVAILABLE {
                String::new()
            } else {
                format!("{:.0}", state.course_over_ground)
            };
            let heading = if state.true_heading == HEADING_NOT_AVAILABLE {
                String::new()
            } else {
                format!("{}", state.true_heading)
            };

            match (receiver_pos, vessel.position()) {
                (Some((rlat, rlon)), position) => {
                    let (dist, brg) = position
                        .map(|(lat, lon)| {
                            let (d, b) = distance_bearing(rlat, rlon, lat, lon);
                            // km to nm
                            (format!("{:.1}nm", d * 0.539957), format!("{:.0}°", b))
                        })
                        .unwrap_or_default();
                    println!(
                        "{:<9} {} {:>8} {:>5} {:>5.1} {:>5} {:>4} {:>6} {:>2}s",
                        vessel.mmsi,
                        status,
                        dist,
                        brg,
                        state.speed_over_ground,
                        cog,
                        heading,
                        vessel.messages,
                        seen_secs
                    );
                }
                (None, position) => {
                    let (lat, lon) = position
                        .map(|(lat, lon)| (format!("{:.5}", lat), format!("{:.5}", lon)))
                        .unwrap_or_default();
                    println!(
                        "{:<9} {} {:>10} {:>11} {:>5.1} {:>5} {:>4} {:>6} {:>2}s",
                        vessel.mmsi,
                        status,
                        lat,
                        lon,
                        state.speed_over_ground,
                        cog,
                        heading,
                        vessel.messages,
                        seen_secs
                    );
                }
            }
        }

        println!("{}", "-".repeat(width));
        let pos_info = receiver_pos
            .map(|(lat, lon)| format!(" | Pos: {:.4},{:.4}", lat, lon))
            .unwrap_or_default();
        println!("Vessels: {}{} | Ctrl+C to exit", vessels.len(), pos_info);

        io::stdout().flush().ok();
    }
}
