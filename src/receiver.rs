//! Threaded receive loop
//!
//! A reader thread pulls fixed-size buffers from a [`SampleSource`] and
//! hands them over a bounded channel to a decoder thread, so a slow decode
//! pass never stalls sample acquisition. The decoder thread owns the
//! [`DecoderSession`] and returns it when the stream ends.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, SendTimeoutError, Sender, TrySendError};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::demodulator::{DecodedMessage, Demodulator, StreamDemodulator};
use crate::radio::SampleSource;
use crate::session::{Backoff, DecoderSession};

/// Sample buffers in flight between reader and decoder.
const QUEUE_DEPTH: usize = 16;
/// How long a blocked reader waits before looking at the stop flag again.
const SEND_POLL: Duration = Duration::from_millis(100);

/// What the reader does when the decoder falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backpressure {
    /// Wait for the decoder
    #[default]
    Block,
    /// Discard the buffer just read
    DropNewest,
}

/// What travels from the reader to the decoder.
#[derive(Debug, Clone, PartialEq)]
enum Chunk {
    Samples(Vec<Complex32>),
    /// This many samples were read and thrown away
    Gap(usize),
}

/// Reader end of the sample queue.
struct Feeder {
    tx: Sender<Chunk>,
    policy: Backpressure,
    /// Samples dropped since the last gap marker got through
    unreported: usize,
    dropped: Arc<AtomicU64>,
}

impl Feeder {
    fn new(tx: Sender<Chunk>, policy: Backpressure, dropped: Arc<AtomicU64>) -> Self {
        Self {
            tx,
            policy,
            unreported: 0,
            dropped,
        }
    }

    /// Queue one buffer. Returns false once the reader should stop.
    fn feed(&mut self, samples: Vec<Complex32>, stop: &AtomicBool) -> bool {
        match self.policy {
            Backpressure::Block => {
                let mut chunk = Chunk::Samples(samples);
                loop {
                    match self.tx.send_timeout(chunk, SEND_POLL) {
                        Ok(()) => return true,
                        Err(SendTimeoutError::Timeout(c)) => {
                            if stop.load(Ordering::Relaxed) {
                                return false;
                            }
                            chunk = c;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return false,
                    }
                }
            }
            Backpressure::DropNewest => {
                let len = samples.len();
                // the decoder has to hear about a gap before what follows it
                if self.unreported > 0 {
                    match self.tx.try_send(Chunk::Gap(self.unreported)) {
                        Ok(()) => self.unreported = 0,
                        Err(TrySendError::Full(_)) => {
                            self.discard(len);
                            return true;
                        }
                        Err(TrySendError::Disconnected(_)) => return false,
                    }
                }
                match self.tx.try_send(Chunk::Samples(samples)) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        self.discard(len);
                        true
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                }
            }
        }
    }

    fn discard(&mut self, len: usize) {
        self.unreported += len;
        let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Decoder busy, dropped sample buffer ({} so far)", count);
    }

    /// Hand over any gap still owed, waiting for room if need be.
    fn finish(self) {
        if self.unreported > 0 && self.tx.send(Chunk::Gap(self.unreported)).is_err() {
            debug!("Decoder gone before trailing gap of {} samples", self.unreported);
        }
    }
}

pub struct ReceiverHandle {
    reader: JoinHandle<io::Result<u64>>,
    decoder: JoinHandle<DecoderSession>,
    dropped: Arc<AtomicU64>,
}

impl ReceiverHandle {
    /// Wait for both threads. Returns the reader's sample count (or its I/O
    /// error) and the decoder statistics.
    pub fn join(self) -> (io::Result<u64>, DecoderSession) {
        let read = self
            .reader
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("reader thread panicked")));
        let mut session = self.decoder.join().unwrap_or_default();
        session.dropped_buffers = self.dropped.load(Ordering::Relaxed);
        (read, session)
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.decoder.is_finished()
    }
}

/// Start reading `source` and decoding it into `out`.
///
/// Setting `stop` ends the reader after its current buffer; the decoder
/// drains whatever was queued and then finishes the stream. Buffers dropped
/// under [`Backpressure::DropNewest`] reach the decoder as a gap, so it
/// re-acquires afterwards and message offsets stay true to the source.
pub fn spawn_receiver<S>(
    mut source: S,
    demodulator: Demodulator,
    buffer_samples: usize,
    policy: Backpressure,
    out: Sender<DecodedMessage>,
    stop: Arc<AtomicBool>,
) -> ReceiverHandle
where
    S: SampleSource + 'static,
{
    let (tx, rx) = bounded::<Chunk>(QUEUE_DEPTH);
    let dropped = Arc::new(AtomicU64::new(0));
    let buffer_samples = buffer_samples.max(1);

    let mut feeder = Feeder::new(tx, policy, Arc::clone(&dropped));
    let reader = thread::spawn(move || -> io::Result<u64> {
        let mut buf = vec![Complex32::default(); buffer_samples];
        let mut backoff = Backoff::default();
        let mut total = 0u64;

        while !stop.load(Ordering::Relaxed) {
            let n = match source.read_samples(&mut buf)? {
                None => break,
                Some(0) => {
                    thread::sleep(backoff.next_delay());
                    continue;
                }
                Some(n) => n,
            };
            backoff.reset();
            total += n as u64;
            if !feeder.feed(buf[..n].to_vec(), &stop) {
                break;
            }
        }
        feeder.finish();

        debug!("Reader finished after {} samples", total);
        Ok(total)
    });

    let decoder = thread::spawn(move || {
        let mut stream = StreamDemodulator::new(demodulator);
        let mut session = DecoderSession::new();

        let deliver = |messages: Vec<DecodedMessage>| {
            for message in messages {
                if out.send(message).is_err() {
                    debug!("Message consumer gone");
                }
            }
        };
        for chunk in rx {
            let messages = match chunk {
                Chunk::Samples(samples) => {
                    session.record_buffer(samples.len());
                    stream.push(&samples, &mut session)
                }
                Chunk::Gap(len) => {
                    debug!("Gap of {} samples at {}", len, stream.position());
                    stream.skip(len, &mut session)
                }
            };
            deliver(messages);
        }
        deliver(stream.finish(&mut session));

        info!(
            "Decoder finished: {} messages from {} samples",
            session.decoded, session.samples
        );
        session
    });

    ReceiverHandle {
        reader,
        decoder,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemConfig;
    use crate::frame::build_frame;
    use crate::gmsk::GmskModulator;
    use crate::message::{encode_position_report, VesselState};
    use crate::radio::{samples_to_cf32, Cf32Reader};
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    fn capture(mmsis: &[u32]) -> Vec<Complex32> {
        let config = ModemConfig::default();
        let modulator = GmskModulator::new(&config).unwrap();
        let mut samples = vec![Complex32::default(); 777];
        for &mmsi in mmsis {
            let bits = encode_position_report(&VesselState::new(mmsi, 10.0, 20.0)).unwrap();
            samples.extend(modulator.modulate(build_frame(&bits).bits()));
            samples.extend(vec![Complex32::default(); 3000]);
        }
        samples
    }

    /// Alternates between having nothing and handing out a few samples.
    struct Bursty {
        samples: Vec<Complex32>,
        pos: usize,
        idle: bool,
    }

    impl SampleSource for Bursty {
        fn sample_rate(&self) -> u32 {
            96_000
        }

        fn read_samples(&mut self, buf: &mut [Complex32]) -> io::Result<Option<usize>> {
            self.idle = !self.idle;
            if self.idle {
                return Ok(Some(0));
            }
            if self.pos == self.samples.len() {
                return Ok(None);
            }
            let n = buf.len().min(self.samples.len() - self.pos).min(900);
            buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
            self.pos += n;
            Ok(Some(n))
        }
    }

    #[test]
    fn test_receives_from_cf32_stream() {
        let samples = capture(&[244000001, 244000002]);
        let source = Cf32Reader::new(Cursor::new(samples_to_cf32(&samples)), 96_000);
        let (out, messages) = unbounded();
        let handle = spawn_receiver(
            source,
            Demodulator::new(ModemConfig::default()).unwrap(),
            1024,
            Backpressure::Block,
            out,
            Arc::new(AtomicBool::new(false)),
        );

        let (read, session) = handle.join();
        assert_eq!(read.unwrap(), samples.len() as u64);
        let mmsis: Vec<u32> = messages.try_iter().map(|m| m.report.vessel.mmsi).collect();
        assert_eq!(mmsis, vec![244000001, 244000002]);
        assert_eq!(session.decoded, 2);
        assert_eq!(session.samples, samples.len() as u64);
    }

    #[test]
    fn test_idle_source_is_polled() {
        let source = Bursty {
            samples: capture(&[244000003]),
            pos: 0,
            idle: false,
        };
        let (out, messages) = unbounded();
        let handle = spawn_receiver(
            source,
            Demodulator::new(ModemConfig::default()).unwrap(),
            4096,
            Backpressure::Block,
            out,
            Arc::new(AtomicBool::new(false)),
        );
        let (read, _) = handle.join();
        assert!(read.is_ok());
        assert_eq!(messages.try_iter().count(), 1);
    }

    fn block(len: usize) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); len]
    }

    #[test]
    fn test_dropped_buffers_become_a_gap() {
        let (tx, rx) = bounded(2);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut feeder = Feeder::new(tx, Backpressure::DropNewest, Arc::clone(&dropped));
        let stop = AtomicBool::new(false);

        // nobody is draining the queue
        assert!(feeder.feed(block(10), &stop));
        assert!(feeder.feed(block(11), &stop));
        assert!(feeder.feed(block(12), &stop));
        assert!(feeder.feed(block(13), &stop));
        assert_eq!(dropped.load(Ordering::Relaxed), 2);

        let queued: Vec<Chunk> = rx.try_iter().collect();
        assert_eq!(queued, vec![Chunk::Samples(block(10)), Chunk::Samples(block(11))]);

        assert!(feeder.feed(block(14), &stop));
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![Chunk::Gap(25), Chunk::Samples(block(14))]
        );
    }

    #[test]
    fn test_gap_owed_at_end_is_delivered() {
        let (tx, rx) = bounded(1);
        let mut feeder = Feeder::new(tx, Backpressure::DropNewest, Arc::new(AtomicU64::new(0)));
        let stop = AtomicBool::new(false);
        assert!(feeder.feed(block(5), &stop));
        assert!(feeder.feed(block(7), &stop));

        let consumer = thread::spawn(move || rx.iter().collect::<Vec<_>>());
        feeder.finish();
        assert_eq!(
            consumer.join().unwrap(),
            vec![Chunk::Samples(block(5)), Chunk::Gap(7)]
        );
    }

    #[test]
    fn test_feed_stops_when_decoder_gone() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let stop = AtomicBool::new(false);
        for policy in [Backpressure::Block, Backpressure::DropNewest] {
            let mut feeder = Feeder::new(tx.clone(), policy, Arc::new(AtomicU64::new(0)));
            assert!(!feeder.feed(block(3), &stop));
        }
    }

    #[test]
    fn test_decoder_finishes_without_consumer() {
        let samples = capture(&[244000005]);
        let source = Cf32Reader::new(Cursor::new(samples_to_cf32(&samples)), 96_000);
        let (out, messages) = unbounded();
        drop(messages);
        let handle = spawn_receiver(
            source,
            Demodulator::new(ModemConfig::default()).unwrap(),
            1024,
            Backpressure::Block,
            out,
            Arc::new(AtomicBool::new(false)),
        );
        let (read, session) = handle.join();
        assert_eq!(read.unwrap(), samples.len() as u64);
        assert_eq!(session.decoded, 1);
    }

    #[test]
    fn test_stop_before_start() {
        let source = Cf32Reader::new(Cursor::new(samples_to_cf32(&capture(&[244000004]))), 96_000);
        let (out, messages) = unbounded();
        let handle = spawn_receiver(
            source,
            Demodulator::new(ModemConfig::default()).unwrap(),
            1024,
            Backpressure::DropNewest,
            out,
            Arc::new(AtomicBool::new(true)),
        );
        let (read, session) = handle.join();
        assert_eq!(read.unwrap(), 0);
        assert_eq!(session.buffers, 0);
        assert_eq!(messages.try_iter().count(), 0);
    }
}
