//! Sample I/O at the radio boundary
//!
//! Raw captures are headerless interleaved little-endian `f32` I/Q pairs
//! (cf32) at a sample rate known out of band.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

use num_complex::Complex32;
use tracing::debug;

const BYTES_PER_SAMPLE: usize = 8;
const IO_BUFFER_LEN: usize = 16 * 16384;

/// Yields complex baseband in bounded buffers.
pub trait SampleSource: Send {
    fn sample_rate(&self) -> u32;

    /// Fill the front of `buf`.
    ///
    /// `Ok(None)` means the source is closed; `Ok(Some(0))` means nothing
    /// is available yet.
    fn read_samples(&mut self, buf: &mut [Complex32]) -> io::Result<Option<usize>>;
}

/// Accepts complex baseband for transmission.
pub trait SampleSink: Send {
    fn sample_rate(&self) -> u32;

    /// Returns how many samples were accepted.
    fn write_samples(&mut self, samples: &[Complex32]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decode cf32 bytes into samples. Trailing bytes of a partial sample are ignored.
pub fn cf32_to_samples(bytes: &[u8]) -> Vec<Complex32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|c| {
            Complex32::new(
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect()
}

pub fn samples_to_cf32(samples: &[Complex32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        bytes.extend_from_slice(&s.re.to_le_bytes());
        bytes.extend_from_slice(&s.im.to_le_bytes());
    }
    bytes
}

/// cf32 reader over any byte stream.
pub struct Cf32Reader<R> {
    inner: R,
    sample_rate: u32,
    bytes: Vec<u8>,
    /// Bytes of an incomplete sample left over from the last read
    pending: usize,
}

impl<R: Read> Cf32Reader<R> {
    pub fn new(inner: R, sample_rate: u32) -> Self {
        Self {
            inner,
            sample_rate,
            bytes: Vec::new(),
            pending: 0,
        }
    }
}

impl<R: Read + Send> SampleSource for Cf32Reader<R> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_samples(&mut self, buf: &mut [Complex32]) -> io::Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let want = buf.len() * BYTES_PER_SAMPLE;
        if self.bytes.len() < want {
            self.bytes.resize(want, 0);
        }

        let n = match self.inner.read(&mut self.bytes[self.pending..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Some(0)),
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(None);
        }

        let available = self.pending + n;
        let count = available / BYTES_PER_SAMPLE;
        for (out, sample) in buf.iter_mut().zip(cf32_to_samples(&self.bytes[..count * BYTES_PER_SAMPLE])) {
            *out = sample;
        }

        self.pending = available % BYTES_PER_SAMPLE;
        self.bytes
            .copy_within(count * BYTES_PER_SAMPLE..available, 0);
        Ok(Some(count))
    }
}

/// cf32 writer over any byte sink.
pub struct Cf32Writer<W> {
    inner: W,
    sample_rate: u32,
}

impl<W: Write> Cf32Writer<W> {
    pub fn new(inner: W, sample_rate: u32) -> Self {
        Self { inner, sample_rate }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> SampleSink for Cf32Writer<W> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_samples(&mut self, samples: &[Complex32]) -> io::Result<usize> {
        self.inner.write_all(&samples_to_cf32(samples))?;
        Ok(samples.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn open_reader(path: &str) -> io::Result<BufReader<Box<dyn Read + Send>>> {
    let file: Box<dyn Read + Send> = if path == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path)?)
    };
    Ok(BufReader::with_capacity(IO_BUFFER_LEN, file))
}

/// A capture file (or stdin as `-`), optionally replayed forever.
pub struct FileSource {
    path: String,
    loop_file: bool,
    reader: Cf32Reader<BufReader<Box<dyn Read + Send>>>,
}

impl FileSource {
    pub fn open(path: &str, sample_rate: u32, loop_file: bool) -> io::Result<Self> {
        Ok(Self {
            path: path.to_string(),
            loop_file: loop_file && path != "-",
            reader: Cf32Reader::new(open_reader(path)?, sample_rate),
        })
    }
}

impl SampleSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.reader.sample_rate()
    }

    fn read_samples(&mut self, buf: &mut [Complex32]) -> io::Result<Option<usize>> {
        match self.reader.read_samples(buf)? {
            None if self.loop_file => {
                let sample_rate = self.reader.sample_rate();
                self.reader = Cf32Reader::new(open_reader(&self.path)?, sample_rate);
                debug!("Looping file");
                Ok(Some(0))
            }
            read => Ok(read),
        }
    }
}

/// Sink writing cf32 to a file, or stdout for `-`.
pub fn open_sink(path: &str, sample_rate: u32) -> io::Result<Cf32Writer<BufWriter<Box<dyn Write + Send>>>> {
    let out: Box<dyn Write + Send> = if path == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(path)?)
    };
    Ok(Cf32Writer::new(BufWriter::with_capacity(IO_BUFFER_LEN, out), sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out a byte stream in small, misaligned pieces.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn samples() -> Vec<Complex32> {
        (0..10).map(|i| Complex32::new(i as f32, -(i as f32) * 0.5)).collect()
    }

    #[test]
    fn test_cf32_layout() {
        let bytes = samples_to_cf32(&[Complex32::new(1.0, -2.0)]);
        assert_eq!(bytes, [1.0f32.to_le_bytes(), (-2.0f32).to_le_bytes()].concat());
        assert_eq!(cf32_to_samples(&bytes[..7]), vec![]);
    }

    #[test]
    fn test_writer_then_reader() {
        let mut writer = Cf32Writer::new(Vec::new(), 96_000);
        assert_eq!(writer.write_samples(&samples()).unwrap(), 10);
        let bytes = writer.into_inner();

        let mut reader = Cf32Reader::new(Cursor::new(bytes), 96_000);
        let mut buf = vec![Complex32::default(); 16];
        assert_eq!(reader.read_samples(&mut buf).unwrap(), Some(10));
        assert_eq!(&buf[..10], &samples()[..]);
        assert_eq!(reader.read_samples(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_reader_reassembles_partial_samples() {
        let mut reader = Cf32Reader::new(
            Trickle {
                data: samples_to_cf32(&samples()),
                pos: 0,
                step: 5,
            },
            96_000,
        );
        let mut out = Vec::new();
        let mut buf = vec![Complex32::default(); 4];
        while let Some(n) = reader.read_samples(&mut buf).unwrap() {
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, samples());
    }
}
