//! Stem WAV persistence
//!
//! Stems are written as 32-bit float WAV at [`STEM_SAMPLE_RATE`], one file per
//! [`StemKind`], named as the cache layout expects.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io;
use std::path::Path;
use tracing::debug;

use crate::models::{StemBuffer, StemKind, StemOutput, StemPaths, STEM_SAMPLE_RATE};

/// Writes compute-stage output into an entry-shaped directory
#[derive(Debug, Clone, Copy, Default)]
pub struct StemWriter;

impl StemWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write every stem of `output` into `dir`
    ///
    /// Fails with `InvalidData` if a stem is missing, has no channels, or is
    /// not at the stem sample rate. Extra entries in `output` are ignored.
    pub fn write_all(&self, output: &StemOutput, dir: &Path) -> io::Result<StemPaths> {
        std::fs::create_dir_all(dir)?;

        for kind in StemKind::ALL {
            let buffer = output.get(kind.as_str()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("separator produced no '{}' stem", kind),
                )
            })?;
            self.write_stem(buffer, &dir.join(kind.file_name()))
                .map_err(|e| io::Error::new(e.kind(), format!("{} stem: {}", kind, e)))?;
        }

        for name in output.keys() {
            if name.parse::<StemKind>().is_err() {
                debug!(stem = %name, "Ignoring unknown stem from separator");
            }
        }

        Ok(StemPaths::for_dir(dir))
    }

    pub fn write_stem(&self, buffer: &StemBuffer, path: &Path) -> io::Result<()> {
        if buffer.channels == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "zero channels"));
        }
        if buffer.sample_rate != STEM_SAMPLE_RATE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "sample rate {} Hz, expected {} Hz",
                    buffer.sample_rate, STEM_SAMPLE_RATE
                ),
            ));
        }

        let spec = WavSpec {
            channels: buffer.channels,
            sample_rate: buffer.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let mut writer = WavWriter::create(path, spec).map_err(hound_to_io)?;
        for &sample in &buffer.samples {
            writer.write_sample(sample).map_err(hound_to_io)?;
        }
        writer.finalize().map_err(hound_to_io)?;

        debug!(
            path = %path.display(),
            frames = buffer.frames(),
            channels = buffer.channels,
            "Stem written"
        );
        Ok(())
    }
}

/// Read a WAV file into a float buffer (integer PCM is scaled to [-1.0, 1.0])
pub fn read_stem_wav(path: &Path) -> io::Result<StemBuffer> {
    let mut reader = WavReader::open(path).map_err(hound_to_io)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(hound_to_io)?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(hound_to_io)?
        }
    };

    Ok(StemBuffer::new(samples, spec.channels, spec.sample_rate))
}

fn hound_to_io(err: hound::Error) -> io::Error {
    match err {
        hound::Error::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
