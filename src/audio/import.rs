//! WAV decoding for effects-only renders.

use super::AudioIoError;
use crate::render::AudioBuffer;
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::info;

/// A decoded WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub buffer: AudioBuffer,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Reads a WAV file into a planar float buffer.
///
/// Integer PCM of 8 to 32 bits is scaled to -1.0..1.0; 32-bit float is read
/// as is.
///
/// # Errors
///
/// Returns error if the file cannot be opened or decoded, or uses an
/// unsupported sample format.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<WavAudio, AudioIoError> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (SampleFormat::Float, bits) => {
            return Err(AudioIoError::Unsupported {
                bits,
                format: "float",
            })
        }
        (SampleFormat::Int, bits) => {
            return Err(AudioIoError::Unsupported {
                bits,
                format: "integer",
            })
        }
    };

    let mut planar = vec![Vec::with_capacity(interleaved.len() / channels.max(1)); channels];
    for frame in interleaved.chunks_exact(channels.max(1)) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    let buffer = AudioBuffer::from_channels(planar);

    info!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        channels,
        samples = buffer.num_samples(),
        "input audio loaded"
    );
    Ok(WavAudio {
        buffer,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use hound::{WavSpec, WavWriter};
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vstrender_import_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_reads_rendered_float_file() {
        let path = temp_path("float.wav");
        let source = AudioBuffer::from_channels(vec![vec![0.1, 0.2, 0.3], vec![-0.1, -0.2, -0.3]]);
        write_wav(&path, &source, 32000, 32).unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 32000);
        assert_eq!(audio.bits_per_sample, 32);
        assert_eq!(audio.buffer, source);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_reads_mono_16_bit() {
        let path = temp_path("mono16.wav");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for sample in [0i16, 16384, -32768] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.buffer.num_channels(), 1);
        assert_eq!(audio.buffer.channel(0), &[0.0, 0.5, -1.0]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        assert!(read_wav("/nonexistent/input.wav").is_err());
    }
}
