//! Audio export functionality.
//!
//! Writes a rendered buffer to a WAV file. The file is written next to its
//! destination under a `.partial` name and only renamed into place once it
//! has been finalized, so an interrupted render never leaves a truncated
//! result at the output path.

use super::AudioIoError;
use crate::config::{DEFAULT_BIT_DEPTH, SUPPORTED_BIT_DEPTHS};
use crate::render::AudioBuffer;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const I16_SCALE: f32 = 32767.0;
const I24_SCALE: f32 = 8_388_607.0;

/// Path the writer uses before renaming into place: `<name>.partial`.
pub fn partial_path(path: &Path) -> Result<PathBuf, AudioIoError> {
    let mut name = path
        .file_name()
        .ok_or_else(|| AudioIoError::InvalidPath(path.to_path_buf()))?
        .to_os_string();
    name.push(".partial");
    Ok(path.with_file_name(name))
}

/// Writes a buffer to a WAV file.
///
/// # Arguments
///
/// * `path` - Destination file; parent directories are created
/// * `buffer` - Planar audio, one WAV channel per buffer channel
/// * `sample_rate` - Sample rate stored in the header
/// * `bit_depth` - 16 or 24 for integer PCM, 32 for IEEE float; anything
///   else is written as 24-bit
///
/// # Errors
///
/// Returns error if:
/// - The buffer has no channels
/// - The output file cannot be created or renamed
/// - Encoding fails
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    buffer: &AudioBuffer,
    sample_rate: u32,
    bit_depth: u16,
) -> Result<(), AudioIoError> {
    let path = path.as_ref();
    if buffer.num_channels() == 0 {
        return Err(AudioIoError::NoChannels);
    }

    let bit_depth = if SUPPORTED_BIT_DEPTHS.contains(&bit_depth) {
        bit_depth
    } else {
        warn!(requested = bit_depth, "unsupported bit depth, writing 24-bit");
        DEFAULT_BIT_DEPTH
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let partial = partial_path(path)?;
    let result = write_samples(&partial, buffer, sample_rate, bit_depth)
        .and_then(|()| fs::rename(&partial, path).map_err(AudioIoError::from));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
        return result;
    }

    info!(
        path = %path.display(),
        channels = buffer.num_channels(),
        samples = buffer.num_samples(),
        sample_rate,
        bit_depth,
        duration = %format!("{:.2}s", buffer.num_samples() as f64 / sample_rate as f64),
        "audio written"
    );
    Ok(())
}

fn write_samples(
    path: &Path,
    buffer: &AudioBuffer,
    sample_rate: u32,
    bit_depth: u16,
) -> Result<(), AudioIoError> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };
    let mut writer = WavWriter::create(path, spec)?;

    // Interleave frame by frame
    for frame in 0..buffer.num_samples() {
        for channel in buffer.channels() {
            let sample = channel[frame];
            match bit_depth {
                16 => writer.write_sample((sample * I16_SCALE).clamp(-32768.0, 32767.0) as i16)?,
                32 => writer.write_sample(sample)?,
                _ => writer
                    .write_sample((sample * I24_SCALE).clamp(-8_388_608.0, 8_388_607.0) as i32)?,
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vstrender_export_{}", std::process::id()))
            .join(name)
    }

    fn test_buffer() -> AudioBuffer {
        AudioBuffer::from_channels(vec![
            vec![0.0, 0.5, -0.5, 1.0, -1.0],
            vec![0.25, -0.25, 2.0, -2.0, 0.0],
        ])
    }

    #[test]
    fn test_write_16_bit() {
        let path = temp_path("sixteen.wav");
        write_wav(&path, &test_buffer(), 44100, 16).unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        // Interleaved, clipped at full scale
        assert_eq!(samples.len(), 10);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[2], 16383);
        assert_eq!(samples[5], 32767);
        assert_eq!(samples[7], -32768);
        assert_eq!(samples[8], -32767);

        assert!(!partial_path(&path).unwrap().exists());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_float_and_24_bit() {
        let path = temp_path("float.wav");
        write_wav(&path, &test_buffer(), 48000, 32).unwrap();
        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[5], 2.0);
        fs::remove_file(&path).unwrap();

        let path = temp_path("coerced.wav");
        write_wav(&path, &test_buffer(), 48000, 12).unwrap();
        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 24);
        assert_eq!(reader.spec().sample_format, SampleFormat::Int);
        let samples: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[6], 8_388_607);
        assert_eq!(samples[7], -8_388_608);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_creates_parent_directories() {
        let path = temp_path("nested/deeper/out.wav");
        write_wav(&path, &test_buffer(), 22050, 24).unwrap();
        assert!(path.exists());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_partial_path_and_empty_buffer() {
        assert_eq!(
            partial_path(Path::new("renders/song.wav")).unwrap(),
            PathBuf::from("renders/song.wav.partial")
        );
        assert!(matches!(
            write_wav(temp_path("none.wav"), &AudioBuffer::new(0, 10), 44100, 16),
            Err(AudioIoError::NoChannels)
        ));
    }
}
