//! # Audio Decoding
//!
//! Turns an uploaded audio file into 16 kHz mono `f32` samples, the only
//! representation the Whisper front-end accepts.
//!
//! ## Supported inputs:
//! - Anything symphonia can probe (WAV, FLAC, MP3, OGG/Vorbis, AAC/M4A, ...).
//!   The file extension is passed as a probe hint.
//! - Headerless `.pcm` / `.raw` files, read as 16-bit little-endian mono at 16 kHz.
//!
//! Multi-channel audio is downmixed by averaging; other sample rates are
//! resampled with a windowed-sinc resampler.

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Sample rate every model input is converted to.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode the file at `path` to 16 kHz mono samples in `[-1.0, 1.0]`.
///
/// Fails when the container or codec is not recognised, or when no samples
/// could be decoded at all.
pub fn load_audio(path: &Path) -> Result<Vec<f32>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let samples = match extension.as_deref() {
        Some("pcm") | Some("raw") => read_raw_pcm(path)?,
        _ => decode_with_symphonia(path, extension.as_deref())?,
    };

    if samples.is_empty() {
        return Err(anyhow!("no audio samples decoded from input"));
    }

    debug!(
        samples = samples.len(),
        duration_secs = samples.len() as f32 / TARGET_SAMPLE_RATE as f32,
        "Audio decoded to 16kHz mono PCM"
    );

    Ok(samples)
}

/// Zero-pad or truncate `samples` to exactly `length` samples.
pub fn pad_or_trim(samples: &[f32], length: usize) -> Vec<f32> {
    let mut out = samples[..samples.len().min(length)].to_vec();
    out.resize(length, 0.0);
    out
}

fn read_raw_pcm(path: &Path) -> Result<Vec<f32>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();

    loop {
        match reader.read_i16::<LittleEndian>() {
            Ok(sample) => samples.push(sample as f32 / 32768.0),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(samples)
}

fn decode_with_symphonia(path: &Path, extension: Option<&str>) -> Result<Vec<f32>> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("unsupported audio format: {}", e))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no audio track found"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("unsupported codec: {}", e))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("failed to read audio packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(anyhow!("failed to decode audio: {}", e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        if channels > 1 {
            samples.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            samples.extend_from_slice(buffer.samples());
        }
    }

    if samples.is_empty() || source_rate == TARGET_SAMPLE_RATE {
        return Ok(samples);
    }

    resample(&samples, source_rate, TARGET_SAMPLE_RATE)
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| anyhow!("resampler init: {}", e))?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let mut input = chunk.to_vec();
        input.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| anyhow!("resample: {}", e))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    output.truncate((samples.len() as f64 * ratio) as usize);
    debug!(from_rate, to_rate, "Resampled audio");

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name))
    }

    #[test]
    fn test_decode_wav_16k_mono() {
        let path = scratch("mono.wav");
        write_wav(&path, 16_000, 1, 16_000);

        let samples = load_audio(&path).unwrap();
        assert_eq!(samples.len(), 16_000);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_decode_downmixes_and_resamples() {
        let path = scratch("stereo.wav");
        write_wav(&path, 32_000, 2, 32_000);

        let samples = load_audio(&path).unwrap();
        // One second of audio either way, give or take resampler edges
        assert!((samples.len() as i64 - 16_000).abs() < 100, "got {}", samples.len());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_raw_pcm() {
        let path = scratch("speech.pcm");
        let mut file = File::create(&path).unwrap();
        for sample in [0i16, 16384, -16384, 32767] {
            file.write_i16::<LittleEndian>(sample).unwrap();
        }
        file.flush().unwrap();

        let samples = load_audio(&path).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 32767.0 / 32768.0]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_garbage_is_rejected() {
        let path = scratch("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(load_audio(&path).is_err());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_pad_or_trim() {
        assert_eq!(pad_or_trim(&[1.0, 2.0], 4), vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(pad_or_trim(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
    }
}
