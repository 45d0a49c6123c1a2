//! Frame codec
//!
//! Converts between float samples and 16-bit little-endian PCM. Inbound frames
//! may also arrive wrapped in a RIFF/WAV container, which is detected by its
//! signature and handed to `hound`.

use std::io::Cursor;
use tracing::debug;

/// Signature of a RIFF (WAV) container.
const RIFF_SIGNATURE: &[u8; 4] = b"RIFF";

/// Errors from decoding a single audio frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("WAV container error: {0}")]
    Container(#[from] hound::Error),

    #[error("Unsupported sample format: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Samples decoded from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    /// Rate declared by the container, if the frame carried one.
    pub sample_rate: Option<u32>,
}

/// Decode a frame to mono float samples in [-1.0, 1.0].
pub fn decode(bytes: &[u8]) -> Result<DecodedAudio> {
    if has_container(bytes) {
        return decode_wav(bytes);
    }

    if bytes.len() % 2 != 0 {
        debug!("Dropping trailing byte of odd-length PCM frame ({} bytes)", bytes.len());
    }

    Ok(DecodedAudio {
        samples: pcm16_to_f32(bytes),
        sample_rate: None,
    })
}

/// Encode float samples as 16-bit little-endian PCM.
///
/// Samples are clamped to [-1.0, 1.0] and rounded to the nearest integer
/// step (ties away from zero).
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * 32768.0).round();
        let value = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Whether `bytes` starts with a known container signature.
pub fn has_container(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == RIFF_SIGNATURE
}

fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        (format, bits) => {
            return Err(CodecError::Unsupported(format!("{:?} {}-bit", format, bits)));
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: Some(spec.sample_rate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_encode_known_values() {
        let bytes = encode(&[0.0, 0.5, -0.5, 1.0, -1.0, 2.0, -3.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![0, 16384, -16384, 32767, -32768, 32767, -32768]);
    }

    #[test]
    fn test_decode_raw_pcm() {
        let mut bytes = Vec::new();
        for v in [0i16, 16384, -32768, 32767] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, None);
        assert_eq!(decoded.samples, vec![0.0, 0.5, -1.0, 32767.0 / 32768.0]);
    }

    #[test]
    fn test_round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([1.0, -1.0, 0.0, 1e-6, -1e-6])
            .collect();
        let decoded = decode(&encode(&samples)).unwrap().samples;
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_odd_length_frame_drops_trailing_byte() {
        let decoded = decode(&[0x00, 0x40, 0x7f]).unwrap();
        assert_eq!(decoded.samples, vec![0.5]);
    }

    #[test]
    fn test_decode_wav_container() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            for v in [0i16, 8192, -16384] {
                w.write_sample(v).unwrap();
            }
        });
        assert!(has_container(&bytes));

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, Some(24_000));
        assert_eq!(decoded.samples, vec![0.0, 0.25, -0.5]);
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for v in [0.5f32, -0.5, 1.0, 0.0] {
                w.write_sample(v).unwrap();
            }
        });

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, Some(48_000));
        assert_eq!(decoded.samples, vec![0.0, 0.5]);
    }

    #[test]
    fn test_truncated_container_is_an_error() {
        let result = decode(b"RIFF\x10\x00\x00\x00WAVE");
        assert!(matches!(result, Err(CodecError::Container(_))));
    }
}
