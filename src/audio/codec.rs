//! # Audio Codec Utilities
//!
//! Pure conversions used on both directions of the voice session:
//!
//! - **Outbound**: microphone samples (`f32` in `[-1.0, 1.0]`) → 16-bit PCM,
//!   little-endian, mono → base64 text inside a JSON message
//! - **Inbound**: base64 text → PCM16LE bytes → playable `PlaybackBuffer`
//!
//! ## Audio Format:
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//! - **Descriptor**: `audio/pcm;rate=<Hz>`
//!
//! Nothing in here holds state, so every function is safe to call from the
//! real-time capture callback.

use crate::error::VoiceError;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Scale between the float domain and the 16-bit integer domain.
const PCM16_SCALE: f32 = 32768.0;

/// Build the MIME-like descriptor that tags every chunk on the wire.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert float samples to 16-bit PCM bytes (little-endian).
///
/// ## Conversion:
/// Each sample is scaled by 32768 and clamped to `[-32768, 32767]`, then cast.
/// The cast truncates toward zero, so out-of-range input saturates instead of
/// wrapping and NaN becomes silence.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * PCM16_SCALE).clamp(-32768.0, 32767.0) as i16;
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(scaled);
    }
    bytes
}

/// Convert 16-bit PCM bytes back to float samples in `[-1.0, 1.0)`.
///
/// ## Errors:
/// Returns `VoiceError::Decode` when the byte length is odd (half a sample).
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, VoiceError> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "PCM16 payload has odd length {} (half a sample)",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM16_SCALE);
    }
    Ok(samples)
}

/// Encode raw bytes as transport-safe text (standard base64 alphabet, padded).
pub fn binary_to_text(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode transport text produced by `binary_to_text`.
pub fn text_to_binary(text: &str) -> Result<Vec<u8>, VoiceError> {
    BASE64_STANDARD
        .decode(text)
        .map_err(|e| VoiceError::Decode(format!("invalid base64 payload: {}", e)))
}

/// A decoded fragment ready to be handed to an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono samples in `[-1.0, 1.0)`
    pub samples: Vec<f32>,
    /// Rate the samples were produced at
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Interpret `bytes` as PCM16LE mono at `sample_rate` and build a playable buffer.
pub fn decode_audio_buffer(bytes: &[u8], sample_rate: u32) -> Result<PlaybackBuffer, VoiceError> {
    let samples = decode_pcm16(bytes)?;
    Ok(PlaybackBuffer {
        samples,
        sample_rate,
    })
}

/// Transport representation of one audio frame or fragment.
///
/// Immutable once produced; the PCM bytes and their descriptor always travel
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    data: Vec<u8>,
    mime_type: String,
}

impl EncodedChunk {
    /// Encode a capture frame and tag it with the input rate descriptor.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: encode_pcm16(samples),
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Base64 form used inside JSON messages.
    pub fn to_text(&self) -> String {
        binary_to_text(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_known_values() {
        let bytes = encode_pcm16(&[0.0, 0.5, -0.5, 1.0, -1.0]);
        let expected: Vec<u8> = [0i16, 16384, -16384, 32767, -32768]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let bytes = encode_pcm16(&[3.5, -7.0]);
        assert_eq!(bytes, [32767i16.to_le_bytes(), (-32768i16).to_le_bytes()].concat());
    }

    #[test]
    fn test_encode_truncates_toward_zero() {
        // -1.5 / 32768 scales to -1.5 and truncates to -1, not -2
        let bytes = encode_pcm16(&[-1.5 / 32768.0, 1.5 / 32768.0]);
        assert_eq!(bytes, [(-1i16).to_le_bytes(), 1i16.to_le_bytes()].concat());
    }

    #[test]
    fn test_decode_rejects_half_sample() {
        let err = decode_audio_buffer(&[0u8; 3], 24000).unwrap_err();
        assert!(matches!(err, VoiceError::Decode(_)));
    }

    #[test]
    fn test_buffer_duration() {
        let buffer = decode_audio_buffer(&vec![0u8; 24000], 24000).unwrap();
        assert_eq!(buffer.samples.len(), 12000);
        assert!((buffer.duration() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_text_round_trip() {
        assert_eq!(binary_to_text(&[]), "");
        assert_eq!(text_to_binary("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_invalid_text_is_decode_error() {
        assert!(matches!(text_to_binary("not base64!!"), Err(VoiceError::Decode(_))));
    }

    #[test]
    fn test_chunk_of_silence() {
        let chunk = EncodedChunk::from_samples(&vec![0.0; 4096], 16000);
        assert_eq!(chunk.data().len(), 8192);
        assert!(chunk.data().iter().all(|&b| b == 0));
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
    }

    proptest! {
        #[test]
        fn prop_pcm16_within_one_step(samples in proptest::collection::vec(-1.0f32..=1.0f32, 0..512)) {
            let decoded = decode_pcm16(&encode_pcm16(&samples)).unwrap();
            prop_assert_eq!(decoded.len(), samples.len());
            for (original, restored) in samples.iter().zip(decoded.iter()) {
                prop_assert!((original - restored).abs() <= 1.0 / 32768.0 + f32::EPSILON);
            }
        }

        #[test]
        fn prop_text_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
            prop_assert_eq!(text_to_binary(&binary_to_text(&bytes)).unwrap(), bytes);
        }
    }
}
