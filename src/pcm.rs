//! PCM framing for the Live API audio channel
//!
//! Microphone audio is captured as normalized `f32` samples and leaves the
//! process as little-endian 16-bit PCM, base64 encoded. Model audio comes back
//! the same way at a higher rate and is turned back into `f32` for playback.

use base64::engine::general_purpose;
use base64::Engine;

/// Rate of the audio we send (microphone side).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the audio the model sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// MIME tag attached to every outgoing audio blob.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";
/// Samples per capture callback (~256ms at 16 kHz).
pub const CAPTURE_CHUNK_SAMPLES: usize = 4096;

const SCALE: f32 = 32768.0;

/// Convert normalized float samples to signed 16-bit PCM.
///
/// Input is clamped to [-1.0, 1.0]; `1.0` saturates to `i16::MAX`.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            (s.clamp(-1.0, 1.0) * SCALE)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Convert signed 16-bit PCM back to normalized float samples.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / SCALE).collect()
}

/// Little-endian byte view of a PCM buffer.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM bytes. A trailing odd byte is ignored.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Base64 text of a PCM buffer, as carried in a realtime input blob.
pub fn encode_pcm16(samples: &[i16]) -> String {
    general_purpose::STANDARD.encode(pcm16_to_bytes(samples))
}

/// Decode a base64 PCM payload straight to float samples.
pub fn decode_base64_chunk(data: &str) -> Result<Vec<f32>, base64::DecodeError> {
    let bytes = general_purpose::STANDARD.decode(data)?;
    Ok(pcm16_to_float(&bytes_to_pcm16(&bytes)))
}

/// Playback length of `samples` mono samples at `sample_rate`, in seconds.
pub fn chunk_duration(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / sample_rate as f64
}

/// Length of the base64 text produced for `samples` input samples.
pub fn encoded_len(samples: usize) -> usize {
    (samples * 2).div_ceil(3) * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const STEP: f32 = 1.0 / 32768.0;

    #[test]
    fn round_trip_stays_within_one_step() {
        let samples: Vec<f32> = (0..=2000).map(|i| -1.0 + i as f32 * 0.001).collect();
        let back = pcm16_to_float(&float_to_pcm16(&samples));
        for (orig, got) in samples.iter().zip(back.iter()) {
            assert_abs_diff_eq!(*orig, *got, epsilon = STEP + f32::EPSILON);
        }
    }

    #[test]
    fn extremes_saturate() {
        assert_eq!(float_to_pcm16(&[1.0, -1.0, 0.0]), vec![i16::MAX, i16::MIN, 0]);
        assert_eq!(float_to_pcm16(&[3.5, -7.0]), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn bytes_are_little_endian() {
        assert_eq!(pcm16_to_bytes(&[0x4000, -1]), vec![0x00, 0x40, 0xff, 0xff]);
        assert_eq!(bytes_to_pcm16(&[0x00, 0x40, 0x01]), vec![0x4000]);
    }

    #[test]
    fn decode_known_payload() {
        let data = general_purpose::STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        let samples = decode_base64_chunk(&data).unwrap();
        assert_eq!(samples.len(), 2);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(samples[1], -1.0, epsilon = 1e-6);

        assert!(decode_base64_chunk("not base64!").is_err());
    }

    #[test]
    fn capture_chunk_payload_size() {
        let payload = encode_pcm16(&float_to_pcm16(&vec![0.25; CAPTURE_CHUNK_SAMPLES]));
        assert_eq!(payload.len(), encoded_len(CAPTURE_CHUNK_SAMPLES));
        assert_eq!(payload.len(), 10_924);
    }

    #[test]
    fn durations() {
        assert_abs_diff_eq!(chunk_duration(24_000, OUTPUT_SAMPLE_RATE), 1.0);
        assert_abs_diff_eq!(chunk_duration(4096, INPUT_SAMPLE_RATE), 0.256);
    }
}
