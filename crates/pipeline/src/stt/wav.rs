//! Minimal RIFF/WAVE handling for transcription preflight
//!
//! Only what the gateway needs: parse 16-bit PCM WAV, downmix to mono,
//! linear-resample to the provider's preferred 16 kHz, and re-encode.
//! Compressed containers are forwarded to the provider untouched.

/// Target rate for provider dispatch.
pub const PROVIDER_RATE: u32 = 16_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    NotWave,
    #[error("unsupported WAV encoding (want 16-bit PCM)")]
    UnsupportedEncoding,
    #[error("truncated WAV data")]
    Truncated,
}

/// Parse a 16-bit PCM WAV file.
pub fn parse_wav(bytes: &[u8]) -> Result<WavAudio, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotWave);
    }

    let mut channels = 0u16;
    let mut sample_rate = 0u32;
    let mut bits_per_sample = 0u16;
    let mut data: Option<&[u8]> = None;

    // Walk the chunk list; chunks are word-aligned.
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body_start = pos + 8;
        let body_end = body_start.checked_add(size).ok_or(WavError::Truncated)?;
        if body_end > bytes.len() {
            return Err(WavError::Truncated);
        }
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(WavError::Truncated);
                }
                let format = u16::from_le_bytes([body[0], body[1]]);
                if format != 1 {
                    return Err(WavError::UnsupportedEncoding);
                }
                channels = u16::from_le_bytes([body[2], body[3]]);
                sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                bits_per_sample = u16::from_le_bytes([body[14], body[15]]);
            }
            b"data" => data = Some(body),
            _ => {}
        }

        pos = body_end + (size & 1);
    }

    if channels == 0 || sample_rate == 0 {
        return Err(WavError::NotWave);
    }
    if bits_per_sample != 16 {
        return Err(WavError::UnsupportedEncoding);
    }
    let data = data.ok_or(WavError::Truncated)?;

    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(WavAudio {
        channels,
        sample_rate,
        samples,
    })
}

/// Average interleaved channels down to mono.
pub fn downmix_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear interpolation resampler. Adequate for speech headed to a
/// transcription model; not used on the synthesis path.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as u64 * to_rate as u64) / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    let step = from_rate as f64 / to_rate as f64;

    for i in 0..out_len {
        let src = i as f64 * step;
        let idx = src as usize;
        let frac = src - idx as f64;
        let a = samples[idx.min(samples.len() - 1)] as f64;
        let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
        out.push((a + (b - a) * frac).round() as i16);
    }

    out
}

/// Encode mono 16-bit PCM as a WAV file.
pub fn encode_wav_mono(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }

    out
}

/// Root-mean-square amplitude in i16 units.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, seconds: f64, amplitude: f64) -> Vec<i16> {
        let count = (rate as f64 * seconds) as usize;
        (0..count)
            .map(|i| {
                let t = i as f64 / rate as f64;
                ((t * 440.0 * std::f64::consts::TAU).sin() * amplitude * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_wav_roundtrip() {
        let samples = tone(22_050, 0.1, 0.5);
        let encoded = encode_wav_mono(&samples, 22_050);
        let parsed = parse_wav(&encoded).unwrap();

        assert_eq!(parsed.channels, 1);
        assert_eq!(parsed.sample_rate, 22_050);
        assert_eq!(parsed.samples, samples);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_wav(b"not-audio"), Err(WavError::NotWave));
        assert_eq!(parse_wav(&[]), Err(WavError::NotWave));
    }

    #[test]
    fn test_parse_rejects_truncated_data_chunk() {
        let mut encoded = encode_wav_mono(&tone(16_000, 0.05, 0.5), 16_000);
        encoded.truncate(encoded.len() - 10);
        assert_eq!(parse_wav(&encoded), Err(WavError::Truncated));
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = vec![100, 200, -100, -200, 0, 50];
        assert_eq!(downmix_mono(&stereo, 2), vec![150, -150, 25]);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples = tone(32_000, 0.1, 0.5);
        let resampled = resample_linear(&samples, 32_000, 16_000);
        assert_eq!(resampled.len(), samples.len() / 2);
    }

    #[test]
    fn test_resample_identity_when_rates_match() {
        let samples = tone(16_000, 0.05, 0.5);
        assert_eq!(resample_linear(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(rms(&vec![0i16; 1000]), 0.0);
        assert!(rms(&tone(16_000, 0.05, 0.5)) > 1000.0);
    }
}
