//! Speech-to-text adapter
//!
//! Takes a session's accumulated audio buffer in one of the accepted
//! container formats and returns a single trimmed transcript. WAV input is
//! downmixed and resampled to 16 kHz mono before dispatch; compressed
//! containers go to the provider as-is.

pub mod wav;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use voice_gateway_core::{AudioContainer, ErrorKind};

/// Buffers smaller than this cannot contain usable speech.
const MIN_AUDIO_BYTES: usize = 1_000;

/// RMS floor (i16 units) below which WAV audio counts as silent.
const RMS_SILENCE_FLOOR: f64 = 100.0;

/// Transcription failures, mapped onto the wire taxonomy at the edge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("audio container not accepted")]
    Unsupported,

    #[error("audio buffer too short or silent")]
    Empty,

    #[error("transcription provider unreachable: {0}")]
    Unavailable(String),

    #[error("transcription exceeded its time budget")]
    Timeout,

    #[error("transcription provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed transcription response: {0}")]
    Malformed(String),
}

impl SttError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported => ErrorKind::AudioUnsupported,
            Self::Empty => ErrorKind::AudioEmpty,
            Self::Unavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Timeout => ErrorKind::ProviderTimeout,
            Self::Rejected { .. } => ErrorKind::ProviderRejected,
            Self::Malformed(_) => ErrorKind::ProviderRejected,
        }
    }
}

/// Buffered-audio transcription.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        container: AudioContainer,
    ) -> Result<String, SttError>;
}

/// HTTP transcriber configuration.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Total budget for one transcription.
    pub timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Whisper-style HTTP transcription client.
pub struct HttpTranscriber {
    client: reqwest::Client,
    config: SttConfig,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpTranscriber {
    pub fn new(config: SttConfig) -> Result<Self, SttError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SttError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Reject audio that cannot produce a transcript before spending a
    /// provider call on it.
    fn preflight(audio: &[u8], container: AudioContainer) -> Result<(), SttError> {
        if audio.len() < MIN_AUDIO_BYTES {
            return Err(SttError::Empty);
        }
        if container == AudioContainer::Wav {
            let parsed = wav::parse_wav(audio).map_err(|_| SttError::Unsupported)?;
            if parsed.samples.is_empty() {
                return Err(SttError::Empty);
            }
            if wav::rms(&parsed.samples) < RMS_SILENCE_FLOOR {
                return Err(SttError::Empty);
            }
        }
        Ok(())
    }

    /// Normalise WAV to 16 kHz mono for the provider; pass compressed
    /// containers through.
    fn preprocess(audio: &[u8], container: AudioContainer) -> Result<Vec<u8>, SttError> {
        if container != AudioContainer::Wav {
            return Ok(audio.to_vec());
        }
        let parsed = wav::parse_wav(audio).map_err(|_| SttError::Unsupported)?;
        let mono = wav::downmix_mono(&parsed.samples, parsed.channels);
        let resampled = wav::resample_linear(&mono, parsed.sample_rate, wav::PROVIDER_RATE);
        Ok(wav::encode_wav_mono(&resampled, wav::PROVIDER_RATE))
    }

    fn map_request_error(err: reqwest::Error) -> SttError {
        if err.is_timeout() {
            SttError::Timeout
        } else {
            SttError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        container: AudioContainer,
    ) -> Result<String, SttError> {
        Self::preflight(audio, container)?;
        let payload = Self::preprocess(audio, container)?;

        let file_name = format!("audio.{}", container.as_str());
        let mime = if container == AudioContainer::Wav {
            "audio/wav"
        } else {
            container.mime_type()
        };

        let part = reqwest::multipart::Part::bytes(payload)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| SttError::Malformed(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");

        let url = format!("{}/v1/audio/transcriptions", self.config.base_url);
        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "transcription provider rejected request");
            return Err(SttError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SttError::Malformed(e.to_string()))?;

        Ok(body.text.trim().to_string())
    }
}

/// Fixed-reply transcriber for tests and local bring-up. Still enforces the
/// empty-buffer rule so error paths stay exercisable.
pub struct FixedTranscriber {
    text: String,
    delay: Duration,
}

impl FixedTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: Duration::ZERO,
        }
    }

    /// Simulate provider latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        _container: AudioContainer,
    ) -> Result<String, SttError> {
        if audio.is_empty() {
            return Err(SttError::Empty);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_wav() -> Vec<u8> {
        let samples: Vec<i16> = (0..16_000)
            .map(|i| ((i as f64 * 0.05).sin() * 12_000.0) as i16)
            .collect();
        wav::encode_wav_mono(&samples, 16_000)
    }

    #[test]
    fn test_preflight_rejects_tiny_buffers() {
        let err = HttpTranscriber::preflight(b"tiny", AudioContainer::Webm).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioEmpty);
    }

    #[test]
    fn test_preflight_rejects_silent_wav() {
        let silent = wav::encode_wav_mono(&vec![0i16; 16_000], 16_000);
        let err = HttpTranscriber::preflight(&silent, AudioContainer::Wav).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioEmpty);
    }

    #[test]
    fn test_preflight_rejects_garbage_claiming_wav() {
        let garbage = vec![7u8; 4_000];
        let err = HttpTranscriber::preflight(&garbage, AudioContainer::Wav).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioUnsupported);
    }

    #[test]
    fn test_preflight_accepts_speechlike_wav() {
        assert!(HttpTranscriber::preflight(&loud_wav(), AudioContainer::Wav).is_ok());
    }

    #[test]
    fn test_preprocess_normalises_wav_to_16k_mono() {
        let samples: Vec<i16> = (0..44_100)
            .map(|i| ((i as f64 * 0.03).sin() * 8_000.0) as i16)
            .collect();
        let input = wav::encode_wav_mono(&samples, 44_100);

        let output = HttpTranscriber::preprocess(&input, AudioContainer::Wav).unwrap();
        let parsed = wav::parse_wav(&output).unwrap();
        assert_eq!(parsed.sample_rate, 16_000);
        assert_eq!(parsed.channels, 1);
    }

    #[test]
    fn test_preprocess_passes_compressed_through() {
        let opaque = vec![1u8; 5_000];
        let output = HttpTranscriber::preprocess(&opaque, AudioContainer::Webm).unwrap();
        assert_eq!(output, opaque);
    }

    #[tokio::test]
    async fn test_fixed_transcriber_trims() {
        let stt = FixedTranscriber::new("  hello there  ");
        let text = stt.transcribe(&[0u8; 2000], AudioContainer::Wav).await.unwrap();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn test_fixed_transcriber_rejects_empty() {
        let stt = FixedTranscriber::new("hello");
        let err = stt.transcribe(&[], AudioContainer::Wav).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioEmpty);
    }
}
