//! Text-to-speech adapter
//!
//! Exposes synthesis as a cancellable, lazily produced sequence of float PCM
//! chunks at 22050 Hz mono. Nothing buffers the whole utterance: chunks are
//! decoded and handed over as the provider produces them, and a cancel signal
//! stops the decode promptly at the next chunk boundary.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_gateway_core::{ErrorKind, SAMPLE_RATE};

/// Float PCM chunks as they arrive from the provider. The channel closing
/// without an error is end-of-stream.
pub type SampleStream = mpsc::Receiver<Result<Vec<f32>, TtsError>>;

/// Synthesis failures, mapped onto the wire taxonomy at the edge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("synthesis provider unreachable: {0}")]
    Unavailable(String),

    #[error("synthesis exceeded its time budget")]
    Timeout,

    #[error("synthesis provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed synthesis stream: {0}")]
    Malformed(String),
}

impl TtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Timeout => ErrorKind::ProviderTimeout,
            Self::Rejected { .. } => ErrorKind::ProviderRejected,
            Self::Malformed(_) => ErrorKind::ProviderRejected,
        }
    }
}

/// Streaming synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing `text` with the given voice. Returns once the
    /// provider has accepted the request; audio follows on the stream.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        cancel: CancellationToken,
    ) -> Result<SampleStream, TtsError>;
}

/// HTTP synthesizer configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model_id: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cartesia.ai".to_string(),
            api_key: None,
            model_id: "sonic-english".to_string(),
        }
    }
}

/// Streaming HTTP synthesis client speaking raw `pcm_f32le`.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: TtsConfig,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> Result<Self, TtsError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TtsError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn map_request_error(err: reqwest::Error) -> TtsError {
        if err.is_timeout() {
            TtsError::Timeout
        } else {
            TtsError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        cancel: CancellationToken,
    ) -> Result<SampleStream, TtsError> {
        let body = serde_json::json!({
            "model_id": self.config.model_id,
            "transcript": text,
            "voice": { "mode": "id", "id": voice_id },
            "output_format": {
                "container": "raw",
                "encoding": "pcm_f32le",
                "sample_rate": SAMPLE_RATE,
            },
        });

        let url = format!("{}/tts/bytes", self.config.base_url);
        let mut request = self
            .client
            .post(&url)
            .header("Cartesia-Version", "2024-06-10")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "synthesis provider rejected request");
            return Err(TtsError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let (tx, rx) = mpsc::channel(8);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            // Carry bytes across chunk boundaries that split an f32.
            let mut carry: Vec<u8> = Vec::with_capacity(4);

            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = byte_stream.next() => item,
                };

                let bytes = match item {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(Self::map_request_error(e))).await;
                        break;
                    }
                    None => {
                        if !carry.is_empty() {
                            tracing::warn!(
                                bytes = carry.len(),
                                "synthesis stream ended mid-sample; trailing bytes discarded"
                            );
                        }
                        break;
                    }
                };

                carry.extend_from_slice(&bytes);
                let whole = carry.len() - carry.len() % 4;
                if whole == 0 {
                    continue;
                }

                let samples: Vec<f32> = carry[..whole]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                carry.drain(..whole);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(Ok(samples)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Deterministic synthesizer for tests and local bring-up: a fixed-length
/// sine tone delivered in chunks, with optional injected latency and
/// failures.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    total_samples: usize,
    chunk_samples: usize,
    frequency: f32,
    chunk_delay: Duration,
    /// Fail after yielding this many chunks; `Some(0)` fails the request
    /// itself before any audio.
    fail_after: Option<usize>,
}

impl ToneSynthesizer {
    pub fn new(total_samples: usize) -> Self {
        Self {
            total_samples,
            chunk_samples: 2_205,
            frequency: 220.0,
            chunk_delay: Duration::ZERO,
            fail_after: None,
        }
    }

    pub fn with_chunk_samples(mut self, chunk_samples: usize) -> Self {
        self.chunk_samples = chunk_samples.max(1);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }
}

#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_id: &str,
        cancel: CancellationToken,
    ) -> Result<SampleStream, TtsError> {
        if self.fail_after == Some(0) {
            return Err(TtsError::Unavailable("injected synthesis failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(8);
        let config = self.clone();

        tokio::spawn(async move {
            let mut emitted = 0usize;
            let mut chunks_sent = 0usize;

            while emitted < config.total_samples {
                if let Some(limit) = config.fail_after {
                    if chunks_sent == limit {
                        let _ = tx
                            .send(Err(TtsError::Unavailable(
                                "injected synthesis failure".to_string(),
                            )))
                            .await;
                        return;
                    }
                }

                if !config.chunk_delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(config.chunk_delay) => {}
                    }
                }

                let count = config.chunk_samples.min(config.total_samples - emitted);
                let chunk: Vec<f32> = (emitted..emitted + count)
                    .map(|i| {
                        let t = i as f32 / SAMPLE_RATE as f32;
                        (t * config.frequency * std::f32::consts::TAU).sin() * 0.4
                    })
                    .collect();
                emitted += count;
                chunks_sent += 1;

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(Ok(chunk)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut stream: SampleStream) -> (Vec<f32>, Option<TtsError>) {
        let mut samples = Vec::new();
        while let Some(item) = stream.recv().await {
            match item {
                Ok(chunk) => samples.extend(chunk),
                Err(e) => return (samples, Some(e)),
            }
        }
        (samples, None)
    }

    #[tokio::test]
    async fn test_tone_yields_exact_sample_count() {
        let synth = ToneSynthesizer::new(5_000).with_chunk_samples(1_024);
        let stream = synth
            .synthesize("hi", "voice", CancellationToken::new())
            .await
            .unwrap();
        let (samples, err) = collect(stream).await;
        assert!(err.is_none());
        assert_eq!(samples.len(), 5_000);
    }

    #[tokio::test]
    async fn test_tone_is_deterministic() {
        let synth = ToneSynthesizer::new(3_000);
        let a = collect(
            synth
                .synthesize("hi", "voice", CancellationToken::new())
                .await
                .unwrap(),
        )
        .await
        .0;
        let b = collect(
            synth
                .synthesize("hi", "voice", CancellationToken::new())
                .await
                .unwrap(),
        )
        .await
        .0;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_zero_samples_is_immediate_end() {
        let synth = ToneSynthesizer::new(0);
        let stream = synth
            .synthesize("", "voice", CancellationToken::new())
            .await
            .unwrap();
        let (samples, err) = collect(stream).await;
        assert!(samples.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_failure_before_first_chunk() {
        let synth = ToneSynthesizer::new(5_000).failing_after(0);
        let err = synth
            .synthesize("hi", "voice", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_failure_mid_stream() {
        let synth = ToneSynthesizer::new(50_000)
            .with_chunk_samples(1_000)
            .failing_after(3);
        let stream = synth
            .synthesize("hi", "voice", CancellationToken::new())
            .await
            .unwrap();
        let (samples, err) = collect(stream).await;
        assert_eq!(samples.len(), 3_000);
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn test_cancel_stops_stream_promptly() {
        let cancel = CancellationToken::new();
        let synth = ToneSynthesizer::new(1_000_000)
            .with_chunk_samples(500)
            .with_chunk_delay(Duration::from_millis(5));
        let mut stream = synth
            .synthesize("hi", "voice", cancel.clone())
            .await
            .unwrap();

        // take a couple of chunks, then cancel
        let _ = stream.recv().await;
        let _ = stream.recv().await;
        cancel.cancel();

        // the stream must terminate rather than run out the full tone
        let mut extra = 0;
        while let Some(item) = stream.recv().await {
            assert!(item.is_ok());
            extra += 1;
            assert!(extra < 4, "stream kept producing after cancel");
        }
    }
}
