//! Application state
//!
//! Shared wiring across all handlers: configuration, the session store, the
//! shared conversation memory, and the three provider adapters.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;

use voice_gateway_agent::{ConversationMemory, MemoryConfig};
use voice_gateway_config::Settings;
use voice_gateway_llm::{ChatCompleter, ChatConfig, OpenAiChat};
use voice_gateway_pipeline::{
    FrameScheduler, HttpSynthesizer, HttpTranscriber, PacingTable, SchedulerConfig, SttConfig,
    Synthesizer, Transcriber, TtsConfig,
};

use crate::session::SessionStore;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub sessions: Arc<SessionStore>,
    /// Process-wide conversation memory handed to every session.
    pub memory: Arc<ConversationMemory>,
    pub stt: Arc<dyn Transcriber>,
    pub scheduler: Arc<FrameScheduler>,
    /// Prometheus render handle; `None` until the exporter is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the real HTTP providers from settings.
    pub fn new(config: Settings) -> Self {
        let stt = HttpTranscriber::new(SttConfig {
            base_url: config.stt_base_url.clone(),
            api_key: config.stt_api_key.clone(),
            timeout: Duration::from_secs(config.stt_timeout_s),
            ..Default::default()
        })
        .expect("failed to build transcription client");

        let llm = OpenAiChat::new(ChatConfig {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            timeout: Duration::from_secs(config.llm_timeout_s),
        })
        .expect("failed to build chat client");

        let synth = HttpSynthesizer::new(TtsConfig {
            base_url: config.tts_base_url.clone(),
            api_key: config.tts_api_key.clone(),
            ..Default::default()
        })
        .expect("failed to build synthesis client");

        let mut state = Self::with_providers(config, Arc::new(stt), Arc::new(llm), Arc::new(synth));
        state.metrics = crate::metrics::install_exporter();
        state
    }

    /// Assemble state around explicit provider implementations. Tests inject
    /// the in-crate doubles here.
    pub fn with_providers(
        config: Settings,
        stt: Arc<dyn Transcriber>,
        llm: Arc<dyn ChatCompleter>,
        synth: Arc<dyn Synthesizer>,
    ) -> Self {
        let memory = ConversationMemory::new(
            llm,
            MemoryConfig {
                max_turns: config.memory_max_turns,
                system_prompt: config.system_prompt.clone(),
            },
        );

        let scheduler = FrameScheduler::new(
            synth,
            SchedulerConfig {
                pacing: PacingTable {
                    fast_delay: Duration::from_millis(config.pacing.fast_delay_ms),
                    default_delay: Duration::from_millis(config.pacing.default_delay_ms),
                    relaxed_delay: Duration::from_millis(config.pacing.relaxed_delay_ms),
                    high_watermark: config.pacing.high_watermark,
                    low_watermark: config.pacing.low_watermark,
                },
                first_chunk_timeout: Duration::from_secs(config.tts_first_chunk_timeout_s),
            },
        );

        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new()),
            memory: Arc::new(memory),
            stt,
            scheduler: Arc::new(scheduler),
            metrics: None,
        }
    }

    pub fn stt_timeout(&self) -> Duration {
        Duration::from_secs(self.config.stt_timeout_s)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm_timeout_s)
    }
}
