//! Gateway settings
//!
//! Recognised environment variables map one-to-one onto the fields below
//! (`HOST`, `PORT`, `LLM_MODEL`, `MEMORY_MAX_TURNS`, ...). Every field has a
//! serviceable default so a bare environment still boots.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Chat model identifier.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Sampling temperature for completions.
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,

    /// Completion token cap. Voice replies stay short.
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,

    /// Default synthesis voice.
    #[serde(default = "default_tts_voice_id")]
    pub tts_voice_id: String,

    /// Maximum non-system turns retained in conversation memory.
    #[serde(default = "default_memory_max_turns")]
    pub memory_max_turns: usize,

    /// Total budget for one transcription, seconds.
    #[serde(default = "default_stt_timeout_s")]
    pub stt_timeout_s: u64,

    /// Total budget for one completion, seconds.
    #[serde(default = "default_llm_timeout_s")]
    pub llm_timeout_s: u64,

    /// Budget for the first synthesis chunk, seconds.
    #[serde(default = "default_tts_first_chunk_timeout_s")]
    pub tts_first_chunk_timeout_s: u64,

    /// Destroy sessions idle for longer than this many minutes.
    /// Unset disables the sweep.
    #[serde(default)]
    pub idle_timeout_min: Option<u64>,

    /// System directive pinned at the head of conversation memory.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Log filter level when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[serde(default)]
    pub log_json: bool,

    /// Transcription provider endpoint.
    #[serde(default = "default_stt_base_url")]
    pub stt_base_url: String,

    /// Chat provider endpoint.
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,

    /// Synthesis provider endpoint.
    #[serde(default = "default_tts_base_url")]
    pub tts_base_url: String,

    /// Provider credentials, opaque to the core.
    #[serde(default)]
    pub stt_api_key: Option<String>,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub tts_api_key: Option<String>,

    /// Adaptive pacing table.
    #[serde(default)]
    pub pacing: PacingSettings,

    /// Inbound rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            llm_model: default_llm_model(),
            llm_temperature: default_llm_temperature(),
            llm_max_tokens: default_llm_max_tokens(),
            tts_voice_id: default_tts_voice_id(),
            memory_max_turns: default_memory_max_turns(),
            stt_timeout_s: default_stt_timeout_s(),
            llm_timeout_s: default_llm_timeout_s(),
            tts_first_chunk_timeout_s: default_tts_first_chunk_timeout_s(),
            idle_timeout_min: None,
            system_prompt: default_system_prompt(),
            log_level: default_log_level(),
            log_json: false,
            stt_base_url: default_stt_base_url(),
            llm_base_url: default_llm_base_url(),
            tts_base_url: default_tts_base_url(),
            stt_api_key: None,
            llm_api_key: None,
            tts_api_key: None,
            pacing: PacingSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Settings {
    /// Validate ranges that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory_max_turns".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm_temperature".to_string(),
                message: "must be between 0.0 and 2.0".to_string(),
            });
        }

        self.pacing.validate()?;

        Ok(())
    }
}

/// Adaptive pacing thresholds. The defaults are the gateway contract; they
/// exist as settings so deployments can tune them without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSettings {
    /// Delay when the client buffer is deep (ms).
    #[serde(default = "default_pacing_fast_ms")]
    pub fast_delay_ms: u64,

    /// Delay under typical load (ms). Compensates for emit-path overhead so
    /// the client observes about 20 ms between frames.
    #[serde(default = "default_pacing_default_ms")]
    pub default_delay_ms: u64,

    /// Delay when the client buffer is shallow (ms).
    #[serde(default = "default_pacing_relaxed_ms")]
    pub relaxed_delay_ms: u64,

    /// Buffer depth above which the fast delay applies.
    #[serde(default = "default_pacing_high_watermark")]
    pub high_watermark: u32,

    /// Buffer depth below which the relaxed delay applies.
    #[serde(default = "default_pacing_low_watermark")]
    pub low_watermark: u32,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            fast_delay_ms: default_pacing_fast_ms(),
            default_delay_ms: default_pacing_default_ms(),
            relaxed_delay_ms: default_pacing_relaxed_ms(),
            high_watermark: default_pacing_high_watermark(),
            low_watermark: default_pacing_low_watermark(),
        }
    }
}

impl PacingSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.low_watermark >= self.high_watermark {
            return Err(ConfigError::InvalidValue {
                field: "pacing.low_watermark".to_string(),
                message: "must be below pacing.high_watermark".to_string(),
            });
        }
        if self.fast_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pacing.fast_delay_ms".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-connection inbound rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum inbound messages per second.
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    /// Maximum inbound audio bytes per second.
    #[serde(default = "default_audio_bytes_per_second")]
    pub audio_bytes_per_second: u32,

    /// Burst allowance as a multiple of the steady rate.
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: default_messages_per_second(),
            audio_bytes_per_second: default_audio_bytes_per_second(),
            burst_multiplier: default_burst_multiplier(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_temperature() -> f32 {
    0.7
}
fn default_llm_max_tokens() -> u32 {
    150
}
fn default_tts_voice_id() -> String {
    "a0e99841-438c-4a64-b679-ae501e7d6091".to_string()
}
fn default_memory_max_turns() -> usize {
    50
}
fn default_stt_timeout_s() -> u64 {
    30
}
fn default_llm_timeout_s() -> u64 {
    30
}
fn default_tts_first_chunk_timeout_s() -> u64 {
    10
}
fn default_system_prompt() -> String {
    "You are a helpful AI assistant having a voice conversation with a human. \
     Keep your responses concise and natural for speech."
        .to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_stt_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_tts_base_url() -> String {
    "https://api.cartesia.ai".to_string()
}
fn default_pacing_fast_ms() -> u64 {
    14
}
fn default_pacing_default_ms() -> u64 {
    16
}
fn default_pacing_relaxed_ms() -> u64 {
    20
}
fn default_pacing_high_watermark() -> u32 {
    100
}
fn default_pacing_low_watermark() -> u32 {
    40
}
fn default_true() -> bool {
    true
}
fn default_messages_per_second() -> u32 {
    100
}
fn default_audio_bytes_per_second() -> u32 {
    // 16 kHz * 2 bytes with headroom for compressed chunk bursts
    64_000
}
fn default_burst_multiplier() -> f32 {
    2.0
}

/// Load settings from the process environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let config = Config::builder()
        .add_source(Environment::default().try_parsing(true))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.memory_max_turns, 50);
        assert_eq!(settings.stt_timeout_s, 30);
        assert_eq!(settings.tts_first_chunk_timeout_s, 10);
        assert!(settings.idle_timeout_min.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_pacing_defaults_match_contract() {
        let pacing = PacingSettings::default();
        assert_eq!(pacing.fast_delay_ms, 14);
        assert_eq!(pacing.default_delay_ms, 16);
        assert_eq!(pacing.relaxed_delay_ms, 20);
        assert_eq!(pacing.high_watermark, 100);
        assert_eq!(pacing.low_watermark, 40);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.memory_max_turns = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.llm_temperature = 5.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pacing.low_watermark = 200;
        assert!(settings.validate().is_err());
    }
}
