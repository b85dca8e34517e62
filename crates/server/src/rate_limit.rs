//! Per-connection inbound rate limiting
//!
//! Each connection carries two spend budgets, one counted in messages and
//! one in audio bytes. A budget tracks accumulated spend as a debt that
//! decays at the configured rate; a request is admitted while the decayed
//! debt plus its cost stays under the burst ceiling. Equivalent to a token
//! bucket, but there is nothing to refill and no stored token count.

use std::time::Instant;

use voice_gateway_config::RateLimitSettings;

/// Decaying spend meter.
#[derive(Debug)]
struct Budget {
    /// Burst ceiling: rate times the burst multiplier.
    ceiling: f64,
    /// Debt drained per second.
    per_second: f64,
    debt: f64,
    updated: Instant,
}

impl Budget {
    fn new(per_second: f64, burst_multiplier: f32) -> Self {
        Self {
            ceiling: per_second * burst_multiplier as f64,
            per_second,
            debt: 0.0,
            updated: Instant::now(),
        }
    }

    /// Admit and record a spend of `cost`, or reject it unrecorded.
    fn try_spend(&mut self, cost: f64) -> bool {
        let now = Instant::now();
        let drained = now.duration_since(self.updated).as_secs_f64() * self.per_second;
        self.debt = (self.debt - drained).max(0.0);
        self.updated = now;

        if self.debt + cost > self.ceiling {
            return false;
        }
        self.debt += cost;
        true
    }
}

/// Inbound limits for one connection.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    messages: Budget,
    audio_bytes: Budget,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            messages: Budget::new(
                settings.messages_per_second as f64,
                settings.burst_multiplier,
            ),
            audio_bytes: Budget::new(
                settings.audio_bytes_per_second as f64,
                settings.burst_multiplier,
            ),
        }
    }

    /// Account one inbound message.
    pub fn check_message(&mut self) -> Result<(), RateLimitError> {
        if self.enabled && !self.messages.try_spend(1.0) {
            return Err(RateLimitError::Messages);
        }
        Ok(())
    }

    /// Account an inbound audio payload.
    pub fn check_audio(&mut self, bytes: usize) -> Result<(), RateLimitError> {
        if self.enabled && !self.audio_bytes.try_spend(bytes as f64) {
            return Err(RateLimitError::AudioBytes);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("inbound message rate exceeded")]
    Messages,
    #[error("inbound audio byte rate exceeded")]
    AudioBytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(messages: u32, audio: u32, burst: f32) -> RateLimitSettings {
        RateLimitSettings {
            enabled: true,
            messages_per_second: messages,
            audio_bytes_per_second: audio,
            burst_multiplier: burst,
        }
    }

    #[test]
    fn test_messages_admitted_up_to_ceiling() {
        let mut limiter = RateLimiter::new(settings(10, 1_000, 1.0));

        for _ in 0..10 {
            assert_eq!(limiter.check_message(), Ok(()));
        }
        assert_eq!(limiter.check_message(), Err(RateLimitError::Messages));
    }

    #[test]
    fn test_burst_multiplier_raises_ceiling() {
        let mut limiter = RateLimiter::new(settings(10, 1_000, 2.0));

        for _ in 0..20 {
            assert_eq!(limiter.check_message(), Ok(()));
        }
        assert!(limiter.check_message().is_err());
    }

    #[test]
    fn test_audio_budget_counts_bytes() {
        let mut limiter = RateLimiter::new(settings(100, 1_000, 1.0));

        assert!(limiter.check_audio(600).is_ok());
        assert!(limiter.check_audio(400).is_ok());
        assert_eq!(limiter.check_audio(100), Err(RateLimitError::AudioBytes));
    }

    #[test]
    fn test_rejected_spend_is_not_recorded() {
        let mut limiter = RateLimiter::new(settings(100, 1_000, 1.0));

        assert!(limiter.check_audio(900).is_ok());
        // too big, must not eat into the remaining headroom
        assert!(limiter.check_audio(500).is_err());
        assert!(limiter.check_audio(100).is_ok());
    }

    #[test]
    fn test_debt_decays_over_time() {
        let mut limiter = RateLimiter::new(settings(1_000, 1_000, 1.0));

        for _ in 0..1_000 {
            assert!(limiter.check_message().is_ok());
        }
        assert!(limiter.check_message().is_err());

        // at 1000/s, 50ms drains about 50 messages of debt
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.check_message().is_ok());
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let mut limiter = RateLimiter::new(RateLimitSettings {
            enabled: false,
            messages_per_second: 1,
            audio_bytes_per_second: 1,
            burst_multiplier: 1.0,
        });

        for _ in 0..500 {
            assert!(limiter.check_message().is_ok());
            assert!(limiter.check_audio(10_000).is_ok());
        }
    }
}
