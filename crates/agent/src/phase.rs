//! Session phase table
//!
//! A session moves through idle -> listening -> transcribing -> thinking ->
//! speaking over a voice turn, with error as the recovery detour. Transitions
//! outside this table are rejected without touching the session.

use serde::Serialize;
use thiserror::Error;

use voice_gateway_core::ErrorKind;

/// Per-session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    Error,
}

impl Phase {
    /// Phases reachable from this one.
    pub fn valid_transitions(&self) -> &'static [Phase] {
        match self {
            // one-shot voice_data goes straight to transcribing
            Phase::Idle => &[
                Phase::Listening,
                Phase::Thinking,
                Phase::Speaking,
                Phase::Transcribing,
            ],
            Phase::Listening => &[Phase::Listening, Phase::Transcribing, Phase::Idle],
            // empty transcripts short-circuit back to idle
            Phase::Transcribing => &[Phase::Thinking, Phase::Error, Phase::Idle],
            Phase::Thinking => &[Phase::Speaking, Phase::Error],
            // a direct tts replaces the active stream without leaving speaking
            Phase::Speaking => &[Phase::Idle, Phase::Speaking],
            Phase::Error => &[Phase::Idle],
        }
    }

    pub fn can_transition_to(&self, to: Phase) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Transcribing => "transcribing",
            Phase::Thinking => "thinking",
            Phase::Speaking => "speaking",
            Phase::Error => "error",
        }
    }
}

/// Rejected phase change. Surfaces to clients as `InvalidState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

impl TransitionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidState
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_turn_path() {
        assert!(Phase::Idle.can_transition_to(Phase::Listening));
        assert!(Phase::Listening.can_transition_to(Phase::Transcribing));
        assert!(Phase::Transcribing.can_transition_to(Phase::Thinking));
        assert!(Phase::Thinking.can_transition_to(Phase::Speaking));
        assert!(Phase::Speaking.can_transition_to(Phase::Idle));
    }

    #[test]
    fn test_text_turn_skips_listening() {
        assert!(Phase::Idle.can_transition_to(Phase::Thinking));
    }

    #[test]
    fn test_direct_tts_replaces_stream() {
        assert!(Phase::Idle.can_transition_to(Phase::Speaking));
        assert!(Phase::Speaking.can_transition_to(Phase::Speaking));
    }

    #[test]
    fn test_error_recovers_to_idle_only() {
        assert_eq!(Phase::Error.valid_transitions(), &[Phase::Idle]);
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Phase::Idle.can_transition_to(Phase::Error));
        assert!(!Phase::Speaking.can_transition_to(Phase::Listening));
        assert!(!Phase::Thinking.can_transition_to(Phase::Listening));
        assert!(!Phase::Listening.can_transition_to(Phase::Speaking));
    }

    #[test]
    fn test_transition_error_is_invalid_state() {
        let err = TransitionError {
            from: Phase::Speaking,
            to: Phase::Listening,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("Speaking"));
    }
}
