//! Wire-level error taxonomy
//!
//! Every failure surfaced to a client carries one of these kinds in the
//! `kind` field of a `transcription_error` or `tts_error` event. Adapter
//! crates define their own richer error enums and map into this taxonomy at
//! the edge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified failure cause, stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Audio container format not accepted.
    AudioUnsupported,
    /// Audio buffer too short or zero-energy.
    AudioEmpty,
    /// Network or DNS failure reaching an external provider.
    ProviderUnavailable,
    /// A provider call exceeded its time budget.
    ProviderTimeout,
    /// The provider returned an error response (auth, 4xx, 5xx).
    ProviderRejected,
    /// The outbound transport could not accept frames in time.
    TransportStalled,
    /// The inbound event is not valid for the session's current phase.
    InvalidState,
    /// Reference to a session that does not exist.
    SessionUnknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioUnsupported => "AudioUnsupported",
            Self::AudioEmpty => "AudioEmpty",
            Self::ProviderUnavailable => "ProviderUnavailable",
            Self::ProviderTimeout => "ProviderTimeout",
            Self::ProviderRejected => "ProviderRejected",
            Self::TransportStalled => "TransportStalled",
            Self::InvalidState => "InvalidState",
            Self::SessionUnknown => "SessionUnknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_bare_name() {
        let json = serde_json::to_string(&ErrorKind::AudioUnsupported).unwrap();
        assert_eq!(json, "\"AudioUnsupported\"");

        let back: ErrorKind = serde_json::from_str("\"ProviderTimeout\"").unwrap();
        assert_eq!(back, ErrorKind::ProviderTimeout);
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(ErrorKind::TransportStalled.to_string(), "TransportStalled");
    }
}
