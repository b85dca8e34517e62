//! Frame geometry and audio container codes
//!
//! The on-wire contract is fixed: 20 ms of mono PCM at 22050 Hz, signed
//! 16-bit little-endian, 882 bytes per frame. Frames are indivisible.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 22_050;

/// Samples per 20 ms frame (22050 * 0.02).
pub const FRAME_SAMPLES: usize = 441;

/// Bytes per frame: 441 i16 samples, little-endian.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Nominal audio duration of one frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Container formats accepted for inbound voice audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioContainer {
    Wav,
    Webm,
    Mp3,
    M4a,
    Mp4,
}

impl AudioContainer {
    /// Parse a client-supplied container code. Unknown codes are rejected
    /// upstream as `AudioUnsupported`.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "webm" => Some(Self::Webm),
            "mp3" => Some(Self::Mp3),
            "m4a" => Some(Self::M4a),
            "mp4" => Some(Self::Mp4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Mp4 => "mp4",
        }
    }

    /// MIME type used when forwarding audio to the transcription provider.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
            Self::Mp3 => "audio/mpeg",
            Self::M4a => "audio/mp4",
            Self::Mp4 => "audio/mp4",
        }
    }
}

impl fmt::Display for AudioContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        assert_eq!(FRAME_BYTES, 882);
        assert_eq!(FRAME_SAMPLES, 441);
        // 441 samples at 22050 Hz is exactly 20 ms
        assert_eq!(FRAME_SAMPLES as u32 * 1000 / SAMPLE_RATE, 20);
    }

    #[test]
    fn test_container_parse() {
        assert_eq!(AudioContainer::parse("wav"), Some(AudioContainer::Wav));
        assert_eq!(AudioContainer::parse("WEBM"), Some(AudioContainer::Webm));
        assert_eq!(AudioContainer::parse(" mp3 "), Some(AudioContainer::Mp3));
        assert_eq!(AudioContainer::parse("flac"), None);
        assert_eq!(AudioContainer::parse(""), None);
    }

    #[test]
    fn test_container_roundtrip() {
        for code in ["wav", "webm", "mp3", "m4a", "mp4"] {
            let container = AudioContainer::parse(code).unwrap();
            assert_eq!(container.as_str(), code);
        }
    }
}
