//! Chat-completion adapter
//!
//! Request/response over a chat-style API with the conversation turn log as
//! input. Model name, temperature, and token cap are configuration, not
//! interface.

pub mod client;

pub use client::{CannedChat, ChatCompleter, ChatConfig, OpenAiChat};

use thiserror::Error;
use voice_gateway_core::ErrorKind;

/// Completion failures, mapped onto the wire taxonomy at the edge.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("chat provider unreachable: {0}")]
    Unavailable(String),

    #[error("completion exceeded its time budget")]
    Timeout,

    #[error("chat provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed completion response: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Timeout => ErrorKind::ProviderTimeout,
            Self::Rejected { .. } => ErrorKind::ProviderRejected,
            Self::Malformed(_) => ErrorKind::ProviderRejected,
        }
    }
}
