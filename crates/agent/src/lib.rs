//! Conversation state for the voice gateway
//!
//! - Bounded multi-turn conversation memory with a pinned system directive
//! - The per-session phase table governing which events a session may accept

pub mod memory;
pub mod phase;

pub use memory::{ConversationMemory, MemoryConfig};
pub use phase::{Phase, TransitionError};
