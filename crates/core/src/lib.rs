//! Core types for the voice streaming gateway
//!
//! This crate provides the types shared by every layer:
//! - Frame geometry and accepted audio container codes
//! - Conversation turn types
//! - The wire-level error taxonomy
//! - The inbound/outbound event protocol

pub mod audio;
pub mod error;
pub mod events;
pub mod turn;

pub use audio::{AudioContainer, FRAME_BYTES, FRAME_DURATION, FRAME_SAMPLES, SAMPLE_RATE};
pub use error::ErrorKind;
pub use events::{InboundEvent, OutboundEvent};
pub use turn::{Turn, TurnRole};
