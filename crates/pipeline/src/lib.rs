//! Audio pipeline: signal conditioning, provider adapters, frame scheduling
//!
//! This crate provides the real-time half of the gateway:
//! - Signal-conditioning DSP that turns float PCM into 882-byte frames
//! - The speech-to-text adapter (buffered audio in, transcript out)
//! - The text-to-speech adapter (text in, cancellable float PCM stream out)
//! - The frame scheduler: one owned task per stream, pacing frames onto the
//!   wire at wall-clock-accurate intervals with adaptive backpressure

pub mod dsp;
pub mod scheduler;
pub mod stt;
pub mod tts;

pub use dsp::{FrameAssembler, FrameProducer, SampleShaper};
pub use scheduler::{
    ActiveStream, FrameScheduler, PacingFeedback, PacingTable, SchedulerConfig, StreamOutcome,
};
pub use stt::{FixedTranscriber, HttpTranscriber, SttConfig, SttError, Transcriber};
pub use tts::{HttpSynthesizer, SampleStream, Synthesizer, ToneSynthesizer, TtsConfig, TtsError};
