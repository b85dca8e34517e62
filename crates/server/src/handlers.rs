//! Turn orchestration
//!
//! Inbound events arrive here already demultiplexed by the router. Each
//! handler validates the phase transition, then drives the turn: a voice
//! turn is the explicit STT -> memory -> scheduler sequence, a text turn
//! skips straight to memory, and direct TTS bypasses memory entirely.
//!
//! Provider calls never run on the router task; turns are spawned so the
//! inbound loop keeps draining heartbeats while a turn is in flight.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use metrics::counter;

use voice_gateway_agent::Phase;
use voice_gateway_core::{AudioContainer, ErrorKind, InboundEvent, OutboundEvent};
use voice_gateway_pipeline::SttError;

use crate::session::Session;
use crate::state::AppState;

/// Spoken in place of a reply when the language model fails; never appended
/// to memory.
pub const LLM_APOLOGY: &str =
    "I'm sorry, I ran into a problem answering that. Please try again.";

/// Route one inbound event. Heartbeat-class events are absorbed by the
/// router before this point.
pub async fn dispatch(state: &AppState, session: &Arc<Session>, event: InboundEvent) {
    session.touch();

    match event {
        InboundEvent::StartVoiceRecording => start_voice_recording(session).await,
        InboundEvent::VoiceChunk { data, format } => voice_chunk(session, data, format).await,
        InboundEvent::VoiceData { data, format } => voice_data(state, session, data, format).await,
        InboundEvent::StopVoiceRecording => stop_voice_recording(state, session).await,
        InboundEvent::CancelVoiceInput => cancel_voice_input(session).await,
        InboundEvent::ConversationTextInput { text } => text_turn(state, session, text).await,
        InboundEvent::StartTts { text, voice_id } => {
            direct_tts(state, session, text, voice_id).await
        }
        InboundEvent::StopTts => stop_tts(session).await,
        InboundEvent::ClearConversation => {
            state.memory.reset();
            session.send(OutboundEvent::ConversationCleared).await;
        }
        // absorbed by the router; nothing to do if one slips through
        InboundEvent::AudioBufferStatus { .. } | InboundEvent::Heartbeat { .. } => {}
    }
}

async fn start_voice_recording(session: &Arc<Session>) {
    match session.advance(Phase::Listening) {
        Ok(()) => {
            session.clear_audio();
            session.send(OutboundEvent::VoiceRecordingStarted).await;
        }
        Err(err) => reject_invalid(session, &err.to_string()).await,
    }
}

async fn voice_chunk(session: &Arc<Session>, data: String, format: String) {
    let Some(container) = AudioContainer::parse(&format) else {
        session
            .send(OutboundEvent::TranscriptionError {
                error: format!("audio format '{format}' is not accepted"),
                kind: ErrorKind::AudioUnsupported,
            })
            .await;
        return;
    };

    let bytes = match BASE64.decode(&data) {
        Ok(bytes) => bytes,
        Err(_) => {
            session
                .send(OutboundEvent::TranscriptionError {
                    error: "audio payload is not valid base64".to_string(),
                    kind: ErrorKind::AudioUnsupported,
                })
                .await;
            return;
        }
    };

    if let Err(err) = session.append_audio(&bytes, container) {
        session
            .send(OutboundEvent::TranscriptionError {
                error: err.to_string(),
                kind: ErrorKind::InvalidState,
            })
            .await;
    }
}

/// One-shot voice input: the payload replaces the ingest buffer and goes
/// straight to transcription, from Idle or Listening.
async fn voice_data(state: &AppState, session: &Arc<Session>, data: String, format: String) {
    let Some(container) = AudioContainer::parse(&format) else {
        session
            .send(OutboundEvent::TranscriptionError {
                error: format!("audio format '{format}' is not accepted"),
                kind: ErrorKind::AudioUnsupported,
            })
            .await;
        session.recover_to_idle();
        return;
    };

    let bytes = match BASE64.decode(&data) {
        Ok(bytes) => bytes,
        Err(_) => {
            session
                .send(OutboundEvent::TranscriptionError {
                    error: "audio payload is not valid base64".to_string(),
                    kind: ErrorKind::AudioUnsupported,
                })
                .await;
            session.recover_to_idle();
            return;
        }
    };

    if let Err(err) = session.advance(Phase::Transcribing) {
        reject_invalid(session, &err.to_string()).await;
        return;
    }

    session.replace_audio(bytes, container);
    session.send(OutboundEvent::TranscriptionStarted).await;
    spawn_voice_turn(state, session);
}

async fn stop_voice_recording(state: &AppState, session: &Arc<Session>) {
    if let Err(err) = session.advance(Phase::Transcribing) {
        reject_invalid(session, &err.to_string()).await;
        return;
    }

    session.send(OutboundEvent::TranscriptionStarted).await;
    spawn_voice_turn(state, session);
}

async fn cancel_voice_input(session: &Arc<Session>) {
    if session.phase() != Phase::Listening {
        reject_invalid(session, "no voice recording to cancel").await;
        return;
    }
    session.clear_audio();
    let _ = session.advance(Phase::Idle);
}

async fn text_turn(state: &AppState, session: &Arc<Session>, text: String) {
    let text = text.trim().to_string();
    if text.is_empty() {
        reject_invalid(session, "no text provided").await;
        return;
    }

    if let Err(err) = session.advance(Phase::Thinking) {
        reject_invalid(session, &err.to_string()).await;
        return;
    }

    state.memory.append_user(&text);
    session.send(OutboundEvent::AiThinking).await;

    let state = state.clone();
    let session = session.clone();
    tokio::spawn(async move {
        run_thinking(&state, &session).await;
    });
}

async fn direct_tts(
    state: &AppState,
    session: &Arc<Session>,
    text: String,
    voice_id: Option<String>,
) {
    let text = text.trim().to_string();
    if text.is_empty() {
        session
            .send(OutboundEvent::TtsError {
                error: "no text provided".to_string(),
                kind: ErrorKind::InvalidState,
            })
            .await;
        return;
    }

    let phase = session.phase();
    if phase != Phase::Idle && phase != Phase::Speaking {
        session
            .send(OutboundEvent::TtsError {
                error: format!("cannot speak while {}", phase.as_str()),
                kind: ErrorKind::InvalidState,
            })
            .await;
        return;
    }

    let voice = voice_id.unwrap_or_else(|| state.config.tts_voice_id.clone());
    speak(state, session, text, voice).await;
}

async fn stop_tts(session: &Arc<Session>) {
    if let Some(mut stream) = session.take_stream() {
        stream.cancel();
        stream.wait().await;
    }
    if session.phase() == Phase::Speaking {
        let _ = session.advance(Phase::Idle);
    }
}

/// Transcribe the buffered audio, then hand the turn to the conversation.
/// Runs off the router task.
fn spawn_voice_turn(state: &AppState, session: &Arc<Session>) {
    let state = state.clone();
    let session = session.clone();

    tokio::spawn(async move {
        let (audio, container) = session.take_audio();
        let Some(container) = container else {
            session
                .send(OutboundEvent::TranscriptionError {
                    error: "no audio data to process".to_string(),
                    kind: ErrorKind::AudioEmpty,
                })
                .await;
            session.recover_to_idle();
            return;
        };

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            state.stt_timeout(),
            state.stt.transcribe(&audio, container),
        )
        .await
        .unwrap_or(Err(SttError::Timeout));
        crate::metrics::record_stt_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(text) if text.is_empty() => {
                // nothing intelligible; report and go back to idle
                session
                    .send(OutboundEvent::TranscriptionComplete { text })
                    .await;
                session.recover_to_idle();
            }
            Ok(text) => {
                session
                    .send(OutboundEvent::TranscriptionComplete { text: text.clone() })
                    .await;

                // the user turn lands in memory before the model is asked
                state.memory.append_user(&text);
                if session.advance(Phase::Thinking).is_err() {
                    // session raced away (detach or cancel); drop the turn
                    return;
                }
                session.send(OutboundEvent::AiThinking).await;
                run_thinking(&state, &session).await;
            }
            Err(err) => {
                counter!("voice_gateway_errors_total", "type" => "stt").increment(1);
                tracing::warn!(session_id = %session.id, error = %err, "transcription failed");
                session
                    .send(OutboundEvent::TranscriptionError {
                        error: err.to_string(),
                        kind: err.kind(),
                    })
                    .await;
                session.recover_to_idle();
            }
        }
    });
}

/// Generate the assistant reply and speak it. A model failure produces the
/// canned apology through the normal speaking path; memory is untouched.
async fn run_thinking(state: &AppState, session: &Arc<Session>) {
    let started = std::time::Instant::now();
    let reply = match tokio::time::timeout(state.llm_timeout(), state.memory.next_response()).await
    {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            counter!("voice_gateway_errors_total", "type" => "llm").increment(1);
            tracing::warn!(session_id = %session.id, error = %err, "completion failed");
            LLM_APOLOGY.to_string()
        }
        Err(_) => {
            counter!("voice_gateway_errors_total", "type" => "llm").increment(1);
            tracing::warn!(session_id = %session.id, "completion timed out");
            LLM_APOLOGY.to_string()
        }
    };
    crate::metrics::record_llm_latency(started.elapsed().as_secs_f64());

    session
        .send(OutboundEvent::AiResponseComplete {
            text: reply.clone(),
        })
        .await;

    let voice = state.config.tts_voice_id.clone();
    speak(state, session, reply, voice).await;
}

/// Start (or replace) the session's outbound stream. The predecessor is
/// cancelled and awaited before the new stream can emit its first frame.
async fn speak(state: &AppState, session: &Arc<Session>, text: String, voice_id: String) {
    if let Some(mut previous) = session.take_stream() {
        previous.cancel();
        previous.wait().await;
    }

    if let Err(err) = session.advance(Phase::Speaking) {
        reject_invalid(session, &err.to_string()).await;
        return;
    }

    let done_session = session.clone();
    let stream = state.scheduler.start(
        text,
        voice_id,
        session.outbound(),
        session.pacing.clone(),
        move |stream_id, _outcome| done_session.on_stream_done(stream_id),
    );
    session.install_stream(stream);
}

/// Invalid inbound events are acknowledged with a transcription_error-shaped
/// event; the session keeps its phase.
async fn reject_invalid(session: &Arc<Session>, message: &str) {
    tracing::debug!(session_id = %session.id, message, "rejecting event");
    session
        .send(OutboundEvent::TranscriptionError {
            error: message.to_string(),
            kind: ErrorKind::InvalidState,
        })
        .await;
}
