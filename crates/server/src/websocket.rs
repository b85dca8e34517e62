//! Event router
//!
//! Owns the socket for one session: demultiplexes inbound events by name and
//! forwards the session's outbound queue to the wire. JSON text carries
//! every event except `pcm_frame`, which goes out as a single binary message
//! so a frame is never split.
//!
//! Heartbeat-class events (`audio_buffer_status`, `heartbeat`) are absorbed
//! here: they mutate session metrics and never reach the turn handlers.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use voice_gateway_core::{ErrorKind, InboundEvent, OutboundEvent};

use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Socket upgrade endpoint.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session, mut outbound_rx) = state.sessions.attach();
    crate::metrics::record_session_attached();
    crate::metrics::record_active_sessions(state.sessions.count());

    let (mut sender, mut receiver) = socket.split();

    // Outbound forwarder: frames as binary, everything else as JSON text.
    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let message = match event {
                OutboundEvent::PcmFrame(frame) => Message::Binary(frame),
                other => match serde_json::to_string(&other) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound event");
                        continue;
                    }
                },
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    session.send(OutboundEvent::ConversationReady).await;

    let mut limiter = RateLimiter::new(state.config.rate_limit.clone());

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if limiter.check_message().is_err() {
                    tracing::warn!(session_id = %session.id, "message rate limit exceeded");
                    continue;
                }

                match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(event) => route(&state, &session, &mut limiter, event).await,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "unparseable event");
                        session
                            .send(OutboundEvent::TranscriptionError {
                                error: "unrecognized event".to_string(),
                                kind: ErrorKind::InvalidState,
                            })
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                // inbound audio rides base64 inside voice_chunk payloads
                tracing::warn!(session_id = %session.id, "unexpected binary message dropped");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "socket error");
                break;
            }
        }
    }

    state.sessions.detach(&session.id);
    crate::metrics::record_active_sessions(state.sessions.count());
    send_task.abort();

    tracing::info!(session_id = %session.id, "socket closed");
}

async fn route(
    state: &AppState,
    session: &std::sync::Arc<crate::session::Session>,
    limiter: &mut RateLimiter,
    event: InboundEvent,
) {
    // audio payloads count against the byte budget before dispatch;
    // base64 length over-counts by a third, close enough for a cap
    if let InboundEvent::VoiceChunk { data, .. } | InboundEvent::VoiceData { data, .. } = &event {
        if limiter.check_audio(data.len()).is_err() {
            tracing::warn!(session_id = %session.id, "audio rate limit exceeded");
            session
                .send(OutboundEvent::TranscriptionError {
                    error: "audio rate limit exceeded".to_string(),
                    kind: ErrorKind::InvalidState,
                })
                .await;
            return;
        }
    }

    match event {
        // backpressure feedback: update and stay invisible to turn logic
        InboundEvent::AudioBufferStatus {
            buffer_frames,
            underrun_count,
        } => {
            session.pacing.update(buffer_frames, underrun_count);
        }
        InboundEvent::Heartbeat { t } => {
            session.touch();
            session.send(OutboundEvent::HeartbeatAck { t }).await;
        }
        other => handlers::dispatch(state, session, other).await,
    }
}
