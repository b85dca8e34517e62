//! Session management
//!
//! One session per connected client: its phase, the inbound audio buffer,
//! the active outbound stream, and the client's playback feedback. Mutations
//! to a single session are short critical sections; the store supports
//! concurrent access by distinct sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};

use voice_gateway_agent::{Phase, TransitionError};
use voice_gateway_core::{AudioContainer, OutboundEvent};
use voice_gateway_pipeline::{ActiveStream, PacingFeedback};

/// Cap on buffered inbound voice audio per session.
pub const MAX_AUDIO_IN_BYTES: usize = 10 * 1024 * 1024;

/// Depth of the per-session outbound queue. Kept small so a stalled
/// transport pushes back on the frame scheduler within a few frames.
pub const OUTBOUND_QUEUE: usize = 8;

#[derive(Default)]
struct AudioIngest {
    data: Vec<u8>,
    container: Option<AudioContainer>,
}

/// Per-client session state.
pub struct Session {
    pub id: String,
    phase: Mutex<Phase>,
    audio_in: Mutex<AudioIngest>,
    stream: Mutex<Option<ActiveStream>>,
    /// Latest client buffer report, shared with the scheduler.
    pub pacing: Arc<PacingFeedback>,
    outbound: mpsc::Sender<OutboundEvent>,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(id: String, outbound: mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            id,
            phase: Mutex::new(Phase::Idle),
            audio_in: Mutex::new(AudioIngest::default()),
            stream: Mutex::new(None),
            pacing: Arc::new(PacingFeedback::new()),
            outbound,
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Validated phase change. The table in `voice_gateway_agent::phase`
    /// decides; the session never moves on a rejected transition.
    pub fn advance(&self, to: Phase) -> Result<(), TransitionError> {
        let mut phase = self.phase.lock();
        if phase.can_transition_to(to) {
            tracing::debug!(session_id = %self.id, from = phase.as_str(), to = to.as_str(), "phase change");
            *phase = to;
            Ok(())
        } else {
            Err(TransitionError { from: *phase, to })
        }
    }

    /// Error recovery: the `ack` edge out of the error phase is taken
    /// internally, immediately after the error event goes out, so a failed
    /// turn can never strand the session.
    pub fn recover_to_idle(&self) {
        let mut phase = self.phase.lock();
        if *phase != Phase::Idle {
            tracing::debug!(session_id = %self.id, from = phase.as_str(), "recovering to idle");
            *phase = Phase::Idle;
        }
    }

    /// Refresh the activity stamp.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Append a chunk to the ingest buffer. Only legal while Listening.
    pub fn append_audio(
        &self,
        data: &[u8],
        container: AudioContainer,
    ) -> Result<(), AudioIngestError> {
        if self.phase() != Phase::Listening {
            return Err(AudioIngestError::NotListening);
        }
        let mut ingest = self.audio_in.lock();
        if ingest.data.len() + data.len() > MAX_AUDIO_IN_BYTES {
            return Err(AudioIngestError::BufferFull);
        }
        ingest.data.extend_from_slice(data);
        ingest.container = Some(container);
        Ok(())
    }

    /// Replace the ingest buffer wholesale (one-shot voice input).
    pub fn replace_audio(&self, data: Vec<u8>, container: AudioContainer) {
        let mut ingest = self.audio_in.lock();
        ingest.data = data;
        ingest.container = Some(container);
    }

    /// Take and clear the ingest buffer.
    pub fn take_audio(&self) -> (Vec<u8>, Option<AudioContainer>) {
        let mut ingest = self.audio_in.lock();
        let data = std::mem::take(&mut ingest.data);
        let container = ingest.container.take();
        (data, container)
    }

    pub fn clear_audio(&self) {
        let mut ingest = self.audio_in.lock();
        ingest.data.clear();
        ingest.container = None;
    }

    pub fn buffered_audio_len(&self) -> usize {
        self.audio_in.lock().data.len()
    }

    /// Install a freshly started stream. A very short utterance can finish
    /// before this runs; its completion callback will already have moved the
    /// session out of Speaking, in which case the handle is dead on arrival.
    pub fn install_stream(&self, stream: ActiveStream) {
        let mut slot = self.stream.lock();
        if *self.phase.lock() != Phase::Speaking {
            stream.cancel();
            return;
        }
        if let Some(previous) = slot.replace(stream) {
            // lost a cancel race; make sure the displaced stream dies
            previous.cancel();
        }
    }

    /// Take the active stream out of its slot, if any.
    pub fn take_stream(&self) -> Option<ActiveStream> {
        self.stream.lock().take()
    }

    pub fn has_active_stream(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Stream-completion callback: drop this stream's handle and return the
    /// session to idle unless a replacement stream is already live.
    pub fn on_stream_done(&self, stream_id: u64) {
        let mut slot = self.stream.lock();
        if slot.as_ref().map(ActiveStream::id) == Some(stream_id) {
            *slot = None;
        }
        if slot.is_none() {
            let mut phase = self.phase.lock();
            if *phase == Phase::Speaking {
                *phase = Phase::Idle;
            }
        }
    }

    /// Queue an event for this session's client. Events for detached
    /// sessions are dropped.
    pub async fn send(&self, event: OutboundEvent) {
        if self.outbound.send(event).await.is_err() {
            tracing::trace!(session_id = %self.id, "dropping event for detached session");
        }
    }

    /// Sender handle for the frame scheduler.
    pub fn outbound(&self) -> mpsc::Sender<OutboundEvent> {
        self.outbound.clone()
    }

    /// Diagnostic view of this session.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.id,
            "phase": self.phase().as_str(),
            "buffered_audio_bytes": self.buffered_audio_len(),
            "stream_active": self.has_active_stream(),
            "client_buffer_frames": self.pacing.buffer_frames(),
            "client_underruns": self.pacing.underruns(),
            "idle_for_s": self.idle_for().as_secs(),
        })
    }
}

/// Audio ingest failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AudioIngestError {
    #[error("audio chunks are only accepted while listening")]
    NotListening,
    #[error("audio ingest buffer is full")]
    BufferFull,
}

/// All live sessions, keyed by id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session and hand back the receiving end of its
    /// outbound queue for the transport writer.
    pub fn attach(&self) -> (Arc<Session>, mpsc::Receiver<OutboundEvent>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let session = Arc::new(Session::new(id.clone(), tx));

        self.sessions.write().insert(id.clone(), session.clone());
        tracing::info!(session_id = %id, "session attached");

        (session, rx)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session, cancelling its stream and releasing its buffers.
    pub fn detach(&self, id: &str) {
        let session = self.sessions.write().remove(id);
        if let Some(session) = session {
            if let Some(stream) = session.take_stream() {
                stream.cancel();
            }
            session.clear_audio();
            tracing::info!(session_id = %id, "session detached");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn snapshots(&self) -> Vec<serde_json::Value> {
        self.sessions
            .read()
            .values()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Start a background task destroying sessions idle past `timeout`.
    /// Returns a shutdown sender for the task.
    pub fn start_idle_sweeper(self: &Arc<Self>, timeout: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(self);
        let interval = (timeout / 4).max(Duration::from_secs(30));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired: Vec<String> = store
                            .sessions
                            .read()
                            .iter()
                            .filter(|(_, s)| s.idle_for() > timeout)
                            .map(|(id, _)| id.clone())
                            .collect();
                        for id in expired {
                            tracing::info!(session_id = %id, "destroying idle session");
                            store.detach(&id);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_get() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();

        assert_eq!(session.phase(), Phase::Idle);
        assert!(store.get(&session.id).is_some());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_detach_releases_session() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();
        let id = session.id.clone();

        store.detach(&id);
        assert!(store.get(&id).is_none());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_audio_only_accepted_while_listening() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();

        assert_eq!(
            session.append_audio(&[1, 2, 3], AudioContainer::Wav),
            Err(AudioIngestError::NotListening)
        );

        session.advance(Phase::Listening).unwrap();
        assert!(session.append_audio(&[1, 2, 3], AudioContainer::Wav).is_ok());
        assert_eq!(session.buffered_audio_len(), 3);
    }

    #[test]
    fn test_ingest_buffer_is_bounded() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();
        session.advance(Phase::Listening).unwrap();

        let big = vec![0u8; MAX_AUDIO_IN_BYTES];
        assert!(session.append_audio(&big, AudioContainer::Webm).is_ok());
        assert_eq!(
            session.append_audio(&[0], AudioContainer::Webm),
            Err(AudioIngestError::BufferFull)
        );
    }

    #[test]
    fn test_take_audio_clears_buffer() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();
        session.advance(Phase::Listening).unwrap();
        session.append_audio(&[5; 100], AudioContainer::Mp3).unwrap();

        let (data, container) = session.take_audio();
        assert_eq!(data.len(), 100);
        assert_eq!(container, Some(AudioContainer::Mp3));
        assert_eq!(session.buffered_audio_len(), 0);
    }

    #[test]
    fn test_invalid_transition_keeps_phase() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();

        let err = session.advance(Phase::Error).unwrap_err();
        assert_eq!(err.from, Phase::Idle);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_recover_to_idle() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();
        session.advance(Phase::Listening).unwrap();
        session.advance(Phase::Transcribing).unwrap();

        session.recover_to_idle();
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_send_to_detached_session_is_dropped() {
        let store = SessionStore::new();
        let (session, rx) = store.attach();
        drop(rx);

        // must not error or block
        session.send(OutboundEvent::ConversationReady).await;
    }

    #[test]
    fn test_snapshot_shape() {
        let store = SessionStore::new();
        let (session, _rx) = store.attach();

        let snapshot = session.snapshot();
        assert_eq!(snapshot["phase"], "idle");
        assert_eq!(snapshot["stream_active"], false);
        assert_eq!(snapshot["client_buffer_frames"], 60);
    }
}
