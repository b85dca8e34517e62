//! Paced frame scheduler
//!
//! One owned task per outbound stream: it pulls float PCM from the
//! synthesizer, conditions it into 882-byte frames, and emits each frame
//! against a wall-clock deadline. The deadline advances by a base delay
//! chosen from the client's latest buffer report, so cumulative drift stays
//! bounded and a struggling client slows the stream down.
//!
//! Stream lifecycle: Created -> Running -> (Completed | Errored | Cancelled).
//! Exactly one terminating wire event is sent for completed and errored
//! streams; a cancelled stream just stops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voice_gateway_core::{ErrorKind, OutboundEvent, FRAME_BYTES};

use crate::dsp::FrameProducer;
use crate::tts::{SampleStream, Synthesizer, TtsError};

/// Adaptive pacing table: base delay as a function of client buffer depth.
#[derive(Debug, Clone)]
pub struct PacingTable {
    /// Applied when the client buffer is deeper than `high_watermark`.
    pub fast_delay: Duration,
    /// Applied between the watermarks. Sits below the nominal 20 ms frame
    /// duration to compensate for emit-path overhead.
    pub default_delay: Duration,
    /// Applied when the client buffer is shallower than `low_watermark`.
    pub relaxed_delay: Duration,
    pub high_watermark: u32,
    pub low_watermark: u32,
}

impl Default for PacingTable {
    fn default() -> Self {
        Self {
            fast_delay: Duration::from_millis(14),
            default_delay: Duration::from_millis(16),
            relaxed_delay: Duration::from_millis(20),
            high_watermark: 100,
            low_watermark: 40,
        }
    }
}

impl PacingTable {
    pub fn delay_for(&self, buffer_frames: u32) -> Duration {
        if buffer_frames > self.high_watermark {
            self.fast_delay
        } else if buffer_frames >= self.low_watermark {
            self.default_delay
        } else {
            self.relaxed_delay
        }
    }
}

/// Client playback feedback, written by heartbeat handling and read by the
/// pacing loop. Shared per session.
#[derive(Debug)]
pub struct PacingFeedback {
    buffer_frames: AtomicU32,
    underruns: AtomicU64,
}

impl PacingFeedback {
    pub fn new() -> Self {
        Self {
            // until the client reports, assume a healthy buffer
            buffer_frames: AtomicU32::new(60),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn update(&self, buffer_frames: u32, underruns: u64) {
        self.buffer_frames.store(buffer_frames, Ordering::Relaxed);
        self.underruns.store(underruns, Ordering::Relaxed);
    }

    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Default for PacingFeedback {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub pacing: PacingTable,
    /// Budget covering the provider connect plus the first audio chunk.
    pub first_chunk_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pacing: PacingTable::default(),
            first_chunk_timeout: Duration::from_secs(10),
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    Completed {
        frames: u64,
        bytes: u64,
        duration_ms: u64,
    },
    Cancelled,
    /// The transport could not accept a frame within twice the base delay.
    Stalled,
    Errored(TtsError),
}

/// Handle to a running stream: cancellable, awaitable, exclusively owned by
/// one session.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    id: u64,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

impl ActiveStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Signal cooperative cancellation. Wakes the scheduler mid-sleep.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait for the stream task to terminate.
    pub async fn wait(&mut self) {
        loop {
            if *self.finished.borrow() {
                return;
            }
            if self.finished.changed().await.is_err() {
                return;
            }
        }
    }
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// The paced emitter. One instance serves every session; each `start` call
/// spawns an owned task for that stream.
pub struct FrameScheduler {
    synth: Arc<dyn Synthesizer>,
    config: SchedulerConfig,
}

impl FrameScheduler {
    pub fn new(synth: Arc<dyn Synthesizer>, config: SchedulerConfig) -> Self {
        Self { synth, config }
    }

    /// Begin a streaming job. The caller is responsible for cancelling and
    /// awaiting any predecessor stream first; `on_done` fires exactly once
    /// with the stream id when the task terminates, before any `wait` call
    /// on the handle returns.
    pub fn start(
        &self,
        text: String,
        voice_id: String,
        sink: mpsc::Sender<OutboundEvent>,
        pacing: Arc<PacingFeedback>,
        on_done: impl FnOnce(u64, StreamOutcome) + Send + 'static,
    ) -> ActiveStream {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);

        let synth = self.synth.clone();
        let config = self.config.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            gauge!("voice_gateway_streams_active").increment(1.0);
            let outcome =
                run_stream(synth, config, text, voice_id, sink, pacing, task_cancel).await;
            gauge!("voice_gateway_streams_active").decrement(1.0);

            match &outcome {
                StreamOutcome::Completed { frames, .. } => {
                    tracing::debug!(stream_id = id, frames, "stream completed");
                }
                StreamOutcome::Cancelled => {
                    tracing::debug!(stream_id = id, "stream cancelled");
                }
                StreamOutcome::Stalled => {
                    tracing::warn!(stream_id = id, "stream terminated: transport stalled");
                }
                StreamOutcome::Errored(e) => {
                    counter!("voice_gateway_errors_total", "type" => "tts").increment(1);
                    tracing::warn!(stream_id = id, error = %e, "stream errored");
                }
            }

            // the completion callback must run before waiters wake, so a
            // caller that awaited termination observes its effects
            on_done(id, outcome);
            let _ = finished_tx.send(true);
        });

        ActiveStream {
            id,
            cancel,
            finished: finished_rx,
        }
    }
}

async fn run_stream(
    synth: Arc<dyn Synthesizer>,
    config: SchedulerConfig,
    text: String,
    voice_id: String,
    sink: mpsc::Sender<OutboundEvent>,
    pacing: Arc<PacingFeedback>,
    cancel: CancellationToken,
) -> StreamOutcome {
    if sink
        .send(OutboundEvent::TtsStarted {
            expected_frames: None,
        })
        .await
        .is_err()
    {
        // session already detached
        return StreamOutcome::Cancelled;
    }

    // Resolve the source. The first-chunk budget covers the provider
    // round-trip up to the first audio bytes.
    let opened = tokio::select! {
        _ = cancel.cancelled() => return StreamOutcome::Cancelled,
        opened = tokio::time::timeout(config.first_chunk_timeout, open_source(
            synth.as_ref(), &text, &voice_id, cancel.clone(),
        )) => opened,
    };

    let (mut source, first) = match opened {
        Err(_) => {
            fail(&sink, TtsError::Timeout).await;
            return StreamOutcome::Errored(TtsError::Timeout);
        }
        Ok(Err(e)) => {
            fail(&sink, e.clone()).await;
            return StreamOutcome::Errored(e);
        }
        Ok(Ok(pair)) => pair,
    };

    let mut producer = FrameProducer::new();
    let mut queue: VecDeque<Vec<u8>> = VecDeque::new();
    let mut source_done = false;

    match first {
        None => {
            source_done = true;
            if let Some(tail) = producer.finish() {
                queue.push_back(tail);
            }
        }
        Some(Ok(chunk)) => queue.extend(producer.push_chunk(&chunk)),
        Some(Err(e)) => {
            fail(&sink, e.clone()).await;
            return StreamOutcome::Errored(e);
        }
    }

    let started = Instant::now();
    let mut frames_emitted: u64 = 0;
    let mut bytes_emitted: u64 = 0;
    let mut prev_underruns = pacing.underruns();
    let mut base_delay = config.pacing.delay_for(pacing.buffer_frames());
    let mut next_emit_deadline = Instant::now() + base_delay;

    loop {
        // refill until a frame is available or the source runs dry
        while queue.is_empty() && !source_done {
            tokio::select! {
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                item = source.recv() => match item {
                    Some(Ok(chunk)) => queue.extend(producer.push_chunk(&chunk)),
                    Some(Err(e)) => {
                        // frames already on the wire stay delivered
                        fail(&sink, e.clone()).await;
                        return StreamOutcome::Errored(e);
                    }
                    None => {
                        source_done = true;
                        if let Some(tail) = producer.finish() {
                            queue.push_back(tail);
                        }
                    }
                }
            }
        }

        let Some(frame) = queue.pop_front() else {
            break;
        };
        debug_assert_eq!(frame.len(), FRAME_BYTES);

        base_delay = next_base_delay(&config.pacing, &pacing, &mut prev_underruns);

        if Instant::now() < next_emit_deadline {
            tokio::select! {
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                _ = tokio::time::sleep_until(next_emit_deadline) => {}
            }
        }

        match sink
            .send_timeout(OutboundEvent::PcmFrame(frame), 2 * base_delay)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                counter!("voice_gateway_transport_stalls_total").increment(1);
                // best effort: the transport is already wedged
                let _ = sink.try_send(OutboundEvent::TtsError {
                    error: "transport unable to accept frames".to_string(),
                    kind: ErrorKind::TransportStalled,
                });
                return StreamOutcome::Stalled;
            }
            Err(SendTimeoutError::Closed(_)) => return StreamOutcome::Cancelled,
        }

        frames_emitted += 1;
        bytes_emitted += FRAME_BYTES as u64;
        counter!("voice_gateway_frames_emitted_total").increment(1);

        next_emit_deadline += base_delay;
        if next_emit_deadline + 2 * base_delay < Instant::now() {
            // fallen too far behind; snap to the present
            next_emit_deadline = Instant::now() + base_delay;
            counter!("voice_gateway_pacing_drift_reset_total").increment(1);
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let _ = sink
        .send(OutboundEvent::TtsCompleted {
            frames: frames_emitted,
            bytes: bytes_emitted,
            duration_ms,
        })
        .await;

    StreamOutcome::Completed {
        frames: frames_emitted,
        bytes: bytes_emitted,
        duration_ms,
    }
}

/// Connect to the synthesizer and wait for its first item.
async fn open_source(
    synth: &dyn Synthesizer,
    text: &str,
    voice_id: &str,
    cancel: CancellationToken,
) -> Result<(SampleStream, Option<Result<Vec<f32>, TtsError>>), TtsError> {
    let mut stream = synth.synthesize(text, voice_id, cancel).await?;
    let first = stream.recv().await;
    Ok((stream, first))
}

/// Pick the base delay from the latest client report. A zero buffer with a
/// rising underrun count forces the relaxed rate and records it.
fn next_base_delay(
    table: &PacingTable,
    feedback: &PacingFeedback,
    prev_underruns: &mut u64,
) -> Duration {
    let buffer = feedback.buffer_frames();
    let underruns = feedback.underruns();

    if buffer == 0 && underruns > *prev_underruns {
        counter!("voice_gateway_pacing_slow_total").increment(1);
    }
    *prev_underruns = underruns;

    table.delay_for(buffer)
}

async fn fail(sink: &mpsc::Sender<OutboundEvent>, error: TtsError) {
    let _ = sink
        .send(OutboundEvent::TtsError {
            error: error.to_string(),
            kind: error.kind(),
        })
        .await;
}
