//! Observability metrics
//!
//! Prometheus metrics for sessions, streams, pacing, and provider latency.
//! The pacing counters (`pacing_drift_reset`, `pacing_slow`, transport
//! stalls, frames emitted) are recorded inside the frame scheduler; this
//! module declares the gateway's metric set, installs the exporter, and
//! serves the scrape endpoint. The handle lives on `AppState`, not in a
//! process global.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Everything the gateway emits, pre-registered at install time so each
/// series exports as zero before its first event.
const GAUGES: &[&str] = &[
    "voice_gateway_sessions_active",
    "voice_gateway_streams_active",
];

const COUNTERS: &[&str] = &[
    "voice_gateway_sessions_attached_total",
    "voice_gateway_frames_emitted_total",
    "voice_gateway_pacing_drift_reset_total",
    "voice_gateway_pacing_slow_total",
    "voice_gateway_transport_stalls_total",
];

/// `voice_gateway_errors_total` labels, one per provider leg.
const ERROR_TYPES: &[&str] = &["stt", "llm", "tts"];

const HISTOGRAMS: &[&str] = &[
    "voice_gateway_stt_duration_seconds",
    "voice_gateway_llm_duration_seconds",
];

/// Install the Prometheus recorder and pre-register the metric set above.
/// Returns `None` when a recorder already owns the process (tests, or the
/// gateway embedded next to another exporter); recording then degrades to
/// no-ops and `/metrics` reports unavailable.
pub fn install_exporter() -> Option<PrometheusHandle> {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed");
            return None;
        }
    };

    for name in GAUGES {
        gauge!(*name).set(0.0);
    }
    for name in COUNTERS {
        counter!(*name).absolute(0);
    }
    for error_type in ERROR_TYPES {
        counter!("voice_gateway_errors_total", "type" => *error_type).absolute(0);
    }
    for name in HISTOGRAMS {
        histogram!(*name).record(0.0);
    }

    Some(handle)
}

pub fn record_session_attached() {
    counter!("voice_gateway_sessions_attached_total").increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("voice_gateway_sessions_active").set(count as f64);
}

pub fn record_stt_latency(duration_secs: f64) {
    histogram!("voice_gateway_stt_duration_seconds").record(duration_secs);
}

pub fn record_llm_latency(duration_secs: f64) {
    histogram!("voice_gateway_llm_duration_seconds").record(duration_secs);
}

/// Prometheus text endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.sessions.count());

    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics exporter not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_succeeds_once_per_process() {
        let first = install_exporter();
        assert!(first.is_some());

        // the recorder slot is taken now; a second install degrades cleanly
        assert!(install_exporter().is_none());
    }

    #[test]
    fn test_metric_helpers_do_not_panic() {
        record_session_attached();
        record_active_sessions(3);
        record_stt_latency(0.2);
        record_llm_latency(0.5);
    }
}
