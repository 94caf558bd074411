//! Prometheus exporter

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use voice_turn_config::ObservabilityConfig;

use crate::ServerError;

/// Install the global recorder and serve `/metrics` on the configured port
///
/// Returns the bound address, or `None` when metrics are disabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<Option<SocketAddr>, ServerError> {
    if !config.metrics_enabled {
        return Ok(None);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    describe();
    Ok(Some(addr))
}

fn describe() {
    metrics::describe_counter!("turns_finalized_total", "Turns finalized by the end-of-turn detector");
    metrics::describe_histogram!("turn_classifier_latency_seconds", "Turn-completion classifier latency");
    metrics::describe_counter!("transcription_reconnects_total", "Transcription channel reconnects");
    metrics::describe_counter!("transcription_final_timeouts_total", "Final transcripts that did not arrive in time");
    metrics::describe_counter!("dispatch_total", "Decision dispatches by route");
    metrics::describe_counter!("worker_tool_calls_total", "Worker tool calls by outcome");
    metrics::describe_counter!("worker_fallbacks_total", "Worker runs that ended in the fallback answer");
    metrics::describe_counter!("action_events_total", "Action events handled by kind");
    metrics::describe_counter!("speech_failures_total", "Speech segments that failed to synthesize or play");
    metrics::describe_counter!("media_playbacks_total", "Media playbacks started");
}
