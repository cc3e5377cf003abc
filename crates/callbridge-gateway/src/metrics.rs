//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record a media stream connecting.
pub fn record_stream_connect() {
    metrics::gauge!("media_streams_active").increment(1.0);
}

/// Record a media stream disconnecting.
pub fn record_stream_disconnect() {
    metrics::gauge!("media_streams_active").decrement(1.0);
}

/// Record a call session starting.
pub fn record_session_start() {
    metrics::gauge!("call_sessions_active").increment(1.0);
    metrics::counter!("call_sessions_total").increment(1);
}

/// Record a call session ending.
pub fn record_session_end() {
    metrics::gauge!("call_sessions_active").decrement(1.0);
}

/// Record a completed turn with its end-to-end duration.
pub fn record_turn(duration_secs: f64) {
    metrics::counter!("turns_total").increment(1);
    metrics::histogram!("turn_duration_seconds").record(duration_secs);
}

pub fn record_barge_in() {
    metrics::counter!("barge_ins_total").increment(1);
}

/// Record a webhook delivery by event type.
pub fn record_webhook(event_type: &str) {
    let labels = [("event_type", event_type.to_string())];
    metrics::counter!("webhooks_total", &labels).increment(1);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder can be installed per process.
        if let Ok(handle) = install_prometheus_recorder() {
            record_turn(0.5);
            assert!(handle.render().contains("turns_total"));
        }
    }

    #[test]
    fn test_recorders_without_exporter_do_not_panic() {
        record_stream_connect();
        record_stream_disconnect();
        record_session_start();
        record_session_end();
        record_barge_in();
        record_webhook("call.answered");
        record_error("upstream_timeout");
    }
}
