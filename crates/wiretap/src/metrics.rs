//! Prometheus metrics for wiretap.
//!
//! Tracks captured exchanges, capture queries, and session event routing.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Exchanges appended to the capture store
    pub static ref EXCHANGES_CAPTURED_TOTAL: CounterVec = register_counter_vec!(
        "wiretap_exchanges_captured_total",
        "Total number of exchanges captured",
        &["method", "outcome"]  // outcome: response|error
    )
    .unwrap();

    /// Capture store waits by result
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "wiretap_queries_total",
        "Total number of capture store waits",
        &["result"]  // result: immediate|satisfied|timeout|replaced|reset
    )
    .unwrap();

    /// Transport tasks currently registered with the demultiplexer
    pub static ref ACTIVE_TASKS: IntGauge = register_int_gauge!(
        "wiretap_active_tasks",
        "Number of transport tasks awaiting completion"
    )
    .unwrap();

    /// Exchange duration, start of forwarding to completion
    pub static ref EXCHANGE_DURATION_MS: HistogramVec = register_histogram_vec!(
        "wiretap_exchange_duration_ms",
        "Histogram of captured exchange duration in milliseconds",
        &["method"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Session events seen by the dispatcher
    pub static ref SESSION_EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "wiretap_session_events_total",
        "Total number of session events dispatched",
        &["kind", "routed"]  // routed: delegate|default
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record a captured exchange
pub fn record_exchange(method: &str, outcome: &str, duration_ms: f64) {
    EXCHANGES_CAPTURED_TOTAL
        .with_label_values(&[method, outcome])
        .inc();
    EXCHANGE_DURATION_MS
        .with_label_values(&[method])
        .observe(duration_ms);
}

/// Helper to record how a wait ended
pub fn record_query(result: &str) {
    QUERIES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_session_event(kind: &str, routed: bool) {
    let routed = if routed { "delegate" } else { "default" };
    SESSION_EVENTS_TOTAL.with_label_values(&[kind, routed]).inc();
}

pub fn set_active_tasks(count: usize) {
    ACTIVE_TASKS.set(count as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        record_exchange("GET", "response", 12.5);
        record_query("satisfied");

        let metrics = collect_metrics();
        assert!(metrics.contains("wiretap_exchanges_captured_total"));
        assert!(metrics.contains("wiretap_exchange_duration_ms"));
        assert!(metrics.contains("wiretap_queries_total"));
    }

    #[test]
    fn test_session_event_metrics() {
        record_session_event("received_data", true);
        record_session_event("will_redirect", false);
        set_active_tasks(3);

        let metrics = collect_metrics();
        assert!(metrics.contains("wiretap_session_events_total"));
        assert!(metrics.contains("wiretap_active_tasks"));
    }

    #[test]
    fn test_query_results() {
        for result in ["immediate", "satisfied", "timeout", "replaced", "reset"] {
            record_query(result);
        }
        let metrics = collect_metrics();
        assert!(metrics.contains(r#"result="timeout""#));
    }
}
