//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all StudyVault metrics
pub const METRICS_PREFIX: &str = "studyvault";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for assistant and conversion latency (typically slower)
pub const SLOW_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Lifecycle metrics
    describe_counter!(
        format!("{}_submissions_total", METRICS_PREFIX),
        Unit::Count,
        "Resources submitted for review"
    );

    describe_counter!(
        format!("{}_moderation_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Approve and reject decisions"
    );

    describe_histogram!(
        format!("{}_conversion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Image-to-PDF conversion latency in seconds"
    );

    // Engagement metrics
    describe_counter!(
        format!("{}_views_total", METRICS_PREFIX),
        Unit::Count,
        "Resource views recorded"
    );

    describe_counter!(
        format!("{}_likes_total", METRICS_PREFIX),
        Unit::Count,
        "Like and unlike operations"
    );

    // Assistant metrics
    describe_counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Assistant requests by answering model"
    );

    describe_histogram!(
        format!("{}_chat_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Assistant latency in seconds"
    );

    // Live query metrics
    describe_gauge!(
        format!("{}_live_subscriptions", METRICS_PREFIX),
        Unit::Count,
        "Open live query streams"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_submission(department: &str, converted: bool) {
    counter!(
        format!("{}_submissions_total", METRICS_PREFIX),
        "department" => department.to_string(),
        "converted" => converted.to_string()
    )
    .increment(1);
}

/// `decision` is one of "approved", "rejected", "deleted"
pub fn record_moderation(department: &str, decision: &str) {
    counter!(
        format!("{}_moderation_decisions_total", METRICS_PREFIX),
        "department" => department.to_string(),
        "decision" => decision.to_string()
    )
    .increment(1);
}

pub fn record_conversion(duration_secs: f64, pages: usize) {
    histogram!(
        format!("{}_conversion_duration_seconds", METRICS_PREFIX),
        "pages" => pages.to_string()
    )
    .record(duration_secs);
}

pub fn record_view() {
    counter!(format!("{}_views_total", METRICS_PREFIX)).increment(1);
}

pub fn record_like(liked: bool) {
    let action = if liked { "like" } else { "unlike" };
    counter!(
        format!("{}_likes_total", METRICS_PREFIX),
        "action" => action
    )
    .increment(1);
}

/// Helper to record assistant metrics
pub fn record_chat(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_chat_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Track open live streams; pass +1 on open and -1 on close
pub fn record_live_subscription(delta: f64) {
    gauge!(format!("{}_live_subscriptions", METRICS_PREFIX)).increment(delta);
}
