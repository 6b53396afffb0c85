//! Per-request metrics

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use studyvault_common::metrics::RequestMetrics;

/// Count and time every request by its route template
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let tracker = RequestMetrics::start(request.method().as_str(), &endpoint);
    let response = next.run(request).await;
    tracker.finish(response.status().as_u16());
    response
}
