//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Instant;

/// Install the Prometheus recorder. Returns a handle used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "crowdmon_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "crowdmon_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "crowdmon_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "crowdmon_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "crowdmon_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "crowdmon_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "crowdmon_ws_messages_received_total";

    // Upload metrics
    pub const UPLOAD_BYTES: &str = "crowdmon_upload_bytes";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(message_type: &str) {
    counter!(names::WS_MESSAGES_SENT, "type" => message_type.to_string()).increment(1);
}

pub fn record_ws_message_received(command: &str) {
    counter!(names::WS_MESSAGES_RECEIVED, "command" => command.to_string()).increment(1);
}

pub fn record_upload(kind: &str, bytes: usize) {
    histogram!(names::UPLOAD_BYTES, "kind" => kind.to_string()).record(bytes as f64);
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .unwrap_or_else(|e| panic!("invalid id pattern: {e}"))
    })
}

/// Collapse job ids so paths make low-cardinality labels.
fn sanitize_path(path: &str) -> String {
    id_pattern().replace_all(path, ":id").to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
