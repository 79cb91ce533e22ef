//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    cancel_job, download_result, get_detections, get_job, get_nearest_detection,
    get_system_status, health, list_jobs, ready, submit_asset, upload_asset,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;
use crate::ws::ws_events;

/// Body limit for every route that does not take an asset upload.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Uploads enforce their own limit so oversize bodies still get a JSON reply
    let upload_routes = Router::new()
        .route("/jobs", post(submit_asset))
        .route("/assets", post(upload_asset))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes));

    let job_routes = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/result", get(download_result))
        // Detection results
        .route("/jobs/:job_id/detections", get(get_detections))
        .route("/jobs/:job_id/detections/nearest", get(get_nearest_detection))
        .route("/system/status", get(get_system_status))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE));

    let api_routes = Router::new().merge(upload_routes).merge(job_routes);

    let ws_routes = Router::new().route("/ws", get(ws_events));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
