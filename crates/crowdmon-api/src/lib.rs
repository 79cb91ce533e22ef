//! Axum HTTP/WebSocket API server for the crowd monitor.
//!
//! This crate provides:
//! - Asset upload and job submission
//! - Job status, cancellation and result download
//! - A WebSocket event stream with client commands
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use storage::LocalStorage;
