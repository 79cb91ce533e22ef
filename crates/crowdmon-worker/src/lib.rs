//! Job orchestration and frame processing.
//!
//! This crate provides:
//! - The job orchestrator with its admission gate and capability warm-up
//! - The per-job frame processing worker
//! - The in-memory detection result store
//! - Retention of finished jobs' results

pub mod config;
pub mod error;
mod handle;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
mod processor;
pub mod retention;
pub mod store;

pub use config::WorkerConfig;
pub use error::{StoreError, StoreResult, SubmitError, WorkerError, WorkerResult};
pub use handle::CancelOutcome;
pub use logging::JobLogger;
pub use orchestrator::{default_detectors, Orchestrator, Readiness};
pub use retention::RetentionSweeper;
pub use store::DetectionStore;
