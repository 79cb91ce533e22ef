//! System status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crowdmon_models::{Event, SystemPhase};

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusResponse {
    pub phase: SystemPhase,
    pub message: String,
    pub capabilities: Vec<String>,
    pub active_jobs: usize,
    pub max_active_jobs: usize,
    pub observers: usize,
}

/// GET /api/system/status
pub async fn get_system_status(State(state): State<AppState>) -> Json<SystemStatusResponse> {
    let orchestrator = &state.orchestrator;
    let events = orchestrator.events();
    let (phase, message) = match events.current_status() {
        Event::SystemStatus { phase, message } => (phase, message),
        _ => (orchestrator.readiness().phase(), String::new()),
    };

    Json(SystemStatusResponse {
        phase,
        message,
        capabilities: orchestrator.capabilities(),
        active_jobs: orchestrator.active_jobs(),
        max_active_jobs: orchestrator.config().max_active_jobs,
        observers: events.subscriber_count(),
    })
}
