//! Job handlers: submission, cancellation, status, results.

use axum::body::{Body, Bytes};
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crowdmon_media::content_type_for;
use crowdmon_models::{AnalysisJob, ErrorKind, JobId, JobState, TimedDetection};

use crate::error::{ApiError, ApiResult};
use crate::handlers::assets::{store_upload, UploadQuery};
use crate::state::AppState;

/// Body of every submission response, accepted or not.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl SubmitResponse {
    fn accepted(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            accepted: true,
            reason: None,
            error_kind: None,
        }
    }

    fn rejected(err: &ApiError) -> Self {
        Self {
            job_id: None,
            accepted: false,
            reason: Some(err.detail()),
            error_kind: err.error_kind(),
        }
    }
}

/// Upload an asset and start analysing it.
///
/// POST /api/jobs?kind=image|video&filename=<name>
pub async fn submit_asset(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, Json<SubmitResponse>) {
    match submit(&state, &query, body).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SubmitResponse::accepted(job_id))),
        Err(err) => {
            warn!(error = %err, "Submission rejected");
            (err.status_code(), Json(SubmitResponse::rejected(&err)))
        }
    }
}

async fn submit(
    state: &AppState,
    query: &UploadQuery,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<JobId> {
    let (asset_ref, format) = store_upload(state, query, body).await?;

    match state.orchestrator.submit(&asset_ref, format.kind).await {
        Ok(job_id) => {
            info!(job_id = %job_id, asset_ref = %asset_ref, "Analysis started");
            Ok(job_id)
        }
        Err(err) => {
            state.storage.remove_upload(&asset_ref).await;
            Err(err.into())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request a cooperative stop.
///
/// POST /api/jobs/:job_id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<CancelResponse>) {
    let job_id = JobId::from_string(job_id);
    match state.orchestrator.cancel(&job_id) {
        Ok(outcome) => {
            let reason = outcome
                .is_already_terminal()
                .then(|| format!("job already {}", outcome.state().as_str()));
            (
                StatusCode::OK,
                Json(CancelResponse {
                    acknowledged: outcome.is_acknowledged(),
                    state: Some(outcome.state()),
                    reason,
                }),
            )
        }
        Err(err) => {
            let err = ApiError::from(err);
            (
                err.status_code(),
                Json(CancelResponse {
                    acknowledged: false,
                    state: None,
                    reason: Some(err.detail()),
                }),
            )
        }
    }
}

/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<AnalysisJob>> {
    Ok(Json(state.orchestrator.status(&JobId::from_string(job_id))?))
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<AnalysisJob>,
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.orchestrator.list(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionsResponse {
    pub job_id: JobId,
    pub entries: Vec<TimedDetection>,
}

/// Every stored detection for a job, in frame order.
///
/// GET /api/jobs/:job_id/detections
pub async fn get_detections(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DetectionsResponse>> {
    let job_id = JobId::from_string(job_id);
    let entries = state
        .orchestrator
        .results(&job_id)?
        .iter()
        .map(|entry| (**entry).clone())
        .collect();
    Ok(Json(DetectionsResponse { job_id, entries }))
}

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub t: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestResponse {
    pub job_id: JobId,
    pub query_time: f64,
    pub entry: Option<TimedDetection>,
}

/// Detection closest to a playback time.
///
/// GET /api/jobs/:job_id/detections/nearest?t=<seconds>
pub async fn get_nearest_detection(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<NearestQuery>,
) -> ApiResult<Json<NearestResponse>> {
    if !query.t.is_finite() {
        return Err(ApiError::bad_request("t must be a finite number of seconds"));
    }
    let job_id = JobId::from_string(job_id);
    let entry = state
        .orchestrator
        .nearest(&job_id, query.t)?
        .map(|entry| (*entry).clone());
    Ok(Json(NearestResponse {
        job_id,
        query_time: query.t,
        entry,
    }))
}

/// Annotated output of a completed job.
///
/// GET /api/jobs/:job_id/result
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job = state.orchestrator.status(&JobId::from_string(job_id))?;
    if job.state != JobState::Completed {
        return Err(ApiError::conflict(format!(
            "job is {}, result is available once completed",
            job.state.as_str()
        )));
    }

    let output_ref = job
        .output_ref
        .ok_or_else(|| ApiError::not_found("job produced no annotated output"))?;
    let path = state
        .storage
        .output_path(&output_ref)
        .ok_or_else(|| ApiError::not_found("annotated output is no longer available"))?;
    let bytes = tokio::fs::read(&path).await?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(extension).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", output_ref),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}
