//! Asset upload handlers.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crowdmon_media::{sniff_asset, AssetFormat};
use crowdmon_models::MediaKind;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Query parameters accompanying a raw upload body.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// `image` or `video`; when given it must match the content
    pub kind: Option<String>,
    /// Original file name, used only as an extension hint
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub asset_ref: String,
    pub kind: MediaKind,
}

/// Validate an upload body and write it to storage.
pub(crate) async fn store_upload(
    state: &AppState,
    query: &UploadQuery,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(String, AssetFormat)> {
    let limit = state.config.max_upload_bytes;
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!("asset exceeds the {limit} byte upload limit"))
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })?;
    if body.len() > limit {
        return Err(ApiError::PayloadTooLarge(format!(
            "asset exceeds the {limit} byte upload limit"
        )));
    }
    if body.is_empty() {
        return Err(ApiError::InvalidAsset("empty upload".to_string()));
    }

    let requested = query
        .kind
        .as_deref()
        .map(str::parse::<MediaKind>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let format = sniff_asset(&body, query.filename.as_deref()).ok_or_else(|| {
        ApiError::UnsupportedMedia("unrecognised image or video format".to_string())
    })?;
    if let Some(kind) = requested {
        if kind != format.kind {
            return Err(ApiError::UnsupportedMedia(format!(
                "content is {} but kind={} was requested",
                format.kind, kind
            )));
        }
    }

    let asset_ref = state.storage.save_upload(&body, &format).await?;
    metrics::record_upload(format.kind.as_str(), body.len());
    Ok((asset_ref, format))
}

/// Store an asset without starting analysis.
///
/// POST /api/assets?kind=&filename=
pub async fn upload_asset(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<AssetResponse>)> {
    let (asset_ref, format) = store_upload(&state, &query, body).await?;
    info!(asset_ref = %asset_ref, kind = format.kind.as_str(), "Asset stored");

    Ok((
        StatusCode::CREATED,
        Json(AssetResponse {
            asset_ref,
            kind: format.kind,
        }),
    ))
}
