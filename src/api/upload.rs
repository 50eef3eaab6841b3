//! `POST /assets` and `DELETE /assets/:id` (§6). Upload is a multipart form
//! with a `repository_id` field and a `file` field; an optional
//! `X-Content-Hash` header lets the client assert the hash it expects —
//! mismatches are rejected as `Policy` before any byte is committed (§4.7).

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::ingest::IngestOutcome;
use crate::AppState;

pub async fn create_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let client_hash = headers.get("x-content-hash").and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    let mut repository_id: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut mime: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Policy(e.to_string()))? {
        match field.name().unwrap_or("") {
            "repository_id" => {
                repository_id = Some(field.text().await.map_err(|e| AppError::Policy(e.to_string()))?);
            }
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                mime = field.content_type().map(|s| s.to_string());
                bytes = Some(field.bytes().await.map_err(|e| AppError::Policy(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    let repository_id = repository_id.ok_or_else(|| AppError::Policy("missing 'repository_id' field".to_string()))?;
    let bytes = bytes.ok_or_else(|| AppError::Policy("missing 'file' field".to_string()))?;
    let file_name = file_name.unwrap_or_else(|| "upload".to_string());
    let mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());

    let storage = state.ctx.storage_for(&repository_id).await?;
    let staging = storage.stage_upload(&bytes, &file_name).await?;

    let outcome = state
        .ctx
        .coordinator
        .ingest(&storage, &repository_id, &staging, &file_name, &mime, client_hash.as_deref())
        .await?;

    match outcome {
        IngestOutcome::Created { asset_id, task_id } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "created",
                "asset_id": asset_id,
                "task_id": task_id,
            })),
        )),
        IngestOutcome::Deduplicated { asset_id } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "deduplicated",
                "asset_id": asset_id,
            })),
        )),
    }
}

pub async fn delete_asset(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<StatusCode> {
    let asset = state.ctx.catalog.get(&id).await?;
    let storage = state.ctx.storage_for(&asset.repository_id).await?;

    storage.move_to_trash(&asset.id, &asset.storage_path, "user-delete").await?;
    state.ctx.catalog.soft_delete(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}
