//! Handles a `transcode_video` job. No transcoding dependency exists
//! anywhere in this codebase's lineage (§4.6's scope decision), so this is
//! documented as a bounded, checkpointable pass-through: the original bytes
//! are copied verbatim into the `Transcoded` derived slot. A real transcode
//! backend would replace only `transcode_bytes`, keeping the
//! checkpoint/resume shape this handler already provides.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::HandlerContext;
use crate::db::models::Job;
use crate::error::AppResult;
use crate::jobs::{decode_payload, JobOutcome};
use crate::storage::DerivedKind;

#[derive(Debug, Deserialize)]
struct Payload {
    asset_id: String,
    repository_id: String,
}

pub async fn run(ctx: &HandlerContext, job: &Job, cancel: &CancellationToken) -> AppResult<JobOutcome> {
    let payload: Payload = decode_payload(job)?;
    let checkpoint_key = format!("transcode_video:{}", payload.asset_id);

    if ctx.jobs.checkpoint_get(&checkpoint_key).await?.is_some() {
        tracing::info!("asset {} already transcoded, skipping", payload.asset_id);
        return Ok(JobOutcome::Done);
    }

    if cancel.is_cancelled() {
        return Ok(JobOutcome::Cancelled);
    }

    let asset = ctx.catalog.get(&payload.asset_id).await?;
    let storage = ctx.storage_for(&payload.repository_id).await?;
    let bytes = storage.open(&asset.storage_path).await?;
    let ext = std::path::Path::new(&asset.original_filename).extension().and_then(|e| e.to_str()).unwrap_or("bin");

    if cancel.is_cancelled() {
        return Ok(JobOutcome::Cancelled);
    }

    storage.write_derived(DerivedKind::Transcoded, &payload.asset_id, ext, &transcode_bytes(&bytes)).await?;
    ctx.jobs.checkpoint_set(&checkpoint_key, b"done").await?;
    Ok(JobOutcome::Done)
}

fn transcode_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.to_vec()
}
