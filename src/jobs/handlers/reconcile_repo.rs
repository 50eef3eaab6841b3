//! Handles a `reconcile_repo` job: runs one pass of the periodic full-scan
//! reconciler (§4.5 tier 2) for a single repository. Scheduled on an
//! interval by the background task runner, and coalesced via its
//! `unique_key` so overlapping ticks for the same repository never queue
//! twice (§4.4's unique-key coalescing, applied here).

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::HandlerContext;
use crate::db::models::Job;
use crate::error::AppResult;
use crate::jobs::{decode_payload, JobOutcome};
use crate::sync::reconciler;

#[derive(Debug, Deserialize)]
struct Payload {
    repository_id: String,
}

pub async fn run(ctx: &HandlerContext, job: &Job, cancel: &CancellationToken) -> AppResult<JobOutcome> {
    let payload: Payload = decode_payload(job)?;
    let storage = ctx.storage_for(&payload.repository_id).await?;

    let summary = reconciler::run_once(&storage, &ctx.catalog, &ctx.jobs, &payload.repository_id, cancel).await?;
    tracing::info!(
        "reconciled {}: {} new, {} changed, {} missing",
        payload.repository_id,
        summary.new,
        summary.changed,
        summary.missing
    );
    if cancel.is_cancelled() {
        return Ok(JobOutcome::Cancelled);
    }
    Ok(JobOutcome::Done)
}
