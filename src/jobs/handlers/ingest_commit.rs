//! Handles an `ingest_commit` job: registers a file the filesystem watcher
//! or reconciler found already sitting in a user-managed area as a new
//! asset at its existing on-disk path (§4.5/§8 scenario 3), deferring that
//! work off the watcher's debounce loop and the reconciler's scan so a
//! burst of filesystem changes doesn't block either on catalog I/O.

use serde::Deserialize;

use super::HandlerContext;
use crate::db::models::Job;
use crate::error::AppResult;
use crate::jobs::decode_payload;

#[derive(Debug, Deserialize)]
struct Payload {
    repository_id: String,
    relative_path: String,
    original_name: String,
    mime: String,
    hash: String,
    size: i64,
}

pub async fn run(ctx: &HandlerContext, job: &Job) -> AppResult<()> {
    let payload: Payload = decode_payload(job)?;
    ctx.coordinator
        .register_existing(&payload.repository_id, &payload.relative_path, &payload.original_name, &payload.mime, &payload.hash, payload.size)
        .await?;
    Ok(())
}
