//! Handles a `generate_thumbnail` job: an operator- or API-triggered
//! re-derivation of an asset's thumbnails, independent of a fresh upload.
//! Re-runs the full per-type pipeline rather than duplicating its thumbnail
//! stage in isolation — `process_asset` is cheap to re-run and idempotent
//! (each stage overwrites its own prior output), so a narrower "thumbnails
//! only" path would just be this minus a few lines.

use serde::Deserialize;

use super::HandlerContext;
use crate::db::models::Job;
use crate::error::{AppError, AppResult};
use crate::jobs::decode_payload;
use crate::processor::{self, AssetKind};

#[derive(Debug, Deserialize)]
struct Payload {
    asset_id: String,
}

pub async fn run(ctx: &HandlerContext, job: &Job) -> AppResult<()> {
    let payload: Payload = decode_payload(job)?;
    let asset = ctx.catalog.get(&payload.asset_id).await?;
    let storage = ctx.storage_for(&asset.repository_id).await?;
    let kind = AssetKind::from_asset_type(&asset.asset_type)
        .ok_or_else(|| AppError::Internal(format!("unknown asset_type '{}' for {}", asset.asset_type, asset.id)))?;

    processor::process_asset(&storage, &ctx.catalog, &ctx.ml, &payload.asset_id, kind, ctx.ml_max_models).await
}
