//! Per-type asset pipelines (§4.6). A closed sum of variants with a small
//! capability interface, per §9's design note: new media types extend the
//! enum and implement the trait, they never inherit from one another.

pub mod audio;
pub mod metadata;
pub mod photo;
pub mod thumbnail;
pub mod video;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::db::models::{AssetState, Thumbnail};
use crate::error::{AppError, AppResult};
use crate::ml::MlClient;
use crate::raw;
use crate::storage::{DerivedKind, StorageLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Photo,
    Video,
    Audio,
}

impl AssetKind {
    pub fn from_asset_type(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(AssetKind::Photo),
            "video" => Some(AssetKind::Video),
            "audio" => Some(AssetKind::Audio),
            _ => None,
        }
    }

    fn pipeline(&self) -> &'static dyn MediaPipeline {
        match self {
            AssetKind::Photo => &photo::PhotoPipeline,
            AssetKind::Video => &video::VideoPipeline,
            AssetKind::Audio => &audio::AudioPipeline,
        }
    }
}

/// Result of probing an asset's bytes: whatever metadata the type-specific
/// stage can cheaply read without a full decode.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub taken_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub specific_metadata: Value,
}

/// Capability interface implemented once per `AssetKind` variant. All three
/// methods operate on in-memory bytes; the surrounding orchestration
/// (`process_asset`) owns the I/O.
pub trait MediaPipeline: Sync {
    fn probe(&self, bytes: &[u8]) -> ProbeResult;
    fn derive_thumbnails(&self, bytes: &[u8]) -> AppResult<Vec<thumbnail::GeneratedThumbnail>>;
    /// Returns a downscaled JPEG to send to the ML service, or `None` if
    /// this media kind has no descriptor input (video/audio, currently).
    fn descriptor_input(&self, bytes: &[u8], ml: &MlClient) -> Option<Vec<u8>>;
}

const PLACEHOLDER_EDGE: u32 = 256;

/// A flat placeholder thumbnail for media kinds with no frame-extraction
/// path available in this codebase's lineage (video, audio).
fn placeholder_thumbnail() -> AppResult<Vec<thumbnail::GeneratedThumbnail>> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        PLACEHOLDER_EDGE,
        PLACEHOLDER_EDGE,
        image::Rgb([40, 40, 40]),
    ));
    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 80);
    encoder
        .encode_image(&image)
        .map_err(|e| AppError::Internal(format!("placeholder thumbnail encode failed: {e}")))?;

    Ok(vec![thumbnail::GeneratedThumbnail {
        size: thumbnail::ThumbnailSize::Medium,
        width: PLACEHOLDER_EDGE,
        height: PLACEHOLDER_EDGE,
        jpeg_bytes: buf,
    }])
}

/// Runs the full per-type pipeline for an already-committed asset: probe →
/// normalize metadata → generate thumbnails → dispatch descriptor request →
/// mark `ready`. Thumbnailing is best-effort per §4.6: a failure there
/// downgrades the asset to `ready` with a partial result rather than failing
/// it, as long as the original is readable. The descriptor request is not —
/// a `Transient` timeout propagates so the job retries (§4.8/§7) instead of
/// completing with embeddings silently missing. Only a probe that can't even
/// read the committed bytes marks the asset `failed`.
pub async fn process_asset(
    storage: &StorageLayer,
    catalog: &Catalog,
    ml: &MlClient,
    asset_id: &str,
    kind: AssetKind,
    ml_max_models: u32,
) -> AppResult<()> {
    let asset = catalog.get(asset_id).await?;
    let bytes = match storage.open(&asset.storage_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            catalog.update_status(asset_id, AssetState::Failed.as_str(), Some(&e.to_string())).await?;
            return Ok(());
        }
    };

    // RAW containers (CR2/NEF/ARW/DNG/...) aren't decodable by `image`; run
    // them through the preview engine first and feed the rest of the
    // pipeline the resulting viewable JPEG instead of the raw bytes (§4.2).
    let bytes = if kind == AssetKind::Photo && raw::is_raw_extension(Path::new(&asset.original_filename)) {
        let absolute = storage.absolute(&asset.storage_path);
        match raw::decode_preview(&absolute).await {
            Ok(preview) => preview.jpeg_bytes,
            Err(e) => {
                catalog.update_status(asset_id, AssetState::Failed.as_str(), Some(&e.to_string())).await?;
                return Ok(());
            }
        }
    } else {
        bytes
    };

    let pipeline = kind.pipeline();
    let probed = pipeline.probe(&bytes);
    catalog
        .update_metadata(
            asset_id,
            &probed.specific_metadata.to_string(),
            probed.taken_time,
            probed.duration_secs,
        )
        .await?;

    match pipeline.derive_thumbnails(&bytes) {
        Ok(thumbnails) => {
            for generated in thumbnails {
                let relative = storage
                    .write_derived(derived_kind_for(generated.size), asset_id, "jpg", &generated.jpeg_bytes)
                    .await?;
                catalog
                    .upsert_thumbnail(&Thumbnail {
                        asset_id: asset_id.to_string(),
                        size: generated.size.as_str().to_string(),
                        path: relative,
                        width: generated.width as i32,
                        height: generated.height as i32,
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }
        Err(e) => {
            tracing::warn!("thumbnail generation failed for asset {asset_id}: {e}");
        }
    }

    if let Some(input) = pipeline.descriptor_input(&bytes, ml) {
        match ml.describe(&input, ml_max_models).await {
            Ok(Some(descriptors)) => {
                for (model_id, vector) in descriptors {
                    catalog.upsert_embedding(asset_id, &model_id, &vector).await?;
                }
            }
            Ok(None) => {}
            // Unlike thumbnailing, a descriptor failure (including a
            // `Transient` timeout) propagates: the job handler fails the job
            // and it retries rather than completing with embeddings
            // silently missing (§4.8/§7).
            Err(e) => return Err(e),
        }
    }

    catalog.update_status(asset_id, AssetState::Ready.as_str(), None).await?;
    Ok(())
}

fn derived_kind_for(size: thumbnail::ThumbnailSize) -> DerivedKind {
    match size {
        thumbnail::ThumbnailSize::Small => DerivedKind::ThumbnailSmall,
        thumbnail::ThumbnailSize::Medium => DerivedKind::ThumbnailMedium,
        thumbnail::ThumbnailSize::Large => DerivedKind::ThumbnailLarge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_parses_known_types_only() {
        assert_eq!(AssetKind::from_asset_type("photo"), Some(AssetKind::Photo));
        assert_eq!(AssetKind::from_asset_type("document"), None);
    }

    #[test]
    fn placeholder_thumbnail_encodes_successfully() {
        let thumbnails = placeholder_thumbnail().unwrap();
        assert_eq!(thumbnails.len(), 1);
        assert!(!thumbnails[0].jpeg_bytes.is_empty());
    }
}
