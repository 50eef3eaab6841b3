use serde_json::json;

use super::{thumbnail, MediaPipeline, ProbeResult};
use crate::error::AppResult;
use crate::ml::MlClient;

pub struct PhotoPipeline;

impl MediaPipeline for PhotoPipeline {
    fn probe(&self, bytes: &[u8]) -> ProbeResult {
        let exif = super::metadata::extract_exif(bytes);
        let dimensions = image::load_from_memory(bytes).ok().map(|img| (img.width(), img.height()));

        ProbeResult {
            width: exif.width.or(dimensions.map(|(w, _)| w)),
            height: exif.height.or(dimensions.map(|(_, h)| h)),
            taken_time: exif.taken_time,
            duration_secs: None,
            specific_metadata: json!({
                "orientation": exif.orientation,
                "camera_make": exif.camera_make,
                "camera_model": exif.camera_model,
                "gps_latitude": exif.gps_latitude,
                "gps_longitude": exif.gps_longitude,
            }),
        }
    }

    fn derive_thumbnails(&self, bytes: &[u8]) -> AppResult<Vec<thumbnail::GeneratedThumbnail>> {
        thumbnail::generate_all(bytes)
    }

    fn descriptor_input(&self, bytes: &[u8], ml: &MlClient) -> Option<Vec<u8>> {
        let image = image::load_from_memory(bytes).ok()?;
        let max_edge = ml.max_descriptor_input_edge();
        let resized = if image.width().max(image.height()) > max_edge {
            image.resize(max_edge, max_edge, image::imageops::FilterType::Lanczos3)
        } else {
            image
        };
        let mut buf = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, ml.descriptor_quality());
        encoder.encode_image(&resized).ok()?;
        Some(buf)
    }
}
