//! Multi-size thumbnail generation. Grounded on the teacher's image-variant
//! pipeline: center-crop-free `Lanczos3` resize preserving aspect ratio,
//! generalized from a fixed CMS variant list to the three sizes this spec
//! names.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSize {
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub const ALL: [ThumbnailSize; 3] = [ThumbnailSize::Small, ThumbnailSize::Medium, ThumbnailSize::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        }
    }

    /// Longest-edge target in pixels. Aspect ratio is always preserved, so
    /// these bound the larger of width/height.
    fn max_edge(&self) -> u32 {
        match self {
            ThumbnailSize::Small => 256,
            ThumbnailSize::Medium => 768,
            ThumbnailSize::Large => 1600,
        }
    }
}

pub struct GeneratedThumbnail {
    pub size: ThumbnailSize,
    pub width: u32,
    pub height: u32,
    pub jpeg_bytes: Vec<u8>,
}

const JPEG_QUALITY: u8 = 85;

/// Decodes `source_bytes` once and produces every configured thumbnail size
/// from the in-memory image, never re-reading from disk per size.
pub fn generate_all(source_bytes: &[u8]) -> AppResult<Vec<GeneratedThumbnail>> {
    let image = image::load_from_memory(source_bytes)
        .map_err(|e| AppError::Integrity(format!("thumbnail source decode failed: {e}")))?;

    ThumbnailSize::ALL
        .iter()
        .map(|&size| generate_one(&image, size))
        .collect()
}

fn generate_one(image: &DynamicImage, size: ThumbnailSize) -> AppResult<GeneratedThumbnail> {
    let max_edge = size.max_edge();
    let resized = if image.width().max(image.height()) > max_edge {
        image.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        image.clone()
    };

    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder
        .encode_image(&resized)
        .map_err(|e| AppError::Integrity(format!("thumbnail encode failed: {e}")))?;

    Ok(GeneratedThumbnail { size, width: resized.width(), height: resized.height(), jpeg_bytes: buf })
}

#[allow(dead_code)]
const _SUPPORTED_OUTPUT: ImageFormat = ImageFormat::Jpeg;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        let image = DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
        buf
    }

    #[test]
    fn generates_three_sizes_preserving_aspect_ratio() {
        let bytes = sample_jpeg(3200, 1600);
        let thumbnails = generate_all(&bytes).unwrap();
        assert_eq!(thumbnails.len(), 3);
        for t in &thumbnails {
            assert!(t.width <= t.height.max(t.width));
            assert_eq!(t.width * 1600, t.height * 3200);
        }
    }

    #[test]
    fn small_source_is_not_upscaled() {
        let bytes = sample_jpeg(64, 64);
        let thumbnails = generate_all(&bytes).unwrap();
        let small = thumbnails.iter().find(|t| t.size == ThumbnailSize::Small).unwrap();
        assert_eq!((small.width, small.height), (64, 64));
    }

    #[test]
    fn invalid_bytes_are_rejected_as_integrity_error() {
        let result = generate_all(b"not an image");
        assert!(matches!(result, Err(AppError::Integrity(_))));
    }
}
