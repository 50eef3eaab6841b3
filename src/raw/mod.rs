pub mod jpeg_scan;

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};

use crate::error::{AppError, AppResult};

/// Minimum acceptable embedded-preview dimension on both axes. Not spec-
/// mandated; fixed here as a configuration constant per §4.2.
pub const MIN_PREVIEW_DIMENSION: u32 = 512;
/// How close to the end of the scanned header region the embedded preview's
/// EOI must fall to be trusted as the main preview rather than a thumbnail
/// nested inside it.
pub const EOI_TAIL_WINDOW: usize = 8 * 1024;
/// How much of the file to read when looking for an embedded preview before
/// falling back to a full decode.
const HEADER_SCAN_BYTES: usize = 512 * 1024;
/// Bound on any external decoder invocation.
const DECODER_TIMEOUT: Duration = Duration::from_secs(20);
const OUTPUT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone)]
pub struct PreviewResult {
    pub jpeg_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub from_embedded_preview: bool,
}

/// `DecodeFailed`: the caller keeps the original bytes and marks the asset
/// `failed` with this reason; it must never delete the file.
#[derive(Debug, Clone, thiserror::Error)]
#[error("RAW decode failed: {0}")]
pub struct DecodeFailed(pub String);

/// Extensions recognized as RAW containers by this engine.
const RAW_EXTENSIONS: &[&str] = &["cr2", "cr3", "arw", "nef", "dng", "raf", "orf", "rw2"];

pub fn is_raw_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RAW_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Turns a RAW file into a viewable JPEG, preferring the embedded preview
/// when it is large enough, otherwise decoding in full. Strategy selection
/// is `auto`: try the embedded preview first (cheap), then the decoder
/// chain in order, stopping at the first success.
pub async fn decode_preview(path: &Path) -> Result<PreviewResult, DecodeFailed> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| DecodeFailed(format!("read failed: {e}")))?;

    if let Some(preview) = extract_embedded_preview(&bytes) {
        return Ok(preview);
    }

    let path = path.to_path_buf();
    if let Some(result) = try_native_decode(path.clone()).await {
        return Ok(result);
    }
    if let Some(result) = try_external_decoder(&path).await {
        return Ok(result);
    }
    if let Some(result) = try_generic_decode(&bytes) {
        return Ok(result);
    }

    Err(DecodeFailed("all decoder tiers exhausted".to_string()))
}

/// Looks for an embedded JPEG preview two ways: first via the EXIF IFD1
/// `JPEGInterchangeFormat`/`JPEGInterchangeFormatLength` tags (cheap, exact
/// slice when present), then by scanning the header region for a raw SOI
/// and validating it with the segment scanner. Either path is rejected
/// unless `jpeg_scan::embedded_preview_acceptable` accepts it.
fn extract_embedded_preview(bytes: &[u8]) -> Option<PreviewResult> {
    if let Some(slice) = embedded_preview_via_exif(bytes) {
        if let Some(extent) =
            jpeg_scan::embedded_preview_acceptable(slice, EOI_TAIL_WINDOW, MIN_PREVIEW_DIMENSION)
        {
            let (w, h) = extent.dimensions.unwrap_or((0, 0));
            return Some(PreviewResult {
                jpeg_bytes: slice[extent.start..extent.end].to_vec(),
                width: w,
                height: h,
                from_embedded_preview: true,
            });
        }
    }

    let scan_region = &bytes[..bytes.len().min(HEADER_SCAN_BYTES)];
    let extent = jpeg_scan::embedded_preview_acceptable(scan_region, EOI_TAIL_WINDOW, MIN_PREVIEW_DIMENSION)?;
    let (w, h) = extent.dimensions.unwrap_or((0, 0));
    Some(PreviewResult {
        jpeg_bytes: scan_region[extent.start..extent.end].to_vec(),
        width: w,
        height: h,
        from_embedded_preview: true,
    })
}

/// Reads the EXIF IFD1 thumbnail tags (when present) and returns the byte
/// range they describe. `exif::Reader` parses both primary and thumbnail
/// IFDs from a TIFF-based container, which is what every supported RAW
/// format here is built on.
fn embedded_preview_via_exif(bytes: &[u8]) -> Option<&[u8]> {
    let mut cursor = Cursor::new(bytes);
    let exif_reader = exif::Reader::new();
    let fields = exif_reader.read_from_container(&mut cursor).ok()?;

    let offset = fields
        .fields()
        .find(|f| f.tag == exif::Tag::JPEGInterchangeFormat && f.ifd_num == exif::In::THUMBNAIL)
        .and_then(|f| f.value.get_uint(0))? as usize;
    let length = fields
        .fields()
        .find(|f| f.tag == exif::Tag::JPEGInterchangeFormatLength && f.ifd_num == exif::In::THUMBNAIL)
        .and_then(|f| f.value.get_uint(0))? as usize;

    bytes.get(offset..offset.checked_add(length)?)
}

/// Tier 1: pure-Rust in-process RAW decode. CPU-bound, so run on a blocking
/// thread; failures are logged and fall through to the next tier rather
/// than aborting the chain.
async fn try_native_decode(path: std::path::PathBuf) -> Option<PreviewResult> {
    let result = tokio::task::spawn_blocking(move || native_decode(&path)).await;
    match result {
        Ok(Ok(preview)) => Some(preview),
        Ok(Err(e)) => {
            tracing::debug!("native RAW decode failed: {e}");
            None
        }
        Err(e) => {
            tracing::debug!("native RAW decode task panicked: {e}");
            None
        }
    }
}

fn native_decode(path: &Path) -> Result<PreviewResult, String> {
    let source = rawler::rawsource::RawSource::new(path).map_err(|e| e.to_string())?;
    let decoder = rawler::get_decoder(&source).map_err(|e| e.to_string())?;
    let raw_image = decoder
        .raw_image(&source, &rawler::decoders::RawDecodeParams::default(), false)
        .map_err(|e| e.to_string())?;

    let width = raw_image.width as u32;
    let height = raw_image.height as u32;
    let gray = to_luma_image(&raw_image)?;
    encode_jpeg(&DynamicImage::ImageLuma8(gray), width, height)
}

fn to_luma_image(raw_image: &rawler::RawImage) -> Result<image::GrayImage, String> {
    let width = raw_image.width as u32;
    let height = raw_image.height as u32;
    let max = raw_image.whitelevel.as_array()[0].max(1) as f32;
    let samples: Vec<u8> = raw_image
        .data
        .as_ref()
        .iter()
        .map(|&v| ((v as f32 / max) * 255.0).clamp(0.0, 255.0) as u8)
        .collect();
    image::GrayImage::from_raw(width, height, samples).ok_or_else(|| "raw buffer size mismatch".to_string())
}

/// Tier 2: shells out to an external RAW->image CLI converter located on
/// `PATH`, bounded by a timeout. Tries the converters in order and stops at
/// the first one that both exists on `PATH` and succeeds.
async fn try_external_decoder(path: &Path) -> Option<PreviewResult> {
    const CANDIDATES: &[&str] = &["dcraw", "ufraw-batch"];
    for program in CANDIDATES {
        if which(program).is_none() {
            continue;
        }
        match run_external_decoder(program, path).await {
            Ok(preview) => return Some(preview),
            Err(e) => tracing::debug!("external decoder '{program}' failed: {e}"),
        }
    }
    None
}

async fn run_external_decoder(program: &str, path: &Path) -> Result<PreviewResult, String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.arg("-c").arg(path);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd.spawn().map_err(|e| e.to_string())?;
    let output = tokio::time::timeout(DECODER_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| "decoder timed out".to_string())?
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(format!("{program} exited with {}", output.status));
    }

    let image = image::load_from_memory_with_format(&output.stdout, ImageFormat::Pnm)
        .or_else(|_| image::load_from_memory(&output.stdout))
        .map_err(|e| e.to_string())?;
    let (width, height) = (image.width(), image.height());
    encode_jpeg(&image, width, height)
}

fn which(program: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Tier 3: some DNG files are baseline-TIFF enough for the general-purpose
/// image crate to open directly; try it as a last resort before declaring
/// `DecodeFailed`.
fn try_generic_decode(bytes: &[u8]) -> Option<PreviewResult> {
    let image = image::load_from_memory(bytes).ok()?;
    let (width, height) = (image.width(), image.height());
    encode_jpeg(&image, width, height).ok()
}

fn encode_jpeg(image: &DynamicImage, width: u32, height: u32) -> Result<PreviewResult, String> {
    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, OUTPUT_JPEG_QUALITY);
    encoder.encode_image(image).map_err(|e| e.to_string())?;
    Ok(PreviewResult { jpeg_bytes: buf, width, height, from_embedded_preview: false })
}

pub fn to_app_error(e: DecodeFailed) -> AppError {
    AppError::Integrity(e.0)
}

pub fn ok_or_failed(result: Result<PreviewResult, DecodeFailed>) -> AppResult<PreviewResult> {
    result.map_err(to_app_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_raw_extension_is_case_insensitive() {
        assert!(is_raw_extension(Path::new("photo.CR2")));
        assert!(is_raw_extension(Path::new("photo.dng")));
        assert!(!is_raw_extension(Path::new("photo.jpg")));
    }

    #[test]
    fn generic_decode_recovers_a_plain_jpeg() {
        let mut buf = Vec::new();
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(16, 16));
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
        let preview = try_generic_decode(&buf).unwrap();
        assert_eq!((preview.width, preview.height), (16, 16));
        assert!(!preview.from_embedded_preview);
    }
}
