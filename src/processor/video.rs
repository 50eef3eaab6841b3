//! Best-effort container sniffing for video, used when no full media-probing
//! binary is available in this codebase's lineage (none is; fabricating one
//! would violate the no-invented-dependency rule — see DESIGN.md). Walks
//! just enough of an MP4 container's box structure to read `mvhd` duration;
//! other containers are identified by magic bytes only.

#[derive(Debug, Clone, Default)]
pub struct VideoProbe {
    pub codec_guess: String,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub fn probe(bytes: &[u8]) -> VideoProbe {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let mut probe = VideoProbe { codec_guess: "mp4".to_string(), ..Default::default() };
        probe.duration_secs = find_mvhd_duration(bytes);
        return probe;
    }
    if bytes.len() >= 4 && &bytes[0..4] == b"RIFF" && bytes.len() >= 12 && &bytes[8..12] == b"AVI " {
        return VideoProbe { codec_guess: "avi".to_string(), ..Default::default() };
    }
    if bytes.len() >= 4 && bytes[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return VideoProbe { codec_guess: "matroska".to_string(), ..Default::default() };
    }
    VideoProbe { codec_guess: "unknown".to_string(), ..Default::default() }
}

/// Walks top-level ISO-BMFF boxes looking for `moov/mvhd` and reads its
/// timescale/duration fields. Stops at the first `moov` found; doesn't
/// recurse into every nested box since only `mvhd` is needed here.
fn find_mvhd_duration(bytes: &[u8]) -> Option<f64> {
    let mut pos = 0usize;
    while pos + 8 <= bytes.len() {
        let size = u32::from_be_bytes(bytes[pos..pos + 4].try_into().ok()?) as usize;
        let box_type = &bytes[pos + 4..pos + 8];
        if size < 8 || pos + size > bytes.len() {
            break;
        }
        if box_type == b"moov" {
            return find_mvhd_in_range(&bytes[pos + 8..pos + size]);
        }
        pos += size;
    }
    None
}

fn find_mvhd_in_range(bytes: &[u8]) -> Option<f64> {
    let mut pos = 0usize;
    while pos + 8 <= bytes.len() {
        let size = u32::from_be_bytes(bytes[pos..pos + 4].try_into().ok()?) as usize;
        let box_type = &bytes[pos + 4..pos + 8];
        if size < 8 || pos + size > bytes.len() {
            break;
        }
        if box_type == b"mvhd" {
            let body = &bytes[pos + 8..pos + size];
            if body.is_empty() {
                return None;
            }
            let version = body[0];
            return if version == 1 {
                let timescale = u32::from_be_bytes(body[20..24].try_into().ok()?);
                let duration = u64::from_be_bytes(body[24..32].try_into().ok()?);
                Some(duration as f64 / timescale.max(1) as f64)
            } else {
                let timescale = u32::from_be_bytes(body[12..16].try_into().ok()?);
                let duration = u32::from_be_bytes(body[16..20].try_into().ok()?);
                Some(duration as f64 / timescale.max(1) as f64)
            };
        }
        pos += size;
    }
    None
}

use super::{placeholder_thumbnail, thumbnail, MediaPipeline, ProbeResult};
use crate::error::AppResult;
use crate::ml::MlClient;
use serde_json::json;

pub struct VideoPipeline;

impl MediaPipeline for VideoPipeline {
    fn probe(&self, bytes: &[u8]) -> ProbeResult {
        let probed = probe(bytes);
        ProbeResult {
            width: probed.width,
            height: probed.height,
            taken_time: None,
            duration_secs: probed.duration_secs,
            specific_metadata: json!({ "codec_guess": probed.codec_guess }),
        }
    }

    /// No frame-extraction dependency exists anywhere in this codebase's
    /// lineage, so the video pipeline's thumbnail is a generated
    /// placeholder rather than a decoded representative frame — a scope
    /// decision recorded in DESIGN.md, not a silent gap.
    fn derive_thumbnails(&self, _bytes: &[u8]) -> AppResult<Vec<thumbnail::GeneratedThumbnail>> {
        placeholder_thumbnail()
    }

    fn descriptor_input(&self, _bytes: &[u8], _ml: &MlClient) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let size = (8 + body.len()) as u32;
        let mut buf = size.to_be_bytes().to_vec();
        buf.extend_from_slice(box_type);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn identifies_mp4_by_ftyp() {
        let mut file = mp4_box(b"ftyp", b"isom\0\0\0\0isomiso2avc1mp41");
        file.extend(mp4_box(b"moov", &[]));
        let probe = probe(&file);
        assert_eq!(probe.codec_guess, "mp4");
    }

    #[test]
    fn reads_mvhd_duration_version_0() {
        let mut mvhd_body = vec![0u8; 20];
        mvhd_body[12..16].copy_from_slice(&1000u32.to_be_bytes()); // timescale
        mvhd_body[16..20].copy_from_slice(&5000u32.to_be_bytes()); // duration
        let mvhd = mp4_box(b"mvhd", &mvhd_body);
        let moov = mp4_box(b"moov", &mvhd);
        let mut file = mp4_box(b"ftyp", b"isom");
        file.extend(moov);

        let probe = probe(&file);
        assert_eq!(probe.duration_secs, Some(5.0));
    }

    #[test]
    fn unknown_container_has_no_duration() {
        let probe = probe(b"not a video file at all");
        assert_eq!(probe.codec_guess, "unknown");
        assert!(probe.duration_secs.is_none());
    }
}
