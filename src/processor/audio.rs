//! Best-effort container sniffing for audio, same rationale as
//! `processor::video`: magic-byte identification plus a minimal RIFF/WAVE
//! `fmt ` chunk walk for sample rate, no full decoding dependency.

#[derive(Debug, Clone, Default)]
pub struct AudioProbe {
    pub codec_guess: String,
    pub duration_secs: Option<f64>,
    pub sample_rate: Option<u32>,
}

pub fn probe(bytes: &[u8]) -> AudioProbe {
    if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
        return AudioProbe { codec_guess: "mp3".to_string(), ..Default::default() };
    }
    if bytes.len() >= 4 && &bytes[0..4] == b"fLaC" {
        return AudioProbe { codec_guess: "flac".to_string(), ..Default::default() };
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        let mut probe = AudioProbe { codec_guess: "wav".to_string(), ..Default::default() };
        if let Some((sample_rate, data_bytes, block_align)) = find_wave_fmt_and_data(bytes) {
            probe.sample_rate = Some(sample_rate);
            if block_align > 0 && sample_rate > 0 {
                probe.duration_secs = Some(data_bytes as f64 / (sample_rate as f64 * block_align as f64));
            }
        }
        return probe;
    }
    AudioProbe { codec_guess: "unknown".to_string(), ..Default::default() }
}

/// Walks RIFF chunks looking for `fmt ` (sample rate, block align) and
/// `data` (byte length), both needed to estimate PCM duration.
fn find_wave_fmt_and_data(bytes: &[u8]) -> Option<(u32, usize, u16)> {
    let mut pos = 12usize;
    let mut sample_rate = None;
    let mut block_align = None;
    let mut data_len = None;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().ok()?) as usize;
        let body_start = pos + 8;
        if chunk_id == b"fmt " && body_start + 16 <= bytes.len() {
            sample_rate = Some(u32::from_le_bytes(bytes[body_start + 4..body_start + 8].try_into().ok()?));
            block_align = Some(u16::from_le_bytes(bytes[body_start + 12..body_start + 14].try_into().ok()?));
        }
        if chunk_id == b"data" {
            data_len = Some(chunk_size);
        }
        pos = body_start + chunk_size + (chunk_size % 2);
    }

    Some((sample_rate?, data_len.unwrap_or(0), block_align.unwrap_or(0)))
}

use super::{placeholder_thumbnail, thumbnail, MediaPipeline, ProbeResult};
use crate::error::AppResult;
use crate::ml::MlClient;
use serde_json::json;

pub struct AudioPipeline;

impl MediaPipeline for AudioPipeline {
    fn probe(&self, bytes: &[u8]) -> ProbeResult {
        let probed = probe(bytes);
        ProbeResult {
            width: None,
            height: None,
            taken_time: None,
            duration_secs: probed.duration_secs,
            specific_metadata: json!({ "codec_guess": probed.codec_guess, "sample_rate": probed.sample_rate }),
        }
    }

    /// A waveform rendering would need a decode dependency this lineage
    /// doesn't carry; the audio pipeline's thumbnail is a flat placeholder,
    /// same rationale as the video pipeline.
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

    fn riff_chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut buf = id.to_vec();
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    fn wave_file(sample_rate: u32, block_align: u16, data_len: usize) -> Vec<u8> {
        let mut fmt_body = vec![1, 0, 1, 0]; // PCM, mono
        fmt_body.extend_from_slice(&sample_rate.to_le_bytes());
        fmt_body.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes()); // byte rate
        fmt_body.extend_from_slice(&block_align.to_le_bytes());
        fmt_body.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

        let mut body = b"WAVE".to_vec();
        body.extend(riff_chunk(b"fmt ", &fmt_body));
        body.extend(riff_chunk(b"data", &vec![0u8; data_len]));

        let mut file = b"RIFF".to_vec();
        file.extend_from_slice(&(body.len() as u32).to_le_bytes());
        file.extend(body);
        file
    }

    #[test]
    fn identifies_mp3_by_id3_header() {
        let probe = probe(b"ID3\x03\x00\x00\x00\x00\x00\x00rest of file");
        assert_eq!(probe.codec_guess, "mp3");
    }

    #[test]
    fn reads_wave_sample_rate_and_duration() {
        let file = wave_file(44100, 2, 44100 * 2);
        let probe = probe(&file);
        assert_eq!(probe.codec_guess, "wav");
        assert_eq!(probe.sample_rate, Some(44100));
        assert!((probe.duration_secs.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_bytes_have_unknown_codec() {
        let probe = probe(b"definitely not audio");
        assert_eq!(probe.codec_guess, "unknown");
    }
}
