//! Hand-rolled JPEG segment scanner.
//!
//! Used two ways: to validate a plain JPEG upload's structural integrity,
//! and to decide whether a JPEG preview embedded inside a RAW container is
//! "acceptable" (§4.2) rather than merely present. A bare search for the
//! `FFD9` end-of-image marker is not enough — entropy-coded scan data can
//! contain byte sequences that look like markers, and an embedded preview's
//! own thumbnail-within-a-thumbnail can have an EOI long before the image a
//! caller actually wants. This scanner walks segments properly: it skips
//! entropy data after SOS up to the next non-restart marker, and it reports
//! where EOI actually falls relative to where scanning started.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const SOS: u8 = 0xDA;

/// Markers with no payload (standalone, two bytes).
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD7)
}

#[derive(Debug, Clone, PartialEq)]
pub struct JpegExtent {
    /// Offset of the leading `FF D8` within the scanned buffer.
    pub start: usize,
    /// Offset one past the trailing `FF D9`.
    pub end: usize,
    /// Pixel dimensions read from the first SOF segment encountered, if any.
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("no SOI marker found")]
    NoSoi,
    #[error("truncated segment at offset {0}")]
    Truncated(usize),
    #[error("no EOI marker found before end of buffer")]
    NoEoi,
}

/// Scans `buf` for a complete JPEG starting at the first `FF D8`, returning
/// its extent and, if parsed, its pixel dimensions. Correctly steps over
/// entropy-coded scan data (anything between SOS and the next marker that
/// is not a restart marker) so a byte sequence resembling `FF D9` inside
/// compressed image data is not mistaken for EOI.
pub fn scan(buf: &[u8]) -> Result<JpegExtent, ScanError> {
    let start = find(buf, &SOI, 0).ok_or(ScanError::NoSoi)?;
    let mut pos = start + 2;
    let mut dimensions = None;

    loop {
        if pos + 2 > buf.len() {
            return Err(ScanError::Truncated(pos));
        }
        if buf[pos] != 0xFF {
            // Not aligned on a marker; scanners that hit this on well-formed
            // input are inside entropy data without having passed SOS,
            // which means this input isn't a clean JPEG segment stream.
            return Err(ScanError::Truncated(pos));
        }

        let marker = buf[pos + 1];
        pos += 2;

        if marker == EOI[1] {
            return Ok(JpegExtent { start, end: pos, dimensions });
        }

        if is_standalone(marker) {
            continue;
        }

        if pos + 2 > buf.len() {
            return Err(ScanError::Truncated(pos));
        }
        let seg_len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
        if seg_len < 2 || pos + seg_len > buf.len() {
            return Err(ScanError::Truncated(pos));
        }

        if is_sof_marker(marker) && seg_len >= 7 {
            let height = u16::from_be_bytes([buf[pos + 3], buf[pos + 4]]) as u32;
            let width = u16::from_be_bytes([buf[pos + 5], buf[pos + 6]]) as u32;
            dimensions = Some((width, height));
        }

        pos += seg_len;

        if marker == SOS {
            pos = skip_entropy_data(buf, pos)?;
        }
    }
}

fn is_sof_marker(marker: u8) -> bool {
    // SOF0..SOF15 excluding DHT(C4)/JPG(C8)/DAC(CC), matching the standard
    // baseline/progressive/lossless frame markers.
    matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF)
}

/// Advances past entropy-coded data following SOS: scans byte-by-byte for
/// the next `FF` not immediately followed by `00` (byte-stuffing) or by a
/// restart marker (`D0`-`D7`, which belongs to the entropy stream and is not
/// a segment boundary).
fn skip_entropy_data(buf: &[u8], mut pos: usize) -> Result<usize, ScanError> {
    while pos + 1 < buf.len() {
        if buf[pos] == 0xFF {
            let next = buf[pos + 1];
            if next == 0x00 {
                pos += 2;
                continue;
            }
            if (0xD0..=0xD7).contains(&next) {
                pos += 2;
                continue;
            }
            // Found the next real marker; hand control back to the caller.
            return Ok(pos);
        }
        pos += 1;
    }
    Err(ScanError::Truncated(pos))
}

fn find(buf: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    buf[from..].windows(2).position(|w| w == needle).map(|p| p + from)
}

/// Acceptance rule for an embedded preview (§4.2, §9): parses cleanly, its
/// EOI falls within `tail_window` bytes of the end of `buf`, and its decoded
/// dimensions meet `min_dimension` on both axes.
pub fn embedded_preview_acceptable(
    buf: &[u8],
    tail_window: usize,
    min_dimension: u32,
) -> Option<JpegExtent> {
    let extent = scan(buf).ok()?;
    if buf.len().saturating_sub(extent.end) > tail_window {
        return None;
    }
    match extent.dimensions {
        Some((w, h)) if w >= min_dimension && h >= min_dimension => Some(extent),
        _ => None,
    }
}
