//! EXIF/dimension extraction for the photo pipeline. Parsing a third-party
//! file's EXIF blob is exactly the kind of input that can be malformed
//! without being malicious; failures here degrade to "no metadata" rather
//! than failing the asset, matching gemkeep's `import/exif.rs` boundary.

use std::io::Cursor;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhotoMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub orientation: Option<u32>,
    pub taken_time: Option<DateTime<Utc>>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

/// Extracts EXIF fields from `bytes`. Never fails outward: a parse error or
/// a missing tag simply leaves the corresponding field `None`.
pub fn extract_exif(bytes: &[u8]) -> PhotoMetadata {
    let mut cursor = Cursor::new(bytes);
    let Ok(fields) = exif::Reader::new().read_from_container(&mut cursor) else {
        return PhotoMetadata::default();
    };

    let mut meta = PhotoMetadata::default();
    meta.orientation = field_uint(&fields, exif::Tag::Orientation);
    meta.width = field_uint(&fields, exif::Tag::PixelXDimension);
    meta.height = field_uint(&fields, exif::Tag::PixelYDimension);
    meta.camera_make = field_string(&fields, exif::Tag::Make);
    meta.camera_model = field_string(&fields, exif::Tag::Model);
    meta.taken_time = field_string(&fields, exif::Tag::DateTimeOriginal).and_then(|s| parse_exif_datetime(&s));

    if let (Some(lat), Some(lon)) = (gps_coordinate(&fields, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef, "S"), gps_coordinate(&fields, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef, "W")) {
        meta.gps_latitude = Some(lat);
        meta.gps_longitude = Some(lon);
    }

    meta
}

fn find_field<'a>(fields: &'a exif::Exif, tag: exif::Tag) -> Option<&'a exif::Field> {
    fields.fields().find(|f| f.tag == tag && f.ifd_num == exif::In::PRIMARY)
}

fn field_uint(fields: &exif::Exif, tag: exif::Tag) -> Option<u32> {
    find_field(fields, tag).and_then(|f| f.value.get_uint(0))
}

fn field_string(fields: &exif::Exif, tag: exif::Tag) -> Option<String> {
    find_field(fields, tag).map(|f| f.display_value().to_string().trim().to_string())
}

/// EXIF timestamps are `"YYYY:MM:DD HH:MM:SS"`, not RFC 3339.
fn parse_exif_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn gps_coordinate(fields: &exif::Exif, value_tag: exif::Tag, ref_tag: exif::Tag, negative_ref: &str) -> Option<f64> {
    let field = find_field(fields, value_tag)?;
    let exif::Value::Rational(ref rationals) = field.value else { return None };
    if rationals.len() < 3 {
        return None;
    }
    let degrees = rationals[0].to_f64();
    let minutes = rationals[1].to_f64();
    let seconds = rationals[2].to_f64();
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    if let Some(reference) = field_string(fields, ref_tag) {
        if reference == negative_ref {
            decimal = -decimal;
        }
    }
    Some(decimal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_exif_degrades_to_default() {
        let meta = extract_exif(b"not a real image");
        assert!(meta.width.is_none());
        assert!(meta.taken_time.is_none());
    }

    #[test]
    fn parses_exif_datetime_format() {
        let parsed = parse_exif_datetime("2024:03:05 14:30:00").unwrap();
        assert_eq!(parsed.to_string(), "2024-03-05 14:30:00 UTC");
    }
}
