//! Minimal EXIF scanning: capture date and orientation.
//!
//! Rather than walking the TIFF directory structure, the APP1 payload is
//! scanned with byte patterns for the two values the server needs. The
//! orientation tag (0x0112, SHORT, count 1) has a fixed encoding in each
//! byte order, so a single pattern per order finds it.

use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{Local, NaiveDate, TimeZone};
use regex::bytes::Regex;

const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// How far into a file the APP1 segment is searched for.
const EXIF_SEARCH_LIMIT: usize = 128 * 1024;

/// Locate the EXIF payload (starting at the `Exif\0\0` header) in the
/// first bytes of an image file.
pub fn find_exif(file_bytes: &[u8]) -> Option<&[u8]> {
    let head = &file_bytes[..file_bytes.len().min(EXIF_SEARCH_LIMIT)];
    head.windows(EXIF_HEADER.len())
        .position(|w| w == EXIF_HEADER)
        .map(|start| &file_bytes[start..])
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4}):(\d\d):(\d\d) (\d\d):(\d\d):(\d\d)").expect("valid date pattern")
    })
}

fn intel_orientation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s-u)\x12\x01\x03\x00\x01\x00\x00\x00(.)\x00\x00\x00")
            .expect("valid orientation pattern")
    })
}

fn motorola_orientation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s-u)\x01\x12\x00\x03\x00\x00\x00\x01\x00(.)\x00\x00")
            .expect("valid orientation pattern")
    })
}

/// First `YYYY:MM:DD HH:MM:SS` timestamp, interpreted in local time.
///
/// A zero year (cameras that never had their clock set) yields `None`.
pub fn capture_date(exif: &[u8]) -> Option<SystemTime> {
    let caps = date_pattern().captures(exif)?;
    let field = |i: usize| -> Option<u32> {
        std::str::from_utf8(caps.get(i)?.as_bytes()).ok()?.parse().ok()
    };

    let year = field(1)? as i32;
    if year == 0 {
        return None;
    }
    let naive = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?
        .and_hms_opt(field(4)?, field(5)?, field(6)?)?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(SystemTime::from(local))
}

/// Raw orientation value (1-8) from the EXIF payload.
pub fn orientation(exif: &[u8]) -> Option<u8> {
    let body = exif.strip_prefix(EXIF_HEADER).unwrap_or(exif);
    let pattern = if body.first() == Some(&b'I') {
        intel_orientation_pattern()
    } else {
        motorola_orientation_pattern()
    };
    pattern
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_bytes()[0])
}

/// Counter-clockwise correction in degrees for an orientation value.
///
/// Mirrored orientations are treated like their unmirrored rotation.
pub fn orientation_degrees(orientation: u8) -> i32 {
    match orientation {
        3 | 4 => 180,
        5 | 8 => 90,
        6 | 7 => -90,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn intel_exif(orientation: u8) -> Vec<u8> {
        let mut exif = EXIF_HEADER.to_vec();
        exif.extend_from_slice(b"II*\0\x08\0\0\0\x01\0");
        exif.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00]);
        exif.extend_from_slice(&[orientation, 0x00, 0x00, 0x00]);
        exif
    }

    fn motorola_exif(orientation: u8) -> Vec<u8> {
        let mut exif = EXIF_HEADER.to_vec();
        exif.extend_from_slice(b"MM\0*\0\0\0\x08\0\x01");
        exif.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        exif.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
        exif
    }

    #[test]
    fn test_orientation_intel() {
        assert_eq!(orientation(&intel_exif(6)), Some(6));
    }

    #[test]
    fn test_orientation_motorola() {
        assert_eq!(orientation(&motorola_exif(8)), Some(8));
    }

    #[test]
    fn test_orientation_missing() {
        assert_eq!(orientation(b"Exif\0\0II*\0nothing here"), None);
    }

    #[test]
    fn test_orientation_degrees_mapping() {
        let mapped: Vec<i32> = (1..=8).map(orientation_degrees).collect();
        assert_eq!(mapped, vec![0, 0, 180, 180, 90, -90, -90, 90]);
        assert_eq!(orientation_degrees(0), 0);
    }

    #[test]
    fn test_capture_date_local_time() {
        let exif = b"Exif\0\0MM....2021:07:04 18:30:05\0";
        let when = capture_date(exif).unwrap();
        let local: chrono::DateTime<Local> = when.into();
        assert_eq!((local.year(), local.month(), local.day()), (2021, 7, 4));
        assert_eq!((local.hour(), local.minute(), local.second()), (18, 30, 5));
    }

    #[test]
    fn test_capture_date_zero_year_ignored() {
        assert_eq!(capture_date(b"0000:00:00 00:00:00"), None);
    }

    #[test]
    fn test_find_exif_in_jpeg_header() {
        let mut file = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x20];
        file.extend_from_slice(&intel_exif(3));
        let exif = find_exif(&file).unwrap();
        assert!(exif.starts_with(EXIF_HEADER));
        assert_eq!(orientation(exif), Some(3));
        assert!(find_exif(&[0xFF, 0xD8, 0xFF, 0xDB]).is_none());
    }
}
