use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use regex::Regex;

/// `YYYY:MM:DD HH:MM:SS`, also accepting `-` between date parts and `T` between date and time.
static EXIF_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})[:\-](\d{2})[:\-](\d{2})[ T](\d{2}):(\d{2}):(\d{2})").unwrap()
});

/// Raw capture tags as stored in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureTags {
    /// `DateTimeOriginal`
    pub original_capture: Option<String>,
    /// `DateTime`
    pub generic_datetime: Option<String>,
}

/// Reads embedded capture-time metadata.
pub trait MetadataReader: Send + Sync {
    fn read_capture_tags(&self, path: &Path) -> Result<CaptureTags>;
}

/// kamadak-exif backed reader. Photo containers only (JPEG, TIFF, HEIF, PNG, WebP).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifReader;

impl MetadataReader for ExifReader {
    fn read_capture_tags(&self, path: &Path) -> Result<CaptureTags> {
        let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
        let mut bufreader = BufReader::new(file);
        let exif = Reader::new()
            .read_from_container(&mut bufreader)
            .with_context(|| format!("Reading EXIF from {}", path.display()))?;

        Ok(CaptureTags {
            original_capture: ascii_field(&exif, Tag::DateTimeOriginal),
            generic_datetime: ascii_field(&exif, Tag::DateTime),
        })
    }
}

// display_value() reformats datetimes, so take the raw ASCII bytes instead.
fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// Rewrite an EXIF datetime tag into ISO-8601 (`YYYY-MM-DDTHH:MM:SS`).
pub fn exif_to_iso(raw: &str) -> Option<String> {
    let caps = EXIF_DATETIME_RE.captures(raw.trim())?;
    Some(format!(
        "{}-{}-{}T{}:{}:{}",
        &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]
    ))
}

/// Parse an EXIF datetime tag. Tags carry no zone, so the value is taken as local time.
pub fn parse_exif_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let iso = exif_to_iso(raw).with_context(|| format!("Unrecognized EXIF datetime {:?}", raw))?;
    let naive: NaiveDateTime = iso
        .parse()
        .with_context(|| format!("Invalid EXIF datetime {:?}", raw))?;
    let local = naive
        .and_local_timezone(Local)
        .earliest()
        .with_context(|| format!("EXIF datetime {:?} does not exist in the local time zone", raw))?;
    Ok(local.with_timezone(&Utc))
}
