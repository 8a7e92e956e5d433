use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// MIME type used when the extension is unknown.
pub const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Classify a MIME type string. Anything that is not `video/*` is sent as a photo.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video") {
            MediaKind::Video
        } else {
            MediaKind::Photo
        }
    }

    pub fn is_video(self) -> bool {
        self == MediaKind::Video
    }
}

/// Maps a local path to a MIME type string.
pub trait MimeLookup: Send + Sync {
    fn lookup(&self, path: &Path) -> Option<String>;
}

/// Extension-based lookup backed by `mime_guess`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeGuess;

impl MimeLookup for MimeGuess {
    fn lookup(&self, path: &Path) -> Option<String> {
        // mime_guess types AVCHD clips as a 3D model format
        let avchd = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mts"));
        if avchd {
            return Some("video/mp2t".to_string());
        }
        mime_guess::from_path(path).first().map(|m| m.essence_str().to_string())
    }
}

/// A local file selected for upload.
///
/// Identity is `local_path`. Items are never modified after enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub local_path: PathBuf,
    /// File name as sent to the server (NFC normalized)
    pub display_name: String,
    pub declared_kind: MediaKind,
    /// Filesystem creation time, if the platform reports one
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    /// Filesystem modification time
    #[serde(default)]
    pub modify_time: Option<DateTime<Utc>>,
}

impl MediaItem {
    pub fn new(local_path: PathBuf, declared_kind: MediaKind) -> Self {
        let display_name = display_name_for(&local_path);
        Self {
            local_path,
            display_name,
            declared_kind,
            create_time: None,
            modify_time: None,
        }
    }

    /// Stat `path` and build an item with its filesystem times.
    pub fn from_path(path: &Path, mime: &dyn MimeLookup) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let kind = mime
            .lookup(path)
            .map(|m| MediaKind::from_mime(&m))
            .unwrap_or(MediaKind::Photo);

        let mut item = Self::new(path.to_path_buf(), kind);
        item.create_time = metadata.created().ok().map(DateTime::<Utc>::from);
        item.modify_time = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(item)
    }

    pub fn with_times(
        mut self,
        create_time: Option<DateTime<Utc>>,
        modify_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.create_time = create_time;
        self.modify_time = modify_time;
        self
    }
}

fn display_name_for(path: &Path) -> String {
    let raw = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    raw.nfc().collect()
}
