use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaKind;

/// Errors returned by the album service and the file transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        source: reqwest::Error,
        endpoint: String,
    },

    #[error("HTTP error {status} calling {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered but refused the operation.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Transfer thread panicked")]
    Interrupted,
}

/// One album as listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub folder: String,
    #[serde(rename = "thumbnailPath", default)]
    pub thumbnail_path: Option<String>,
    #[serde(rename = "fileCount", default)]
    pub file_count: Option<u64>,
}

/// The album directory.
pub trait AlbumStore: Send + Sync {
    /// Create `name`. Succeeds when the album already exists.
    fn create_album(&self, name: &str) -> Result<(), TransportError>;

    fn list_albums(&self) -> Result<Vec<AlbumSummary>, TransportError>;

    fn album_exists(&self, name: &str) -> Result<bool, TransportError> {
        Ok(self.list_albums()?.iter().any(|a| a.folder == name))
    }
}

/// One item of a batch request. Entries are positional: the n-th entry's
/// timestamp and kind describe the n-th file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEntry {
    pub local_path: PathBuf,
    pub display_name: String,
    pub mime: String,
    pub kind: MediaKind,
    pub captured_at: DateTime<Utc>,
}

impl UploadEntry {
    /// Capture time as sent on the wire, e.g. `2019-07-04T08:20:30.000Z`.
    pub fn creation_date(&self) -> String {
        self.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Carries one batch of files to the album service.
pub trait FileTransport: Send + Sync {
    /// Send all `entries` to `album` in a single request.
    ///
    /// `on_bytes(loaded, total)` is called from the caller's thread with
    /// non-decreasing `loaded` values.
    fn send_batch(
        &self,
        album: &str,
        entries: &[UploadEntry],
        on_bytes: &dyn Fn(u64, u64),
    ) -> Result<(), TransportError>;
}
