pub mod client;
pub mod config;
pub mod date;
pub mod ingest;
pub mod manifest;
pub mod media;
pub mod notice;
pub mod partition;
pub mod progress;
pub mod scan;
pub mod transport;

use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use client::{ApiClient, RemoteMedia};
pub use config::ClientConfig;
pub use ingest::{run_ingestion, BatchFailure, IngestContext, IngestError, RunReport};
pub use manifest::{FailedManifest, MANIFEST_FILENAME};
pub use media::{MediaItem, MediaKind, MimeGuess, MimeLookup};
pub use notice::{LogNotifier, Notifier};
pub use progress::ProgressCallback;
pub use transport::{AlbumStore, AlbumSummary, FileTransport, TransportError, UploadEntry};

fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOptions {
    pub album: String,
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Where failed items are recorded. Defaults to `MANIFEST_FILENAME`
    /// in the working directory.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

impl IngestOptions {
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(MANIFEST_FILENAME))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pub album: String,
    pub total_media: u64,
    pub sent: u64,
    pub failed: u64,
    #[serde(default)]
    pub batch_failures: Vec<BatchFailure>,
    /// Set when failed items were written out for a later retry.
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

/// Scan the input paths and upload everything to the album.
pub fn process(
    options: &IngestOptions,
    ctx: &IngestContext<'_>,
    on_progress: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let batch_size = batch_size(options.batch_size)?;
    let items = scan::scan_paths(&options.paths, ctx.mime)?;
    ingest_items(&options.album, &items, batch_size, ctx, on_progress, &options.manifest_path())
}

/// Re-submit the items recorded in a manifest as a fresh run.
///
/// Returns `None` when there is no manifest at `manifest_path`.
pub fn retry_failed(
    manifest_path: &std::path::Path,
    batch_size: usize,
    ctx: &IngestContext<'_>,
    on_progress: &ProgressCallback<'_>,
) -> anyhow::Result<Option<ProcessResult>> {
    let batch_size = self::batch_size(batch_size)?;
    let Some(manifest) = FailedManifest::load(manifest_path)
        .with_context(|| format!("Cannot read manifest {}", manifest_path.display()))?
    else {
        return Ok(None);
    };

    tracing::info!(
        "Retrying {} items for album {}",
        manifest.items.len(),
        manifest.album
    );
    ingest_items(&manifest.album, &manifest.items, batch_size, ctx, on_progress, manifest_path)
        .map(Some)
}

fn batch_size(raw: usize) -> anyhow::Result<NonZeroUsize> {
    NonZeroUsize::new(raw).context("Batch size must be at least 1")
}

fn ingest_items(
    album: &str,
    items: &[MediaItem],
    batch_size: NonZeroUsize,
    ctx: &IngestContext<'_>,
    on_progress: &ProgressCallback<'_>,
    manifest_path: &std::path::Path,
) -> anyhow::Result<ProcessResult> {
    let on_complete = |has_error: bool| {
        tracing::debug!("Run for album {} complete (errors: {})", album, has_error);
    };
    let report = run_ingestion(album, items, batch_size, ctx, on_progress, &on_complete)?;

    let manifest = if report.failed_items.is_empty() {
        FailedManifest::delete(manifest_path)?;
        None
    } else {
        FailedManifest::new(album, report.failed_items.clone())
            .save(manifest_path)
            .with_context(|| format!("Cannot write manifest {}", manifest_path.display()))?;
        tracing::info!(
            "Recorded {} failed items in {}",
            report.failed_items.len(),
            manifest_path.display()
        );
        Some(manifest_path.to_path_buf())
    };

    Ok(ProcessResult {
        album: report.album,
        total_media: report.total_items as u64,
        sent: report.sent as u64,
        failed: report.failed_items.len() as u64,
        batch_failures: report.batch_failures,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::exif::{CaptureTags, MetadataReader};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct OkAlbums;

    impl AlbumStore for OkAlbums {
        fn create_album(&self, _name: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn list_albums(&self) -> Result<Vec<AlbumSummary>, TransportError> {
            Ok(vec![])
        }
    }

    /// Fails every batch containing a file whose name starts with `bad`.
    struct PickyTransport {
        received: Mutex<Vec<String>>,
    }

    impl FileTransport for PickyTransport {
        fn send_batch(
            &self,
            _album: &str,
            entries: &[UploadEntry],
            on_bytes: &dyn Fn(u64, u64),
        ) -> Result<(), TransportError> {
            if entries.iter().any(|e| e.display_name.starts_with("bad")) {
                return Err(TransportError::Rejected("bad file".into()));
            }
            on_bytes(1, 1);
            self.received
                .lock()
                .unwrap()
                .extend(entries.iter().map(|e| e.display_name.clone()));
            Ok(())
        }
    }

    struct NoTags;

    impl MetadataReader for NoTags {
        fn read_capture_tags(&self, _path: &Path) -> anyhow::Result<CaptureTags> {
            Ok(CaptureTags::default())
        }
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
    }

    #[test]
    fn test_process_records_and_retries_failures() {
        let media = tempdir().unwrap();
        touch(media.path(), &["a.jpg", "b.jpg", "bad.jpg", "c.jpg"]);
        let state = tempdir().unwrap();
        let manifest_path = state.path().join(MANIFEST_FILENAME);

        let transport = PickyTransport {
            received: Mutex::new(vec![]),
        };
        let ctx = IngestContext {
            albums: &OkAlbums,
            transport: &transport,
            metadata: &NoTags,
            mime: &MimeGuess,
            notifier: &LogNotifier,
        };
        let options = IngestOptions {
            album: "Trip".into(),
            paths: vec![media.path().to_path_buf()],
            batch_size: 2,
            manifest_path: Some(manifest_path.clone()),
        };

        // Sorted: a, b | bad, c
        let seen = Mutex::new(Vec::new());
        let result = process(&options, &ctx, &|p| seen.lock().unwrap().push(p)).unwrap();
        assert_eq!(seen.lock().unwrap().last(), Some(&100));
        assert_eq!(result.total_media, 4);
        assert_eq!(result.sent, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.manifest.as_deref(), Some(manifest_path.as_path()));

        let saved = FailedManifest::load(&manifest_path).unwrap().unwrap();
        let names: Vec<_> = saved.items.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["bad.jpg", "c.jpg"]);

        // Drop the offending file from the manifest; the rest goes through
        let mut fixed = saved;
        fixed.items.retain(|i| i.display_name != "bad.jpg");
        fixed.save(&manifest_path).unwrap();

        let retried = retry_failed(&manifest_path, 10, &ctx, &|_| {})
            .unwrap()
            .unwrap();
        assert_eq!(retried.sent, 1);
        assert_eq!(retried.failed, 0);
        assert!(retried.manifest.is_none());
        assert!(!manifest_path.exists());
        assert_eq!(
            *transport.received.lock().unwrap(),
            vec!["a.jpg", "b.jpg", "c.jpg"]
        );
    }

    #[test]
    fn test_retry_without_manifest() {
        let dir = tempdir().unwrap();
        let transport = PickyTransport {
            received: Mutex::new(vec![]),
        };
        let ctx = IngestContext {
            albums: &OkAlbums,
            transport: &transport,
            metadata: &NoTags,
            mime: &MimeGuess,
            notifier: &LogNotifier,
        };
        let result = retry_failed(&dir.path().join("none.json"), 10, &ctx, &|_| {}).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(batch_size(0).is_err());
        assert_eq!(batch_size(10).unwrap().get(), 10);
    }

    #[test]
    fn test_options_defaults() {
        let options: IngestOptions =
            serde_json::from_str(r#"{"album":"A","paths":["/tmp/x"]}"#).unwrap();
        assert_eq!(options.batch_size, 10);
        assert_eq!(options.manifest_path(), PathBuf::from(MANIFEST_FILENAME));
    }
}
