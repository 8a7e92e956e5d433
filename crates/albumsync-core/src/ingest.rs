use std::num::NonZeroUsize;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::date::{self, exif::MetadataReader};
use crate::media::{MediaItem, MediaKind, MimeLookup, FALLBACK_MIME};
use crate::notice::Notifier;
use crate::partition::{self, Batch};
use crate::progress::{ProgressCallback, TransferReporter};
use crate::transport::{AlbumStore, FileTransport, TransportError, UploadEntry};

/// Collaborators used by one ingestion run.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
    pub albums: &'a dyn AlbumStore,
    pub transport: &'a dyn FileTransport,
    pub metadata: &'a dyn MetadataReader,
    pub mime: &'a dyn MimeLookup,
    pub notifier: &'a dyn Notifier,
}

/// Failures that stop a run before any batch is sent.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to create album {album}: {source}")]
    AlbumCreation {
        album: String,
        #[source]
        source: TransportError,
    },
}

/// A batch whose transfer failed. Its items are in `RunReport::failed_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub start_offset: usize,
    pub len: usize,
    pub message: String,
}

/// Outcome of a run that got past album creation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub album: String,
    pub total_items: usize,
    pub sent: usize,
    /// Items of failed batches, in input order
    pub failed_items: Vec<MediaItem>,
    pub encountered_failure: bool,
    pub batch_failures: Vec<BatchFailure>,
}

/// Bookkeeping for a single run. Created per call and consumed into the report.
struct RunState {
    target_album: String,
    total_items: usize,
    cursor: usize,
    sent: usize,
    failed_items: Vec<MediaItem>,
    encountered_failure: bool,
    batch_failures: Vec<BatchFailure>,
}

impl RunState {
    fn new(target_album: &str, total_items: usize) -> Self {
        Self {
            target_album: target_album.to_string(),
            total_items,
            cursor: 0,
            sent: 0,
            failed_items: Vec::new(),
            encountered_failure: false,
            batch_failures: Vec::new(),
        }
    }

    fn record_sent(&mut self, batch: &Batch<'_>) {
        self.sent += batch.len();
    }

    fn record_failure(&mut self, batch: &Batch<'_>, error: &TransportError) {
        self.encountered_failure = true;
        self.failed_items.extend_from_slice(batch.items);
        self.batch_failures.push(BatchFailure {
            start_offset: batch.start_offset,
            len: batch.len(),
            message: error.to_string(),
        });
    }

    fn advance(&mut self, next_cursor: usize) {
        debug_assert!(next_cursor > self.cursor);
        self.cursor = next_cursor;
    }

    /// Items covered so far. The cursor runs past the end after a short last batch.
    fn processed(&self) -> usize {
        self.cursor.min(self.total_items)
    }

    fn into_report(self) -> RunReport {
        debug_assert_eq!(self.sent + self.failed_items.len(), self.total_items);
        RunReport {
            album: self.target_album,
            total_items: self.total_items,
            sent: self.sent,
            failed_items: self.failed_items,
            encountered_failure: self.encountered_failure,
            batch_failures: self.batch_failures,
        }
    }
}

/// Build the upload metadata for one item: MIME type, kind and capture time.
pub fn prepare_entry(
    item: &MediaItem,
    metadata: &dyn MetadataReader,
    mime: &dyn MimeLookup,
) -> UploadEntry {
    let mime_type = mime
        .lookup(&item.local_path)
        .unwrap_or_else(|| FALLBACK_MIME.to_string());
    let kind = MediaKind::from_mime(&mime_type);
    let resolved = date::resolve_capture_time(item, kind, metadata);

    UploadEntry {
        local_path: item.local_path.clone(),
        display_name: item.display_name.clone(),
        mime: mime_type,
        kind,
        captured_at: resolved.date,
    }
}

/// Prepare every entry of a batch. Items are resolved on the rayon pool
/// and collected back in input order.
pub fn prepare_batch(
    batch: &Batch<'_>,
    metadata: &dyn MetadataReader,
    mime: &dyn MimeLookup,
) -> Vec<UploadEntry> {
    batch
        .items
        .par_iter()
        .map(|item| prepare_entry(item, metadata, mime))
        .collect()
}

/// Upload `items` to `target_album` in sequential batches of `batch_size`.
///
/// Album creation failure is the only error: it is reported through the
/// notifier and returned before any batch is attempted, and neither
/// callback fires. A failed batch is recorded in the report and the run
/// moves on to the next one. `on_complete` is called exactly once with
/// whether any batch failed.
pub fn run_ingestion(
    target_album: &str,
    items: &[MediaItem],
    batch_size: NonZeroUsize,
    ctx: &IngestContext<'_>,
    on_progress: &ProgressCallback<'_>,
    on_complete: &dyn Fn(bool),
) -> Result<RunReport, IngestError> {
    if let Err(e) = ctx.albums.create_album(target_album) {
        tracing::error!("Failed to create album {}: {}", target_album, e);
        ctx.notifier
            .error("Error", &format!("Failed to add album {}", target_album));
        return Err(IngestError::AlbumCreation {
            album: target_album.to_string(),
            source: e,
        });
    }

    tracing::info!(
        "Uploading {} items to {} in batches of {}",
        items.len(),
        target_album,
        batch_size
    );

    let mut state = RunState::new(target_album, items.len());
    let reporter = TransferReporter::new(on_progress);

    loop {
        let (batch, next_cursor) = partition::next_batch(items, state.cursor, batch_size);
        if batch.is_empty() {
            break;
        }

        let cursor = state.cursor;
        let batch_len = batch.len();
        reporter.batch_started(cursor, batch_len, state.total_items);

        let entries = prepare_batch(&batch, ctx.metadata, ctx.mime);
        tracing::debug!(
            "Sending batch at offset {} ({} items) to {}",
            cursor,
            batch_len,
            target_album
        );

        let total_items = state.total_items;
        let result = ctx
            .transport
            .send_batch(target_album, &entries, &|loaded, total| {
                reporter.bytes(cursor, batch_len, total_items, loaded, total)
            });

        match result {
            Ok(()) => state.record_sent(&batch),
            Err(e) => {
                tracing::warn!(
                    "Batch at offset {} ({} items) failed: {}",
                    cursor,
                    batch_len,
                    e
                );
                state.record_failure(&batch, &e);
            }
        }

        state.advance(next_cursor);
        tracing::debug!("{} of {} items processed", state.processed(), state.total_items);
    }

    reporter.finish();

    if !state.failed_items.is_empty() {
        ctx.notifier.info(
            "Note",
            &format!(
                "Failed to upload {} of {} media",
                state.failed_items.len(),
                state.total_items
            ),
        );
    }

    tracing::info!(
        "Finished {}: {} sent, {} failed",
        target_album,
        state.sent,
        state.failed_items.len()
    );

    on_complete(state.encountered_failure);
    Ok(state.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::exif::CaptureTags;
    use crate::media::MimeGuess;
    use crate::transport::AlbumSummary;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAlbums {
        fail: bool,
        created: Mutex<Vec<String>>,
    }

    impl AlbumStore for FakeAlbums {
        fn create_album(&self, name: &str) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::HttpStatus {
                    status: 500,
                    endpoint: "/home/folders".into(),
                });
            }
            self.created.lock().unwrap().push(name.to_string());
            Ok(())
        }

        fn list_albums(&self) -> Result<Vec<AlbumSummary>, TransportError> {
            Ok(vec![])
        }
    }

    /// Fails the batches whose call index (0-based) is listed.
    #[derive(Default)]
    struct FakeTransport {
        failing_calls: HashSet<usize>,
        calls: AtomicUsize,
        sent: Mutex<Vec<Vec<UploadEntry>>>,
    }

    impl FakeTransport {
        fn failing(calls: &[usize]) -> Self {
            Self {
                failing_calls: calls.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FileTransport for FakeTransport {
        fn send_batch(
            &self,
            _album: &str,
            entries: &[UploadEntry],
            on_bytes: &dyn Fn(u64, u64),
        ) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(entries.to_vec());
            on_bytes(0, 100);
            if self.failing_calls.contains(&call) {
                on_bytes(30, 100);
                return Err(TransportError::HttpStatus {
                    status: 502,
                    endpoint: "/folder/media/multiple_upload".into(),
                });
            }
            on_bytes(50, 100);
            on_bytes(100, 100);
            Ok(())
        }
    }

    struct NoTags;

    impl MetadataReader for NoTags {
        fn read_capture_tags(&self, _path: &Path) -> anyhow::Result<CaptureTags> {
            Ok(CaptureTags::default())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        errors: Mutex<Vec<String>>,
        infos: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn error(&self, _title: &str, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn info(&self, _title: &str, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }
    }

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
    }

    fn items(n: usize) -> Vec<MediaItem> {
        (0..n)
            .map(|i| {
                MediaItem::new(PathBuf::from(format!("/dcim/IMG_{:04}.jpg", i)), MediaKind::Photo)
                    .with_times(Some(base_time() + Duration::minutes(i as i64)), None)
            })
            .collect()
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    struct Harness {
        albums: FakeAlbums,
        transport: FakeTransport,
        notifier: RecordingNotifier,
        progress: Mutex<Vec<u8>>,
        completed: Mutex<Vec<bool>>,
    }

    impl Harness {
        fn new(albums: FakeAlbums, transport: FakeTransport) -> Self {
            Self {
                albums,
                transport,
                notifier: RecordingNotifier::default(),
                progress: Mutex::new(Vec::new()),
                completed: Mutex::new(Vec::new()),
            }
        }

        fn run(&self, items: &[MediaItem], batch_size: usize) -> Result<RunReport, IngestError> {
            let ctx = IngestContext {
                albums: &self.albums,
                transport: &self.transport,
                metadata: &NoTags,
                mime: &MimeGuess,
                notifier: &self.notifier,
            };
            run_ingestion(
                "Trip",
                items,
                size(batch_size),
                &ctx,
                &|p| self.progress.lock().unwrap().push(p),
                &|failed| self.completed.lock().unwrap().push(failed),
            )
        }

        fn progress(&self) -> Vec<u8> {
            self.progress.lock().unwrap().clone()
        }

        fn completed(&self) -> Vec<bool> {
            self.completed.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_middle_batch_failure_is_recorded_and_skipped() {
        let all = items(25);
        let h = Harness::new(FakeAlbums::default(), FakeTransport::failing(&[1]));

        let report = h.run(&all, 10).unwrap();

        assert_eq!(h.transport.call_count(), 3);
        assert_eq!(report.failed_items, all[10..20].to_vec());
        assert!(report.encountered_failure);
        assert_eq!(report.sent, 15);
        assert_eq!(report.sent + report.failed_items.len(), 25);
        assert_eq!(
            report.batch_failures,
            vec![BatchFailure {
                start_offset: 10,
                len: 10,
                message: "HTTP error 502 calling /folder/media/multiple_upload".into(),
            }]
        );
        assert_eq!(h.completed(), vec![true]);
        assert_eq!(h.notifier.infos.lock().unwrap().len(), 1);
        assert!(h.notifier.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progress_is_monotonic_and_finishes_at_100() {
        let all = items(25);
        let h = Harness::new(FakeAlbums::default(), FakeTransport::failing(&[1]));
        h.run(&all, 10).unwrap();

        let progress = h.progress();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
    }

    #[test]
    fn test_progress_sequence_all_successful() {
        let all = items(4);
        let h = Harness::new(FakeAlbums::default(), FakeTransport::default());
        let report = h.run(&all, 2).unwrap();

        // The second batch reports its starting point even though it equals
        // where the first batch ended
        assert_eq!(h.progress(), vec![0, 25, 50, 50, 75, 100]);
        assert!(!report.encountered_failure);
        assert!(report.failed_items.is_empty());
        assert_eq!(h.completed(), vec![false]);
        assert!(h.notifier.infos.lock().unwrap().is_empty());
    }

    #[test]
    fn test_album_creation_failure_is_fatal() {
        let all = items(5);
        let h = Harness::new(
            FakeAlbums {
                fail: true,
                ..Default::default()
            },
            FakeTransport::default(),
        );

        let err = h.run(&all, 2).unwrap_err();

        assert!(matches!(err, IngestError::AlbumCreation { ref album, .. } if album == "Trip"));
        assert_eq!(h.transport.call_count(), 0);
        assert!(h.progress().is_empty());
        assert!(h.completed().is_empty());
        assert_eq!(h.notifier.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_retry_of_failed_items_runs_independently() {
        let all = items(25);
        let first = Harness::new(FakeAlbums::default(), FakeTransport::failing(&[0, 2]));
        let report = first.run(&all, 10).unwrap();
        assert_eq!(report.failed_items.len(), 15);

        let second = Harness::new(FakeAlbums::default(), FakeTransport::default());
        let retry = second.run(&report.failed_items, 10).unwrap();

        assert!(!retry.encountered_failure);
        assert_eq!(retry.sent, 15);
        assert_eq!(retry.total_items, 15);
        assert_eq!(second.completed(), vec![false]);

        let resent: Vec<PathBuf> = second
            .transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|e| e.local_path.clone())
            .collect();
        let expected: Vec<PathBuf> = all[0..10]
            .iter()
            .chain(&all[20..25])
            .map(|m| m.local_path.clone())
            .collect();
        assert_eq!(resent, expected);
    }

    #[test]
    fn test_entries_are_positional_with_kind_and_time() {
        let all = vec![
            MediaItem::new(PathBuf::from("/dcim/a.jpg"), MediaKind::Photo)
                .with_times(Some(base_time()), None),
            MediaItem::new(PathBuf::from("/dcim/b.mp4"), MediaKind::Video)
                .with_times(None, Some(base_time() + Duration::hours(1))),
            MediaItem::new(PathBuf::from("/dcim/c.unknownext"), MediaKind::Photo)
                .with_times(Some(base_time() + Duration::hours(2)), None),
        ];
        let h = Harness::new(FakeAlbums::default(), FakeTransport::default());
        h.run(&all, 10).unwrap();

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let batch = &sent[0];
        let names: Vec<&str> = batch.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.mp4", "c.unknownext"]);
        assert_eq!(batch[0].kind, MediaKind::Photo);
        assert_eq!(batch[1].kind, MediaKind::Video);
        assert_eq!(batch[2].mime, FALLBACK_MIME);
        assert_eq!(batch[0].captured_at, base_time());
        assert_eq!(batch[1].captured_at, base_time() + Duration::hours(1));
        assert_eq!(batch[2].captured_at, base_time() + Duration::hours(2));
    }

    #[test]
    fn test_empty_input_completes_without_sending() {
        let h = Harness::new(FakeAlbums::default(), FakeTransport::default());
        let report = h.run(&[], 10).unwrap();

        assert_eq!(h.transport.call_count(), 0);
        assert_eq!(h.albums.created.lock().unwrap().as_slice(), ["Trip"]);
        assert_eq!(report.total_items, 0);
        assert_eq!(h.completed(), vec![false]);
        assert_eq!(h.progress(), vec![100]);
    }

    #[test]
    fn test_batch_size_larger_than_input() {
        let all = items(3);
        let h = Harness::new(FakeAlbums::default(), FakeTransport::failing(&[0]));
        let report = h.run(&all, 50).unwrap();

        assert_eq!(h.transport.call_count(), 1);
        assert_eq!(report.failed_items, all);
        assert_eq!(report.sent, 0);
        assert_eq!(h.completed(), vec![true]);
    }

    #[test]
    fn test_run_state_cursor_overshoot() {
        let all = items(25);
        let size = NonZeroUsize::new(10).unwrap();
        let mut state = RunState::new("Trip", all.len());
        loop {
            let (batch, next) = partition::next_batch(&all, state.cursor, size);
            if batch.is_empty() {
                break;
            }
            state.record_sent(&batch);
            state.advance(next);
        }

        assert_eq!(state.cursor, 30);
        assert_eq!(state.processed(), 25);
        assert_eq!(state.into_report().sent, 25);
    }
}
