pub mod exif;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::media::{MediaItem, MediaKind};
use self::exif::{CaptureTags, MetadataReader};

/// Where a resolved capture time came from, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateSource {
    OriginalCapture,
    GenericDatetime,
    FileCreated,
    FileModified,
    WallClock,
}

/// Result of date resolution: instant + the source that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateResult {
    pub date: DateTime<Utc>,
    pub source: DateSource,
}

type Strategy<'a> = (DateSource, Box<dyn Fn() -> Result<DateTime<Utc>> + 'a>);

/// Resolve the best-known capture instant of `item`.
///
/// Videos skip metadata entirely: the reader only understands photo
/// containers. Photos try `DateTimeOriginal`, then `DateTime`, then the
/// filesystem times. Every miss is logged and the chain moves on; the
/// wall clock is the last resort, so this never fails.
pub fn resolve_capture_time(
    item: &MediaItem,
    kind: MediaKind,
    reader: &dyn MetadataReader,
) -> DateResult {
    let tags = if kind.is_video() {
        CaptureTags::default()
    } else {
        match reader.read_capture_tags(&item.local_path) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!("Failed to read EXIF for {}: {:#}", item.local_path.display(), e);
                CaptureTags::default()
            }
        }
    };

    let strategies: Vec<Strategy<'_>> = vec![
        strategy(DateSource::OriginalCapture, || {
            tag_date(tags.original_capture.as_deref(), "DateTimeOriginal")
        }),
        strategy(DateSource::GenericDatetime, || {
            tag_date(tags.generic_datetime.as_deref(), "DateTime")
        }),
        strategy(DateSource::FileCreated, || {
            item.create_time.ok_or_else(|| anyhow!("no creation time"))
        }),
        strategy(DateSource::FileModified, || {
            item.modify_time.ok_or_else(|| anyhow!("no modification time"))
        }),
    ];

    for (source, extract) in &strategies {
        match extract() {
            Ok(date) => return DateResult { date, source: *source },
            Err(e) => tracing::debug!(
                "{:?} unavailable for {}: {:#}",
                source,
                item.local_path.display(),
                e
            ),
        }
    }

    DateResult {
        date: Utc::now(),
        source: DateSource::WallClock,
    }
}

fn strategy<'a>(
    source: DateSource,
    f: impl Fn() -> Result<DateTime<Utc>> + 'a,
) -> Strategy<'a> {
    (source, Box::new(f))
}

fn tag_date(raw: Option<&str>, tag: &str) -> Result<DateTime<Utc>> {
    let raw = raw.ok_or_else(|| anyhow!("no {} tag", tag))?;
    self::exif::parse_exif_datetime(raw)
}
