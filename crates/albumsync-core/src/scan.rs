use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::media::{MediaItem, MimeLookup};

/// Collect media items from `paths`.
///
/// Files are taken as given (as long as they look like media). Directories
/// are walked recursively in name order, skipping hidden entries. The
/// result keeps the order of `paths`.
pub fn scan_paths(paths: &[PathBuf], mime: &dyn MimeLookup) -> anyhow::Result<Vec<MediaItem>> {
    let mut files = Vec::new();
    for path in paths {
        let metadata =
            fs::metadata(path).with_context(|| format!("Cannot read {}", path.display()))?;
        if metadata.is_dir() {
            walk_dir(path, &mut files)?;
        } else {
            files.push(path.clone());
        }
    }

    let mut media = Vec::with_capacity(files.len());
    for file in files {
        if !is_media(&file, mime) {
            tracing::debug!("Skipping non-media file {}", file.display());
            continue;
        }
        let item = MediaItem::from_path(&file, mime)
            .with_context(|| format!("Cannot stat {}", file.display()))?;
        media.push(item);
    }

    tracing::info!("Found {} media files", media.len());
    Ok(media)
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Cannot list {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_dir(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn is_media(path: &Path, mime: &dyn MimeLookup) -> bool {
    mime.lookup(path)
        .is_some_and(|m| m.starts_with("image/") || m.starts_with("video/"))
}
