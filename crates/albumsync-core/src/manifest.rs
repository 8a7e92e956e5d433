use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaItem;

/// Current manifest file format version
const MANIFEST_VERSION: u32 = 1;

/// Default manifest filename, written to the working directory
pub const MANIFEST_FILENAME: &str = ".albumsync-failed.json";

/// Items left over from a run whose batches failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedManifest {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub album: String,
    pub items: Vec<MediaItem>,
}

impl FailedManifest {
    pub fn new(album: &str, items: Vec<MediaItem>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            album: album.to_string(),
            items,
        }
    }

    /// Load a manifest, or `None` when there is no file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let manifest: FailedManifest = serde_json::from_reader(BufReader::new(file))?;
        if manifest.version != MANIFEST_VERSION {
            anyhow::bail!(
                "Unsupported manifest version {} in {}",
                manifest.version,
                path.display()
            );
        }
        Ok(Some(manifest))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let temp_path = temp_path_for(path);

        // Write to temp file first, then rename for atomicity
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn delete(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
