//! Local persisted state: the run cache, the parts dump and the PDF cache used
//! for page counting.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::{Setlist, Song, SourceFile};
use crate::names::cache_name_for;
use crate::storage::{partial_path, Storage};

/// Point-in-time result of the tree query, used to skip re-querying.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCache {
    pub songs: Vec<Song>,
    pub setlists: Vec<Setlist>,
}

/// Write `value` as pretty JSON, creating parent directories.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Load the run cache. Missing or malformed files count as no cache.
pub fn load_run_cache(path: &Path) -> Option<RunCache> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Ignoring unreadable cache {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("Ignoring malformed cache {}: {}", path.display(), e);
            None
        }
    }
}

/// Remove the whole cache directory, if present.
pub fn reset_cache(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(e).with_context(|| format!("Failed to remove cache {}", dir.display()))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// PDF Cache
// ============================================================================

/// True when `local_dir/filename` is absent or older than the remote copy.
pub fn needs_download(local_dir: &Path, filename: &str, remote_modified_ms: i64) -> Result<bool> {
    let path = local_dir.join(filename);
    let metadata = match fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };
    let modified = metadata
        .modified()
        .with_context(|| format!("No modification time for {}", path.display()))?;
    let local_ms = DateTime::<Utc>::from(modified).timestamp_millis();
    Ok(remote_modified_ms > local_ms)
}

/// Number of pages in a local PDF.
pub fn page_count(path: &Path) -> Result<u32> {
    let document =
        lopdf::Document::load(path).with_context(|| format!("Failed to parse PDF {}", path.display()))?;
    Ok(document.get_pages().len() as u32)
}

/// Downloaded PDFs, one subdirectory per source file id holding the sanitized
/// filename. Same-named charts from different songs never share a path.
#[derive(Clone, Debug)]
pub struct PdfCache {
    dir: PathBuf,
}

impl PdfCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn dir_for(&self, file: &SourceFile) -> PathBuf {
        self.dir.join(cache_name_for(&file.id))
    }

    pub fn path_for(&self, file: &SourceFile) -> PathBuf {
        self.dir_for(file).join(cache_name_for(&file.dest_name))
    }

    /// Local path of `file`, downloading it first when the cached copy is stale.
    ///
    /// A partial download older than the remote revision is discarded; a newer
    /// one is left for the storage layer to resume.
    pub fn ensure_local(&self, storage: &dyn Storage, file: &SourceFile) -> Result<PathBuf> {
        let dir = self.dir_for(file);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let name = cache_name_for(&file.dest_name);
        let path = dir.join(&name);
        if needs_download(&dir, &name, file.modified_ms)? {
            let partial = partial_path(&path);
            if partial.exists() && needs_download(&dir, &partial_name(&partial), file.modified_ms)? {
                fs::remove_file(&partial).with_context(|| format!("Failed to remove {}", partial.display()))?;
            }
            debug!(file = %file.src_name, "downloading");
            storage
                .download_file(&file.id, &path)
                .with_context(|| format!("Failed to download '{}'", file.src_name))?;
        }
        Ok(path)
    }

    pub fn page_count(&self, storage: &dyn Storage, file: &SourceFile) -> Result<u32> {
        let path = self.ensure_local(storage, file)?;
        page_count(&path)
    }
}

fn partial_name(partial: &Path) -> String {
    partial
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
