//! Destination reconciliation.
//!
//! Each (song, part, file) is compared by name and modification time against
//! the snapshot of its part folder taken once at the start of the run.
//! Replaced files are trashed, never deleted.

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;

use crate::events::{Observer, SyncEvent};
use crate::models::{DestFile, PartFolder, Song, SourceFile, SyncStats};
use crate::progress::{create_progress_bar, log_progress};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing of that name in the destination yet.
    Create,
    /// Source is strictly newer than the destination copy.
    Replace,
    UpToDate,
}

/// Pure decision for one file against one part folder snapshot.
pub fn decide(file: &SourceFile, folder: &PartFolder) -> SyncAction {
    match folder.find(&file.dest_name) {
        None => SyncAction::Create,
        Some(existing) if file.modified_ms > existing.modified_ms => SyncAction::Replace,
        Some(_) => SyncAction::UpToDate,
    }
}

/// Fetch the live listing of a part folder.
pub fn snapshot_part_folder(storage: &dyn Storage, instrument: &str, folder_id: &str) -> Result<PartFolder> {
    let existing = storage
        .list_files(folder_id, None)
        .with_context(|| format!("Failed to list destination folder for {}", instrument))?
        .into_iter()
        .map(DestFile::from)
        .collect();
    Ok(PartFolder {
        instrument: instrument.to_string(),
        folder_id: folder_id.to_string(),
        existing,
    })
}

/// Bring every part folder up to date with the song list.
///
/// With `dry_run` the decisions are counted and reported but no copy or trash
/// call is issued.
pub fn reconcile(
    storage: &dyn Storage,
    songs: &[Song],
    part_folders: &[PartFolder],
    dry_run: bool,
    observer: &dyn Observer,
) -> Result<SyncStats> {
    let mut stats = SyncStats::default();
    let total = songs.len() as u64;
    let pb = create_progress_bar(total, "Syncing part folders");

    for (i, song) in songs.iter().enumerate() {
        for folder in part_folders.iter().filter(|f| song.has_part(&f.instrument)) {
            for file in song.part_files(&folder.instrument) {
                let action = decide(file, folder);
                observer.on_event(&SyncEvent::SyncDecision {
                    instrument: &folder.instrument,
                    file: &file.dest_name,
                    action,
                });

                match action {
                    SyncAction::Create => stats.created += 1,
                    SyncAction::Replace => stats.updated += 1,
                    SyncAction::UpToDate => {
                        stats.up_to_date += 1;
                        continue;
                    }
                }
                if dry_run {
                    continue;
                }

                if action == SyncAction::Replace {
                    if let Some(existing) = folder.find(&file.dest_name) {
                        storage
                            .trash_file(&existing.id)
                            .with_context(|| format!("Failed to trash stale {}", existing.name))?;
                    }
                }
                storage
                    .copy_file(&file.id, &folder.folder_id, &file.dest_name)
                    .with_context(|| format!("Failed to copy '{}' into {}", file.src_name, folder.instrument))?;
            }
        }
        pb.inc(1);
        log_progress("sync", i as u64 + 1, total, 50);
    }
    pb.finish_and_clear();

    Ok(stats)
}

/// Trash every live file in `folder_id` whose name was already seen earlier in
/// the listing. Returns how many were trashed.
pub fn dedupe_folder(storage: &dyn Storage, folder_id: &str, dry_run: bool) -> Result<usize> {
    let files = storage
        .list_files(folder_id, None)
        .with_context(|| format!("Failed to list folder {}", folder_id))?;

    let mut seen = FxHashSet::default();
    let mut trashed = 0;
    for file in &files {
        if seen.insert(file.name.as_str()) {
            continue;
        }
        tracing::info!(name = %file.name, id = %file.id, "duplicate");
        if !dry_run {
            storage
                .trash_file(&file.id)
                .with_context(|| format!("Failed to trash duplicate {}", file.name))?;
        }
        trashed += 1;
    }
    Ok(trashed)
}
