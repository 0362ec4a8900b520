//! Song-tree assembly and setlist merging.
//!
//! Source layout is `root / category / song / *.pdf`. Categories on the ignore
//! list are skipped, everything else is flattened into one name-sorted song list.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::Config;
use crate::events::{Observer, SyncEvent};
use crate::models::{Diagnostic, RemoteFolder, Setlist, Song, SourceFile};
use crate::progress::{create_progress_bar, log_progress};
use crate::storage::{DocumentSource, Storage, PDF_MIME};

/// Titles at least this similar (Jaro-Winkler, lowercased) raise a near-title warning.
pub const NEAR_TITLE_THRESHOLD: f64 = 0.92;

static FOLDER_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://drive\.google\.com/drive/.*folders/").unwrap());

static FOLDER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/folders/([a-zA-Z0-9_-]+)").unwrap());

/// Folder id from a shared-folder URL; `None` for any other link.
pub fn folder_id_from_url(url: &str) -> Option<&str> {
    if !FOLDER_LINK.is_match(url) {
        return None;
    }
    FOLDER_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn by_name(a: &RemoteFolder, b: &RemoteFolder) -> std::cmp::Ordering {
    a.name.cmp(&b.name)
}

/// Build the song record for one folder. Folders without PDFs yield `None`.
pub fn fetch_song(storage: &dyn Storage, folder: &RemoteFolder) -> Result<Option<Song>> {
    let mut remote = storage
        .list_files(&folder.id, Some(PDF_MIME))
        .with_context(|| format!("Failed to list files of '{}'", folder.name))?;
    if remote.is_empty() {
        return Ok(None);
    }
    remote.sort_by(|a, b| a.name.cmp(&b.name));
    let files = remote.into_iter().map(SourceFile::from_remote).collect();
    Ok(Some(Song::new(folder.id.clone(), folder.name.clone(), files)))
}

// ============================================================================
// Tree Walk
// ============================================================================

/// Walk every configured root and return the songs in name order.
pub fn assemble(storage: &dyn Storage, config: &Config, observer: &dyn Observer) -> Result<Vec<Song>> {
    let cap = config.folder_cap();
    let ignored: FxHashSet<&str> = config.ignore_folders.iter().map(String::as_str).collect();

    let mut categories = Vec::new();
    for root in &config.source_roots {
        let folders = storage
            .list_subfolders(root)
            .with_context(|| format!("Failed to list source root {}", root))?;
        categories.extend(folders.into_iter().filter(|f| !ignored.contains(f.name.as_str())));
    }
    categories.sort_by(by_name);
    categories.truncate(cap);

    let mut song_folders = Vec::new();
    for category in &categories {
        let folders = storage
            .list_subfolders(&category.id)
            .with_context(|| format!("Failed to list category '{}'", category.name))?;
        song_folders.extend(folders);
    }
    song_folders.sort_by(by_name);
    song_folders.truncate(cap);

    let total = song_folders.len() as u64;
    let pb = create_progress_bar(total, "Reading song folders");
    let mut songs = Vec::with_capacity(song_folders.len());
    for (i, folder) in song_folders.iter().enumerate() {
        if let Some(song) = fetch_song(storage, folder)? {
            observer.on_event(&SyncEvent::SongDiscovered {
                song: &song.name,
                files: song.files.len(),
            });
            songs.push(song);
        }
        pb.inc(1);
        log_progress("assemble", i as u64 + 1, total, 50);
    }
    pb.finish_and_clear();

    Ok(songs)
}

/// Keep the first song for every title. Later namesakes are dropped and reported.
pub fn dedupe_by_title(songs: Vec<Song>) -> (Vec<Song>, Vec<Diagnostic>) {
    let mut seen: FxHashMap<String, String> = FxHashMap::default();
    let mut kept = Vec::with_capacity(songs.len());
    let mut diagnostics = Vec::new();

    for song in songs {
        match seen.get(&song.name) {
            Some(kept_folder) => diagnostics.push(Diagnostic::DuplicateTitle {
                name: song.name.clone(),
                kept_folder: kept_folder.clone(),
                dropped_folder: song.folder_id.clone(),
            }),
            None => {
                seen.insert(song.name.clone(), song.folder_id.clone());
                kept.push(song);
            }
        }
    }

    (kept, diagnostics)
}

// ============================================================================
// Setlists
// ============================================================================

/// Songs for every folder linked from a setlist document, sorted by name.
pub fn scrape_setlist(
    storage: &dyn Storage,
    docs: &dyn DocumentSource,
    document_id: &str,
) -> Result<Vec<Song>> {
    let links = docs
        .extract_links(document_id)
        .with_context(|| format!("Failed to read setlist document {}", document_id))?;

    let mut seen = FxHashSet::default();
    let mut songs = Vec::new();
    for folder_id in links.iter().filter_map(|link| folder_id_from_url(link)) {
        if !seen.insert(folder_id) {
            continue;
        }
        let name = storage
            .folder_name(folder_id)
            .with_context(|| format!("Failed to resolve setlist folder {}", folder_id))?;
        let folder = RemoteFolder {
            id: folder_id.to_string(),
            name,
        };
        if let Some(song) = fetch_song(storage, &folder)? {
            songs.push(song);
        }
    }
    songs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(songs)
}

fn near_title<'a>(songs: &'a [Song], title: &str) -> Option<&'a str> {
    let wanted = title.to_lowercase();
    songs
        .iter()
        .map(|s| (s.name.as_str(), strsim::jaro_winkler(&wanted, &s.name.to_lowercase())))
        .filter(|(_, score)| *score >= NEAR_TITLE_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
}

/// Merge setlist songs into the canonical list.
///
/// An exact title match replaces the canonical record in place and keeps its
/// position; anything else is appended. The returned setlist holds those positions.
pub fn merge_setlist(songs: &mut Vec<Song>, name: &str, setlist_songs: Vec<Song>) -> (Setlist, Vec<Diagnostic>) {
    let mut indices = Vec::with_capacity(setlist_songs.len());
    let mut diagnostics = Vec::new();

    for song in setlist_songs {
        let index = match songs.iter().position(|s| s.name == song.name) {
            Some(i) => {
                songs[i] = song;
                i
            }
            None => {
                if let Some(close) = near_title(songs, &song.name) {
                    diagnostics.push(Diagnostic::NearTitle {
                        setlist_title: song.name.clone(),
                        canonical_title: close.to_string(),
                    });
                }
                songs.push(song);
                songs.len() - 1
            }
        };
        if !indices.contains(&index) {
            indices.push(index);
        }
    }

    (
        Setlist {
            name: name.to_string(),
            song_indices: indices,
        },
        diagnostics,
    )
}
