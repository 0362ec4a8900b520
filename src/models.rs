//! Core data models for the chart sync pipeline.
//!
//! This module contains the records that flow between stages: source files,
//! songs with their part assignments, setlists, destination snapshots,
//! sync counters and the non-fatal diagnostics collected during a run.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::names::{dest_name_for, java_string_hashcode};

// ============================================================================
// Type Aliases
// ============================================================================

/// Canonical instrument key, e.g. "Trumpet" or "Alto Sax".
pub type InstrumentKey = String;

/// Page counts keyed by source file id. Filled only for files that get materialized.
pub type PageCounts = FxHashMap<String, u32>;

// ============================================================================
// Remote Listings
// ============================================================================

/// Folder entry as returned by the storage layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// File entry as returned by the storage layer, timestamps already in epoch ms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub created_ms: i64,
    pub modified_ms: i64,
}

// ============================================================================
// Source Records
// ============================================================================

/// A sheet-music file discovered in a song folder.
///
/// `dest_name` is always safe to use as a single path component and is what the
/// destination folder is keyed by. `preferred_name` is the display title and stays
/// empty until the name normalizer has run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: String,
    pub src_name: String,
    pub dest_name: String,
    #[serde(default)]
    pub preferred_name: String,
    pub size: u64,
    pub created_ms: i64,
    pub modified_ms: i64,
    /// Java-style string hash of `dest_name`, used by the reader app for change detection.
    pub hash: i32,
}

impl SourceFile {
    pub fn from_remote(remote: RemoteFile) -> Self {
        let dest_name = dest_name_for(&remote.name);
        let hash = java_string_hashcode(&dest_name);
        Self {
            id: remote.id,
            src_name: remote.name,
            dest_name,
            preferred_name: String::new(),
            size: remote.size,
            created_ms: remote.created_ms,
            modified_ms: remote.modified_ms,
            hash,
        }
    }

    /// Display title, falling back to the source name minus extension when the
    /// normalizer has not run yet.
    pub fn title(&self) -> &str {
        if self.preferred_name.is_empty() {
            crate::names::strip_extension(&self.src_name)
        } else {
            &self.preferred_name
        }
    }
}

/// Page range string stored in the Files table, e.g. "1-4".
pub fn page_order(page_count: u32) -> String {
    format!("1-{}", page_count)
}

/// A song folder: its title, raw files, and which files belong to which part.
///
/// `parts` holds indices into `files`; one file may sit under several keys
/// (a "Horn/Mellophone" chart, a full score) and every part list is in file order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub folder_id: String,
    pub name: String,
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub parts: BTreeMap<InstrumentKey, Vec<usize>>,
}

impl Song {
    pub fn new(folder_id: impl Into<String>, name: impl Into<String>, files: Vec<SourceFile>) -> Self {
        Self {
            folder_id: folder_id.into(),
            name: name.into(),
            files,
            parts: BTreeMap::new(),
        }
    }

    /// Files assigned to `instrument`, in file order.
    pub fn part_files<'a>(&'a self, instrument: &str) -> impl Iterator<Item = &'a SourceFile> + 'a {
        self.parts
            .get(instrument)
            .into_iter()
            .flat_map(move |indices| indices.iter().filter_map(move |&i| self.files.get(i)))
    }

    pub fn has_part(&self, instrument: &str) -> bool {
        self.parts.get(instrument).is_some_and(|files| !files.is_empty())
    }

    /// Files that ended up in no part list.
    pub fn partless_files(&self) -> Vec<&SourceFile> {
        self.files
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.parts.values().any(|indices| indices.contains(i)))
            .map(|(_, f)| f)
            .collect()
    }
}

/// A named list of indices into the final canonical song list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setlist {
    pub name: String,
    pub song_indices: Vec<usize>,
}

// ============================================================================
// Destination Snapshot
// ============================================================================

/// A live file already present in a destination part folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestFile {
    pub id: String,
    pub name: String,
    pub modified_ms: i64,
}

impl From<RemoteFile> for DestFile {
    fn from(remote: RemoteFile) -> Self {
        Self {
            id: remote.id,
            name: remote.name,
            modified_ms: remote.modified_ms,
        }
    }
}

/// Destination folder for one instrument plus the listing taken at the start of the run.
///
/// The listing is never refreshed during a run, so every decision is made against
/// the same snapshot.
#[derive(Clone, Debug)]
pub struct PartFolder {
    pub instrument: InstrumentKey,
    pub folder_id: String,
    pub existing: Vec<DestFile>,
}

impl PartFolder {
    pub fn find(&self, dest_name: &str) -> Option<&DestFile> {
        self.existing.iter().find(|f| f.name == dest_name)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate counters for one reconciliation pass.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub up_to_date: usize,
}

impl SyncStats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.up_to_date
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Non-fatal conditions collected during a run and reported at the end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A file matched no instrument and was not picked up by backfill.
    Unclassified { song: String, file: String },
    /// A song has no file for an instrument that is expected to be present.
    MissingPart { song: String, instrument: String },
    /// A setlist song has no file for an expected instrument.
    MissingSetlistPart {
        setlist: String,
        song: String,
        instrument: String,
    },
    /// A later song folder shared a title with an earlier one and was dropped.
    DuplicateTitle {
        name: String,
        kept_folder: String,
        dropped_folder: String,
    },
    /// A setlist song matched no title exactly but one is suspiciously close.
    NearTitle { setlist_title: String, canonical_title: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Unclassified { song, file } => {
                write!(f, "no instrument found for '{}' in '{}'", file, song)
            }
            Diagnostic::MissingPart { song, instrument } => {
                write!(f, "'{}' has no {} part", song, instrument)
            }
            Diagnostic::MissingSetlistPart {
                setlist,
                song,
                instrument,
            } => write!(f, "[{}] '{}' has no {} part", setlist, song, instrument),
            Diagnostic::DuplicateTitle {
                name,
                kept_folder,
                dropped_folder,
            } => write!(
                f,
                "duplicate title '{}': kept folder {}, dropped folder {}",
                name, kept_folder, dropped_folder
            ),
            Diagnostic::NearTitle {
                setlist_title,
                canonical_title,
            } => write!(
                f,
                "setlist song '{}' was added as new but looks like '{}'",
                setlist_title, canonical_title
            ),
        }
    }
}
