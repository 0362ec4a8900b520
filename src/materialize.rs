//! Per-instrument library databases and hash-index sidecars.
//!
//! Page counts are fetched first on a bounded download pool. Each instrument's
//! database then has exactly one writer; instruments run in parallel with rayon.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use rayon::prelude::*;
use rusqlite::{params, Connection};
use rustc_hash::FxHashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::debug;

use crate::cache::PdfCache;
use crate::events::{Observer, SyncEvent};
use crate::models::{page_order, PageCounts, PartFolder, Setlist, Song, SourceFile};
use crate::names::instrument_slug;
use crate::progress::{create_progress_bar, log_progress};
use crate::schema;
use crate::storage::{upload_replacing, Storage};

/// Well-known names the reader app looks for in each part folder.
pub const LIBRARY_UPLOAD_NAME: &str = "mobilesheets.db";
pub const SIDECAR_UPLOAD_NAME: &str = "mobilesheets_hashcodes.txt";

/// A materialized instrument library on local disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Library {
    pub instrument: String,
    pub folder_id: String,
    pub db_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub songs: usize,
}

// ============================================================================
// Page Counts
// ============================================================================

/// Every file assigned to at least one part, once each, in song order.
pub fn assigned_files(songs: &[Song]) -> Vec<&SourceFile> {
    let mut seen = FxHashSet::default();
    songs
        .iter()
        .flat_map(|song| {
            let mut indices: Vec<usize> = song.parts.values().flatten().copied().collect();
            indices.sort_unstable();
            indices.dedup();
            indices.into_iter().filter_map(move |i| song.files.get(i))
        })
        .filter(|file| seen.insert(file.id.as_str()))
        .collect()
}

/// Count pages for `files` on a pool of `workers` download threads.
///
/// The first failure stops the pool and is returned.
pub fn prefetch_page_counts(
    storage: &dyn Storage,
    cache: &PdfCache,
    files: &[&SourceFile],
    workers: usize,
) -> Result<PageCounts> {
    let workers = workers.max(1);
    let total = files.len() as u64;
    let pb = create_progress_bar(total, "Counting pages");

    let (job_tx, job_rx) = bounded::<&SourceFile>(workers * 2);
    let (out_tx, out_rx) = bounded::<(String, Result<u32>)>(workers * 2);

    let result = thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            scope.spawn(move || {
                while let Ok(file) = job_rx.recv() {
                    let pages = cache.page_count(storage, file);
                    if out_tx.send((file.id.clone(), pages)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(out_tx);

        scope.spawn(move || {
            for file in files {
                if job_tx.send(*file).is_err() {
                    break;
                }
            }
        });

        let mut counts = PageCounts::default();
        let mut failure = None;
        for (done, (id, pages)) in out_rx.iter().enumerate() {
            match pages {
                Ok(pages) => {
                    counts.insert(id, pages);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            pb.inc(1);
            log_progress("pages", done as u64 + 1, total, 100);
        }
        // Unblocks any worker still sending
        drop(out_rx);

        match failure {
            Some(e) => Err(e),
            None => Ok(counts),
        }
    });

    pb.finish_and_clear();
    result
}

// ============================================================================
// Databases
// ============================================================================

/// Remove the regular files in `dir`, creating it when missing.
pub fn clear_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            debug!("Deleted {}", path.display());
        }
    }
    Ok(())
}

/// Fresh library at `path`: a copy of the template, or the bundled schema.
fn create_library(path: &Path, template: Option<&Path>) -> Result<Connection> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove old {}", path.display()))?;
    }
    match template {
        Some(template) => {
            fs::copy(template, path)
                .with_context(|| format!("Failed to copy template {}", template.display()))?;
            Ok(Connection::open(path)?)
        }
        None => {
            let conn = Connection::open(path)?;
            conn.execute_batch(schema::BLANK_LIBRARY)?;
            Ok(conn)
        }
    }
}

/// Write one instrument's rows and sidecar stanzas. Returns the number of songs written.
fn write_instrument(
    conn: &mut Connection,
    sidecar: &mut impl Write,
    folder: &PartFolder,
    songs: &[Song],
    setlists: &[Setlist],
    pages: &PageCounts,
    now_ms: i64,
) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut song_id: i64 = 0;
    {
        for (i, setlist) in setlists.iter().enumerate() {
            tx.execute(schema::INSERT_SETLIST, params![i as i64 + 1, setlist.name, now_ms])?;
        }

        let mut insert_song = tx.prepare_cached(schema::INSERT_SONG)?;
        let mut insert_file = tx.prepare_cached(schema::INSERT_FILE)?;
        let mut insert_autoscroll = tx.prepare_cached(schema::INSERT_AUTOSCROLL)?;
        let mut insert_metronome = tx.prepare_cached(schema::INSERT_METRONOME)?;
        let mut insert_setlist_song = tx.prepare_cached(schema::INSERT_SETLIST_SONG)?;

        for (song_index, song) in songs.iter().enumerate() {
            for file in song.part_files(&folder.instrument) {
                song_id += 1;
                let page_count = pages
                    .get(&file.id)
                    .copied()
                    .with_context(|| format!("No page count for '{}'", file.src_name))?;
                let path = format!("{}/{}", folder.folder_id, file.dest_name);

                insert_song.execute(params![song_id, file.title(), file.created_ms, file.modified_ms])?;
                insert_file.execute(params![
                    song_id,
                    path,
                    page_order(page_count),
                    file.size as i64,
                    file.modified_ms,
                    page_count,
                    file.hash,
                ])?;
                insert_autoscroll.execute(params![song_id])?;
                insert_metronome.execute(params![song_id])?;
                for sql in schema::PER_PAGE_INSERTS {
                    let mut stmt = tx.prepare_cached(sql)?;
                    for page in 0..page_count {
                        stmt.execute(params![song_id, page])?;
                    }
                }

                for (i, setlist) in setlists.iter().enumerate() {
                    if setlist.song_indices.contains(&song_index) {
                        insert_setlist_song.execute(params![i as i64 + 1, song_id])?;
                    }
                }

                write!(sidecar, "{}\n{}\n{}\n{}\n", path, file.hash, file.modified_ms, file.size)?;
            }
        }
    }
    tx.commit()?;
    sidecar.flush()?;
    Ok(song_id as usize)
}

fn materialize_instrument(
    folder: &PartFolder,
    songs: &[Song],
    setlists: &[Setlist],
    pages: &PageCounts,
    output_dir: &Path,
    template: Option<&Path>,
    now_ms: i64,
) -> Result<Library> {
    let slug = instrument_slug(&folder.instrument);
    let db_path = output_dir.join(format!("{}.db", slug));
    let sidecar_path = output_dir.join(format!("{}_hashcodes.txt", slug));

    let mut conn = create_library(&db_path, template)
        .with_context(|| format!("Failed to create library for {}", folder.instrument))?;
    let mut sidecar = BufWriter::new(
        File::create(&sidecar_path).with_context(|| format!("Failed to create {}", sidecar_path.display()))?,
    );
    let count = write_instrument(&mut conn, &mut sidecar, folder, songs, setlists, pages, now_ms)
        .with_context(|| format!("Failed to write library for {}", folder.instrument))?;

    Ok(Library {
        instrument: folder.instrument.clone(),
        folder_id: folder.folder_id.clone(),
        db_path,
        sidecar_path,
        songs: count,
    })
}

/// Build a library for every part folder that has at least one assigned file.
pub fn materialize(
    songs: &[Song],
    setlists: &[Setlist],
    part_folders: &[PartFolder],
    pages: &PageCounts,
    output_dir: &Path,
    template: Option<&Path>,
) -> Result<Vec<Library>> {
    clear_output_dir(output_dir)?;
    let now_ms = chrono::Utc::now().timestamp_millis();

    let used: Vec<&PartFolder> = part_folders
        .iter()
        .filter(|folder| songs.iter().any(|song| song.has_part(&folder.instrument)))
        .collect();

    used.par_iter()
        .map(|folder| materialize_instrument(folder, songs, setlists, pages, output_dir, template, now_ms))
        .collect()
}

/// Upload a library and its sidecar under the well-known names, replacing older copies.
pub fn publish(storage: &dyn Storage, library: &Library, observer: &dyn Observer) -> Result<()> {
    for (local, name) in [
        (&library.db_path, LIBRARY_UPLOAD_NAME),
        (&library.sidecar_path, SIDECAR_UPLOAD_NAME),
    ] {
        upload_replacing(storage, local, &library.folder_id, name)
            .with_context(|| format!("Failed to upload {} for {}", name, library.instrument))?;
        observer.on_event(&SyncEvent::Uploaded {
            instrument: &library.instrument,
            name,
        });
    }
    Ok(())
}
