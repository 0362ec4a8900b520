//! One full sync run.
//!
//! Query (or restore) the song list, assign parts, bring the part folders up to
//! date, then build and upload one library per instrument. Libraries are only
//! uploaded after every instrument has been written.

use anyhow::Result;
use tracing::info;

use crate::assemble::{assemble, dedupe_by_title, merge_setlist, scrape_setlist};
use crate::cache::{load_run_cache, reset_cache, save_json, PdfCache, RunCache};
use crate::classify::Classifier;
use crate::config::Config;
use crate::events::{Observer, SyncEvent};
use crate::materialize::{assigned_files, materialize, prefetch_page_counts, publish};
use crate::models::{Diagnostic, PartFolder, Setlist, Song};
use crate::names::NameNormalizer;
use crate::progress::create_spinner;
use crate::reconcile::{reconcile, snapshot_part_folder};
use crate::report::{missing_setlist_parts, RunReport};
use crate::storage::{get_or_create_folder, DocumentSource, Storage};

#[derive(Clone, Copy, Debug, Default)]
pub struct SyncOptions {
    /// Restore songs and setlists from the run cache when it is usable.
    pub skip_query: bool,
    /// Delete the local cache directory before starting.
    pub no_cache: bool,
    /// Decide and report, but copy, trash and upload nothing.
    pub dry_run: bool,
}

fn record(report: &mut RunReport, observer: &dyn Observer, diagnostics: Vec<Diagnostic>) {
    for diagnostic in &diagnostics {
        observer.on_event(&SyncEvent::Diagnostic(diagnostic));
    }
    report.extend(diagnostics);
}

/// Walk the source tree and fold in every configured setlist document.
fn query_songs(
    config: &Config,
    storage: &dyn Storage,
    docs: &dyn DocumentSource,
    report: &mut RunReport,
    observer: &dyn Observer,
) -> Result<(Vec<Song>, Vec<Setlist>)> {
    let (mut songs, duplicates) = dedupe_by_title(assemble(storage, config, observer)?);
    record(report, observer, duplicates);
    info!("Found {} songs", songs.len());

    let mut setlists = Vec::with_capacity(config.setlists.len());
    for doc in &config.setlists {
        observer.on_event(&SyncEvent::Phase(&format!("Reading setlist {}", doc.name)));
        let setlist_songs = scrape_setlist(storage, docs, &doc.document_id)?;
        let (setlist, diagnostics) = merge_setlist(&mut songs, &doc.name, setlist_songs);
        record(report, observer, diagnostics);
        info!("Setlist {} has {} songs", setlist.name, setlist.song_indices.len());
        setlists.push(setlist);
    }
    Ok((songs, setlists))
}

/// Classify every song and compute preferred names.
fn assign_parts(config: &Config, songs: Vec<Song>, report: &mut RunReport, observer: &dyn Observer) -> Vec<Song> {
    let classifier = Classifier::new(&config.taxonomy);
    let normalizer = NameNormalizer::new(&config.taxonomy);

    songs
        .into_iter()
        .map(|song| {
            let (mut song, diagnostics) = classifier.assign_parts(song, observer);
            report.extend(diagnostics);
            for file in song.files.iter_mut() {
                file.preferred_name = normalizer.preferred_name(&song.name, &file.src_name);
            }
            song
        })
        .collect()
}

/// Look up (or create) every instrument folder and snapshot its contents once.
fn resolve_part_folders(config: &Config, storage: &dyn Storage) -> Result<Vec<PartFolder>> {
    let spinner = create_spinner("Resolving part folders");
    let mut folders = Vec::new();
    for instrument in config.taxonomy.keys() {
        let folder_id = get_or_create_folder(storage, instrument, &config.destination_folder)?;
        folders.push(snapshot_part_folder(storage, instrument, &folder_id)?);
    }
    spinner.finish_and_clear();
    Ok(folders)
}

pub fn run_sync(
    config: &Config,
    storage: &dyn Storage,
    docs: &dyn DocumentSource,
    options: SyncOptions,
    observer: &dyn Observer,
) -> Result<RunReport> {
    let paths = &config.paths;
    if options.no_cache {
        reset_cache(&paths.cache_dir)?;
    }

    let mut report = RunReport {
        dry_run: options.dry_run,
        ..RunReport::default()
    };

    let cached = if options.skip_query {
        load_run_cache(&paths.run_cache())
    } else {
        None
    };
    let cache = match cached {
        Some(cache) => {
            observer.on_event(&SyncEvent::Phase("Loading songs from cache"));
            cache
        }
        None => {
            observer.on_event(&SyncEvent::Phase("Querying source folders"));
            let (songs, setlists) = query_songs(config, storage, docs, &mut report, observer)?;
            RunCache { songs, setlists }
        }
    };
    // Saved before part assignment so taxonomy changes apply on the next --skip-query run
    save_json(&paths.run_cache(), &cache)?;
    let RunCache { songs, setlists } = cache;

    observer.on_event(&SyncEvent::Phase("Assigning parts"));
    let songs = assign_parts(config, songs, &mut report, observer);
    save_json(&paths.parts_dump(), &songs)?;
    let missing = missing_setlist_parts(&songs, &setlists, &config.taxonomy);
    record(&mut report, observer, missing);

    observer.on_event(&SyncEvent::Phase("Resolving part folders"));
    let part_folders = resolve_part_folders(config, storage)?;

    observer.on_event(&SyncEvent::Phase("Syncing part folders"));
    report.stats = reconcile(storage, &songs, &part_folders, options.dry_run, observer)?;

    observer.on_event(&SyncEvent::Phase("Counting pages"));
    let files = assigned_files(&songs);
    let pdf_cache = PdfCache::new(paths.pdf_cache());
    let pages = prefetch_page_counts(storage, &pdf_cache, &files, config.workers)?;

    observer.on_event(&SyncEvent::Phase("Writing libraries"));
    let libraries = materialize(
        &songs,
        &setlists,
        &part_folders,
        &pages,
        &paths.output_dir,
        paths.template_db.as_deref(),
    )?;

    if options.dry_run {
        info!("Dry run: skipping upload of {} libraries", libraries.len());
    } else {
        observer.on_event(&SyncEvent::Phase("Uploading libraries"));
        for library in &libraries {
            publish(storage, library, observer)?;
        }
    }

    report.songs = songs.len();
    report.setlists = setlists.len();
    report.libraries = libraries.into_iter().map(|l| l.instrument).collect();
    report.save(&paths.report())?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_pdf;
    use crate::config::{InstrumentDef, Paths, SetlistDoc, Taxonomy};
    use crate::events::{NullObserver, RecordingObserver};
    use crate::materialize::{LIBRARY_UPLOAD_NAME, SIDECAR_UPLOAD_NAME};
    use crate::models::SyncStats;
    use crate::storage::memory::{Call, MemoryStorage};
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::path::Path;

    struct Fixture {
        storage: MemoryStorage,
        root: String,
        dest: String,
        config: Config,
    }

    fn instrument(key: &str) -> InstrumentDef {
        InstrumentDef {
            key: key.to_string(),
            aliases: vec![key.to_string()],
        }
    }

    /// Categories `A-C` and `D-F` under one root, plus a setlist document linking
    /// "Blue Moon" from outside the tree.
    fn fixture(work: &Path) -> Fixture {
        let storage = MemoryStorage::new();
        let root = storage.add_folder("", "Charts");
        let ac = storage.add_folder(&root, "A-C");
        storage.add_folder(&root, "D-F");
        let dest = storage.add_folder("", "Parts");

        let grace = storage.add_folder(&ac, "Amazing Grace");
        storage.add_file(&grace, "Trumpet - Amazing Grace.pdf", 1_000, test_pdf::with_pages(2));
        storage.add_file(&grace, "Horn in F - Amazing Grace.pdf", 1_000, test_pdf::with_pages(1));

        let blue = storage.add_folder("", "Blue Moon");
        storage.add_file(&blue, "Trombone - Blue Moon.pdf", 1_000, test_pdf::with_pages(3));
        storage.set_links(
            "doc",
            vec![format!("https://drive.google.com/drive/folders/{}", blue)],
        );

        let mut horn = instrument("Horn");
        horn.aliases = vec!["Horn in F".to_string()];
        let config = Config {
            source_roots: vec![root.clone()],
            destination_folder: dest.clone(),
            setlists: vec![SetlistDoc {
                name: "Gig".to_string(),
                document_id: "doc".to_string(),
            }],
            paths: Paths {
                cache_dir: work.join("cache"),
                output_dir: work.join("output"),
                template_db: None,
            },
            taxonomy: Taxonomy {
                instruments: vec![instrument("Trumpet"), horn, instrument("Trombone")],
                backups: BTreeMap::new(),
                solos: BTreeMap::new(),
                exceptions: BTreeMap::new(),
                commonly_absent: Vec::new(),
                default_horn: "Horn".to_string(),
            },
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        Fixture {
            storage,
            root,
            dest,
            config,
        }
    }

    impl Fixture {
        fn run(&self, options: SyncOptions) -> RunReport {
            run_sync(&self.config, &self.storage, &self.storage, options, &NullObserver).unwrap()
        }

        fn part(&self, instrument: &str) -> String {
            self.storage.find_folder(instrument, &self.dest).unwrap().unwrap().id
        }
    }

    #[test]
    fn test_full_run() {
        let work = tempfile::tempdir().unwrap();
        let f = fixture(work.path());
        let observer = RecordingObserver::default();
        let report = run_sync(&f.config, &f.storage, &f.storage, SyncOptions::default(), &observer).unwrap();

        assert_eq!(report.songs, 2);
        assert_eq!(report.setlists, 1);
        assert_eq!(report.stats, SyncStats { created: 3, updated: 0, up_to_date: 0 });
        assert_eq!(report.libraries, vec!["Trumpet", "Horn", "Trombone"]);
        assert!(report.diagnostics.contains(&Diagnostic::MissingSetlistPart {
            setlist: "Gig".to_string(),
            song: "Blue Moon".to_string(),
            instrument: "Trumpet".to_string(),
        }));

        let trumpet = f.part("Trumpet");
        assert_eq!(
            f.storage.live_names(&trumpet),
            vec!["Trumpet - Amazing Grace.pdf", LIBRARY_UPLOAD_NAME, SIDECAR_UPLOAD_NAME]
        );

        let output = &f.config.paths.output_dir;
        let conn = Connection::open(output.join("trumpet.db")).unwrap();
        let song_id: i64 = conn.query_row("SELECT Id FROM Songs", [], |r| r.get(0)).unwrap();
        assert_eq!(song_id, 1);
        let (file_song, path): (i64, String) = conn
            .query_row("SELECT SongId, Path FROM Files", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(file_song, 1);
        assert_eq!(path, format!("{}/Trumpet - Amazing Grace.pdf", trumpet));

        let trombone = Connection::open(output.join("trombone.db")).unwrap();
        let title: String = trombone.query_row("SELECT Title FROM Songs", [], |r| r.get(0)).unwrap();
        assert_eq!(title, "Blue Moon - Trombone");
        let links: i64 = trombone
            .query_row("SELECT COUNT(*) FROM SetlistSong WHERE SetlistId = 1 AND SongId = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 1);

        let paths = &f.config.paths;
        assert!(paths.run_cache().exists());
        assert!(paths.parts_dump().exists());
        assert!(paths.report().exists());
        assert_eq!(observer.kinds().first().map(String::as_str), Some("phase"));
        assert!(observer.count("phase") >= 6);
        assert_eq!(observer.count("uploaded"), 6);
    }

    #[test]
    fn test_second_run_copies_nothing() {
        let work = tempfile::tempdir().unwrap();
        let f = fixture(work.path());
        f.run(SyncOptions::default());
        f.storage.clear_calls();

        let report = f.run(SyncOptions::default());
        assert_eq!(report.stats, SyncStats { created: 0, updated: 0, up_to_date: 3 });
        let calls = f.storage.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Copy { .. } | Call::CreateFolder { .. })));
        // PDFs are served from the local cache
        assert!(!calls.iter().any(|c| matches!(c, Call::Download { .. })));
    }

    #[test]
    fn test_skip_query_uses_cache() {
        let work = tempfile::tempdir().unwrap();
        let f = fixture(work.path());
        f.run(SyncOptions::default());

        let category = f.storage.list_subfolders(&f.root).unwrap()[0].id.clone();
        let late = f.storage.add_folder(&category, "Zulu");
        f.storage.add_file(&late, "Trumpet.pdf", 1_000, test_pdf::with_pages(1));

        let cached = f.run(SyncOptions {
            skip_query: true,
            ..SyncOptions::default()
        });
        assert_eq!(cached.songs, 2);

        let fresh = f.run(SyncOptions::default());
        assert_eq!(fresh.songs, 3);
        assert_eq!(fresh.stats.created, 1);
    }

    #[test]
    fn test_dry_run_leaves_destination_untouched() {
        let work = tempfile::tempdir().unwrap();
        let f = fixture(work.path());
        let report = f.run(SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        });

        assert!(report.dry_run);
        assert_eq!(report.stats.created, 3);
        assert!(f
            .storage
            .calls()
            .iter()
            .all(|c| matches!(c, Call::CreateFolder { .. } | Call::Download { .. })));
        assert!(f.config.paths.output_dir.join("trumpet.db").exists());
    }

    #[test]
    fn test_failed_materialization_uploads_nothing() {
        let work = tempfile::tempdir().unwrap();
        let mut f = fixture(work.path());
        let trumpet = f.storage.add_folder(&f.dest, "Trumpet");
        let old = f.storage.add_file(&trumpet, LIBRARY_UPLOAD_NAME, 1, b"old".to_vec());
        f.config.paths.template_db = Some(work.path().join("missing_template.db"));

        let err = run_sync(&f.config, &f.storage, &f.storage, SyncOptions::default(), &NullObserver).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to copy template"));

        let calls = f.storage.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Upload { .. })));
        assert!(!calls.contains(&Call::Trash { id: old }));
        assert_eq!(f.storage.content_of(&trumpet, LIBRARY_UPLOAD_NAME), Some(b"old".to_vec()));
    }

    #[test]
    fn test_unreadable_chart_uploads_nothing() {
        let work = tempfile::tempdir().unwrap();
        let f = fixture(work.path());
        let category = f.storage.list_subfolders(&f.root).unwrap()[0].id.clone();
        let zulu = f.storage.add_folder(&category, "Zulu");
        f.storage.add_file(&zulu, "Trumpet - Zulu.pdf", 1_000, b"not a pdf".to_vec());

        let err = run_sync(&f.config, &f.storage, &f.storage, SyncOptions::default(), &NullObserver).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse PDF"));
        assert!(!f.storage.calls().iter().any(|c| matches!(c, Call::Upload { .. })));
        assert!(!f.config.paths.output_dir.join("trumpet.db").exists());
    }

    #[test]
    fn test_no_cache_discards_previous_state() {
        let work = tempfile::tempdir().unwrap();
        let f = fixture(work.path());
        let cache_dir = &f.config.paths.cache_dir;
        std::fs::create_dir_all(cache_dir).unwrap();
        std::fs::write(f.config.paths.run_cache(), "{ corrupt").unwrap();
        std::fs::write(cache_dir.join("leftover.txt"), "x").unwrap();

        let report = f.run(SyncOptions {
            no_cache: true,
            skip_query: true,
            ..SyncOptions::default()
        });
        assert_eq!(report.songs, 2);
        assert!(!cache_dir.join("leftover.txt").exists());
    }
}
