//! End-of-run report.
//!
//! Everything non-fatal lands here instead of interrupting the run; the report
//! is printed once at the end and saved next to the run cache.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::cache::save_json;
use crate::config::Taxonomy;
use crate::models::{Diagnostic, Setlist, Song, SyncStats};
use crate::progress::format_duration;

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub songs: usize,
    pub setlists: usize,
    pub stats: SyncStats,
    /// Instruments whose library was written (and uploaded unless dry-running).
    pub libraries: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.diagnostics.iter().filter(|d| pred(d)).count()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    pub fn print_summary(&self, elapsed: Duration) {
        println!("\n{:=<60}", "");
        if self.dry_run {
            println!("Sync complete (dry run)");
        } else {
            println!("Sync complete!");
        }
        println!("  Songs: {}", self.songs);
        println!("  Setlists: {}", self.setlists);
        println!("  New: {}", self.stats.created);
        println!("  Updated: {}", self.stats.updated);
        println!("  Up to date: {}", self.stats.up_to_date);
        println!("  Libraries: {}", self.libraries.join(", "));
        println!(
            "  Unclassified files: {}",
            self.count(|d| matches!(d, Diagnostic::Unclassified { .. }))
        );
        println!(
            "  Missing setlist parts: {}",
            self.count(|d| matches!(d, Diagnostic::MissingSetlistPart { .. }))
        );
        println!(
            "  Other warnings: {}",
            self.count(|d| !matches!(d, Diagnostic::Unclassified { .. } | Diagnostic::MissingSetlistPart { .. }))
        );
        println!("  Elapsed: {}", format_duration(elapsed));
        println!("{:=<60}", "");

        let listed: Vec<&Diagnostic> = self
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::Unclassified { .. } | Diagnostic::MissingSetlistPart { .. }))
            .collect();
        if !listed.is_empty() {
            println!("\nNeeds attention:");
            for diagnostic in listed {
                println!("  {}", diagnostic);
            }
        }
    }
}

/// Setlist songs lacking a file for an instrument outside the commonly-absent list.
pub fn missing_setlist_parts(songs: &[Song], setlists: &[Setlist], taxonomy: &Taxonomy) -> Vec<Diagnostic> {
    let mut missing = Vec::new();
    for setlist in setlists {
        for song in setlist.song_indices.iter().filter_map(|&i| songs.get(i)) {
            for instrument in taxonomy.keys().filter(|k| !taxonomy.is_commonly_absent(k)) {
                if !song.has_part(instrument) {
                    missing.push(Diagnostic::MissingSetlistPart {
                        setlist: setlist.name.clone(),
                        song: song.name.clone(),
                        instrument: instrument.to_string(),
                    });
                }
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_setlist_parts() {
        let taxonomy = Taxonomy::default();
        let mut full = Song::new("f1", "Full", Vec::new());
        for key in taxonomy.keys() {
            full.parts.insert(key.to_string(), vec![0]);
        }
        let mut sparse = Song::new("f2", "Sparse", Vec::new());
        for key in taxonomy.keys().filter(|k| *k != "Tuba") {
            sparse.parts.insert(key.to_string(), vec![0]);
        }
        sparse.parts.remove("Flute");
        let outside = Song::new("f3", "Not In Setlist", Vec::new());

        let songs = vec![full, sparse, outside];
        let setlists = vec![Setlist {
            name: "Gig".to_string(),
            song_indices: vec![0, 1],
        }];

        let missing = missing_setlist_parts(&songs, &setlists, &taxonomy);
        assert_eq!(
            missing,
            vec![Diagnostic::MissingSetlistPart {
                setlist: "Gig".to_string(),
                song: "Sparse".to_string(),
                instrument: "Tuba".to_string(),
            }]
        );
    }

    #[test]
    fn test_report_serializes_diagnostic_kinds() {
        let mut report = RunReport {
            songs: 2,
            ..RunReport::default()
        };
        report.extend(vec![Diagnostic::Unclassified {
            song: "Tune".to_string(),
            file: "Notes.pdf".to_string(),
        }]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["songs"], 2);
        assert_eq!(value["diagnostics"][0]["kind"], "unclassified");
        assert_eq!(value["diagnostics"][0]["file"], "Notes.pdf");
    }
}
