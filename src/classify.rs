//! Instrument classification.
//!
//! Per file: keyword containment against the taxonomy aliases, a single "horn"
//! fallback, then exact-filename exceptions. Per song: backfill missing
//! instruments from configured backups and attach soloist charts.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Taxonomy;
use crate::events::{Observer, SyncEvent};
use crate::models::{Diagnostic, Song, SourceFile};
use crate::names::{is_pdf, match_key};

// ============================================================================
// Per-file Classification
// ============================================================================

pub struct Classifier<'a> {
    taxonomy: &'a Taxonomy,
    /// (normalized alias, canonical key) across the whole taxonomy
    aliases: Vec<(String, &'a str)>,
}

impl<'a> Classifier<'a> {
    pub fn new(taxonomy: &'a Taxonomy) -> Self {
        let aliases = taxonomy
            .instruments
            .iter()
            .flat_map(|inst| inst.aliases.iter().map(move |alias| (match_key(alias), inst.key.as_str())))
            .filter(|(alias, _)| !alias.is_empty())
            .collect();
        Self { taxonomy, aliases }
    }

    /// Canonical instrument keys for one filename. Non-PDF names yield nothing.
    pub fn classify(&self, file_name: &str) -> BTreeSet<String> {
        if !is_pdf(file_name) {
            return BTreeSet::new();
        }

        let key = match_key(file_name);
        let mut found: BTreeSet<String> = self
            .aliases
            .iter()
            .filter(|(alias, _)| key.contains(alias.as_str()))
            .map(|(_, instrument)| instrument.to_string())
            .collect();

        if found.is_empty() && key.contains("horn") {
            found.insert(self.taxonomy.default_horn.clone());
        }

        // Exceptions are exact and case-sensitive, and only ever add
        for (instrument, names) in &self.taxonomy.exceptions {
            if names.iter().any(|name| name == file_name) {
                found.insert(instrument.clone());
            }
        }

        found
    }

    fn matches_any(name_key: &str, keywords: &[String]) -> bool {
        keywords.iter().map(|k| match_key(k)).any(|k| !k.is_empty() && name_key.contains(&k))
    }

    /// Keywords a backup entry stands for: an instrument's aliases, or the raw keyword itself.
    fn backup_keywords(&self, backup: &str) -> Vec<String> {
        if self.taxonomy.is_instrument(backup) {
            self.taxonomy.aliases(backup).to_vec()
        } else {
            vec![backup.to_string()]
        }
    }

    /// Files to borrow for `missing`, looking only at primary assignments.
    fn backfill(
        &self,
        missing: &str,
        primary: &BTreeMap<String, Vec<usize>>,
        files: &[SourceFile],
    ) -> Option<Vec<usize>> {
        let backups = self.taxonomy.backups.get(missing)?;

        if let Some(adopted) = backups
            .iter()
            .find_map(|backup| primary.get(backup).filter(|files| !files.is_empty()))
        {
            return Some(adopted.clone());
        }

        backups.iter().find_map(|backup| {
            let keywords = self.backup_keywords(backup);
            files
                .iter()
                .position(|f| is_pdf(&f.src_name) && Self::matches_any(&match_key(&f.src_name), &keywords))
                .map(|i| vec![i])
        })
    }

    // ========================================================================
    // Song-level Assignment
    // ========================================================================

    /// Classify every file of `song` and fill its part map.
    ///
    /// Returns the song with `parts` set plus the diagnostics raised: missing parts
    /// for instruments outside the commonly-absent list, and files left in no part.
    pub fn assign_parts(&self, song: Song, observer: &dyn Observer) -> (Song, Vec<Diagnostic>) {
        let mut song = song;
        let mut diagnostics = Vec::new();

        let mut primary: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, file) in song.files.iter().enumerate() {
            for instrument in self.classify(&file.src_name) {
                primary.entry(instrument).or_default().push(i);
            }
        }

        let mut parts = primary.clone();
        for key in self.taxonomy.keys() {
            if primary.get(key).is_some_and(|files| !files.is_empty()) {
                continue;
            }
            match self.backfill(key, &primary, &song.files) {
                Some(files) => {
                    parts.insert(key.to_string(), files);
                }
                None if !self.taxonomy.is_commonly_absent(key) => diagnostics.push(Diagnostic::MissingPart {
                    song: song.name.clone(),
                    instrument: key.to_string(),
                }),
                None => {}
            }
        }

        // Soloist charts supplement whatever the instrument already has
        for (instrument, keywords) in &self.taxonomy.solos {
            for (i, file) in song.files.iter().enumerate() {
                if is_pdf(&file.src_name) && Self::matches_any(&match_key(&file.src_name), keywords) {
                    let list = parts.entry(instrument.clone()).or_default();
                    if !list.contains(&i) {
                        list.push(i);
                        list.sort_unstable();
                    }
                }
            }
        }

        song.parts = parts;

        for (i, file) in song.files.iter().enumerate() {
            let instruments: Vec<String> = song
                .parts
                .iter()
                .filter(|(_, indices)| indices.contains(&i))
                .map(|(key, _)| key.clone())
                .collect();
            if instruments.is_empty() {
                diagnostics.push(Diagnostic::Unclassified {
                    song: song.name.clone(),
                    file: file.src_name.clone(),
                });
            } else {
                observer.on_event(&SyncEvent::FileClassified {
                    song: &song.name,
                    file: &file.src_name,
                    instruments: &instruments,
                });
            }
        }

        for diagnostic in &diagnostics {
            observer.on_event(&SyncEvent::Diagnostic(diagnostic));
        }

        (song, diagnostics)
    }
}
