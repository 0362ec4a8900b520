//! Run configuration loaded once at startup.
//!
//! Everything that used to be a hardcoded table (instrument aliases, backups,
//! soloist keywords, filename exceptions, ignored folders) lives here and is
//! passed by reference into each stage. An empty TOML file yields the defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

// ============================================================================
// Instrument Taxonomy
// ============================================================================

/// One canonical instrument and the filename keywords that identify it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentDef {
    pub key: String,
    pub aliases: Vec<String>,
}

impl InstrumentDef {
    fn new(key: &str, aliases: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Instrument classification tables. Immutable for the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    /// Canonical instruments in declaration order (also the folder creation order).
    pub instruments: Vec<InstrumentDef>,
    /// Missing instrument → fallback instrument keys or raw keywords, tried in order.
    pub backups: BTreeMap<String, Vec<String>>,
    /// Instrument → keywords of soloist charts that are additionally attached.
    pub solos: BTreeMap<String, Vec<String>>,
    /// Instrument → exact source filenames that are forced onto it.
    pub exceptions: BTreeMap<String, Vec<String>>,
    /// Instruments whose absence from a song is not worth a warning.
    pub commonly_absent: Vec<String>,
    /// Instrument assigned to files that mention "horn" but match no alias.
    pub default_horn: String,
}

impl Default for Taxonomy {
    fn default() -> Self {
        let instruments = vec![
            InstrumentDef::new("Score", &["Score"]),
            InstrumentDef::new(
                "Tuba",
                &[
                    "Tuba",
                    "Sousaphone",
                    "Sousa",
                    "Euphonium",
                    "Euph",
                    "Low Brass",
                    "Basses",
                    "Bass (Trebel Clef)",
                    "Bass_Line",
                ],
            ),
            InstrumentDef::new("Horn", &["Horn in F", "F Horn", "Mellophone", "Horns F"]),
            InstrumentDef::new(
                "Percussion",
                &[
                    "Percussion",
                    "Drum",
                    "Snareline",
                    "Perc",
                    "BassDr",
                    "Snare",
                    "Congo",
                    "Toms",
                    "Quads",
                    "Cymbal",
                    "Glockenspiel",
                ],
            ),
            InstrumentDef::new("Clarinet", &["Clarinet"]),
            InstrumentDef::new("Soprano Sax", &["Soprano"]),
            InstrumentDef::new("Tenor Sax", &["Tenor"]),
            InstrumentDef::new("Alto Sax", &["Alto"]),
            InstrumentDef::new("Bass Sax", &["Bass Sax", "Bass Saxophone"]),
            InstrumentDef::new("Bari Sax", &["Bari"]),
            InstrumentDef::new("Trumpet", &["Trumpet", "Flugelhorn", "Trmp", "Trumplet"]),
            InstrumentDef::new("Trombone", &["Trombone", "Tbn", "Trmb", "Bone"]),
            InstrumentDef::new("Eb Horn", &["Eb Horn", "Horn in Eb"]),
            InstrumentDef::new("Flute", &["Flute", "C Woodwind"]),
        ];

        let table = |entries: &[(&str, &[&str])]| -> BTreeMap<String, Vec<String>> {
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect()
        };

        Self {
            instruments,
            backups: table(&[
                ("Soprano Sax", &["Clarinet", "Trumpet"]),
                ("Clarinet", &["Soprano Sax", "Trumpet"]),
                ("Tenor Sax", &["Clarinet", "Trumpet"]),
                ("Bass Sax", &["Bari Sax", "Tuba"]),
                ("Bari Sax", &["Bass Sax", "Eb Horn"]),
                ("Eb Horn", &["Alto Sax", "Eb Part"]),
                ("Alto Sax", &["Eb Horn", "Eb Part"]),
                ("Horn", &["F Part"]),
                ("Flute", &["C Part", "Lead Sheet"]),
            ]),
            solos: table(&[
                ("Trumpet", &["Bb Solo", "Solo Bb", "Solo in Bb"]),
                ("Alto Sax", &["Eb Solo", "Solo Eb", "Solo in Eb"]),
                ("Trombone", &["Bass Clef Solo", "Solo in C"]),
            ]),
            exceptions: BTreeMap::new(),
            commonly_absent: vec!["Flute".to_string(), "Percussion".to_string(), "Score".to_string()],
            default_horn: "Horn".to_string(),
        }
    }
}

impl Taxonomy {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.instruments.iter().map(|i| i.key.as_str())
    }

    pub fn is_instrument(&self, key: &str) -> bool {
        self.instruments.iter().any(|i| i.key == key)
    }

    pub fn aliases(&self, key: &str) -> &[String] {
        self.instruments
            .iter()
            .find(|i| i.key == key)
            .map(|i| i.aliases.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_commonly_absent(&self, key: &str) -> bool {
        self.commonly_absent.iter().any(|k| k == key)
    }

    /// Every keyword the taxonomy knows: aliases, backup keywords and solo keywords.
    pub fn all_keywords(&self) -> impl Iterator<Item = &str> {
        self.instruments
            .iter()
            .flat_map(|i| i.aliases.iter())
            .chain(self.backups.values().flatten())
            .chain(self.solos.values().flatten())
            .map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            bail!("taxonomy defines no instruments");
        }
        let tables = [
            ("backups", &self.backups),
            ("solos", &self.solos),
            ("exceptions", &self.exceptions),
        ];
        for (table, entries) in tables {
            for key in entries.keys() {
                if !self.is_instrument(key) {
                    bail!("taxonomy.{} references unknown instrument '{}'", table, key);
                }
            }
        }
        for key in &self.commonly_absent {
            if !self.is_instrument(key) {
                bail!("taxonomy.commonly_absent references unknown instrument '{}'", key);
            }
        }
        if !self.is_instrument(&self.default_horn) {
            bail!("taxonomy.default_horn '{}' is not an instrument", self.default_horn);
        }
        Ok(())
    }
}

// ============================================================================
// Run Configuration
// ============================================================================

/// A document whose folder links form a setlist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistDoc {
    pub name: String,
    pub document_id: String,
}

/// Local directories used by the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Blank library database copied per instrument. The bundled schema is used when unset.
    pub template_db: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            output_dir: PathBuf::from("output"),
            template_db: None,
        }
    }
}

impl Paths {
    pub fn run_cache(&self) -> PathBuf {
        self.cache_dir.join("cache.json")
    }

    pub fn parts_dump(&self) -> PathBuf {
        self.cache_dir.join("songs_with_parts.json")
    }

    pub fn report(&self) -> PathBuf {
        self.cache_dir.join("report.json")
    }

    pub fn pdf_cache(&self) -> PathBuf {
        self.cache_dir.join("pdf")
    }
}

/// Retry settings for remote calls, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 16_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folders whose category subfolders hold the song folders.
    pub source_roots: Vec<String>,
    /// Folder that receives one subfolder per instrument.
    pub destination_folder: String,
    /// Category folder names that are never scanned.
    pub ignore_folders: Vec<String>,
    /// Cap on category and song folders processed; unbounded when unset.
    pub max_folders: Option<usize>,
    pub setlists: Vec<SetlistDoc>,
    /// Size of the page-count download pool.
    pub workers: usize,
    pub paths: Paths,
    pub retry: RetrySettings,
    pub taxonomy: Taxonomy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_roots: Vec::new(),
            destination_folder: String::new(),
            // The output folder lives under a source root; scanning it would re-ingest our own uploads
            ignore_folders: [
                "1. Member Drafts",
                "2. Seasonal Songs",
                "3. Warm-ups",
                "4. 3rd Rail Drumline",
                "5. Resources",
                "6. Recordings",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_folders: None,
            setlists: Vec::new(),
            workers: 3,
            paths: Paths::default(),
            retry: RetrySettings::default(),
            taxonomy: Taxonomy::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse configuration")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid configuration {}", path.display()))
    }

    pub fn folder_cap(&self) -> usize {
        self.max_folders.unwrap_or(usize::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_roots.is_empty() {
            bail!("source_roots must list at least one folder id");
        }
        if self.destination_folder.trim().is_empty() {
            bail!("destination_folder must be set");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        self.taxonomy.validate()
    }
}
