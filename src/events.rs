//! Structured progress events.
//!
//! Core stages report what they do through an [`Observer`] instead of printing.
//! The binary installs [`TracingObserver`]; tests use [`RecordingObserver`].

use tracing::{debug, info, warn};

use crate::models::Diagnostic;
use crate::reconcile::SyncAction;

#[derive(Debug, Clone, Copy)]
pub enum SyncEvent<'a> {
    Phase(&'a str),
    SongDiscovered { song: &'a str, files: usize },
    FileClassified { song: &'a str, file: &'a str, instruments: &'a [String] },
    SyncDecision { instrument: &'a str, file: &'a str, action: SyncAction },
    Uploaded { instrument: &'a str, name: &'a str },
    Diagnostic(&'a Diagnostic),
}

impl SyncEvent<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Phase(_) => "phase",
            SyncEvent::SongDiscovered { .. } => "song_discovered",
            SyncEvent::FileClassified { .. } => "file_classified",
            SyncEvent::SyncDecision { .. } => "sync_decision",
            SyncEvent::Uploaded { .. } => "uploaded",
            SyncEvent::Diagnostic(_) => "diagnostic",
        }
    }
}

pub trait Observer: Sync {
    fn on_event(&self, event: &SyncEvent<'_>);
}

/// Discards everything.
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: &SyncEvent<'_>) {}
}

/// Forwards events to `tracing`. Per-file chatter goes to debug.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &SyncEvent<'_>) {
        match event {
            SyncEvent::Phase(name) => info!("{}", name),
            SyncEvent::SongDiscovered { song, files } => debug!(song, files, "song discovered"),
            SyncEvent::FileClassified { song, file, instruments } => {
                debug!(song, file, instruments = %instruments.join(", "), "classified")
            }
            SyncEvent::SyncDecision { instrument, file, action } => match action {
                SyncAction::UpToDate => debug!(instrument, file, "up to date"),
                _ => info!(instrument, file, action = ?action, "sync"),
            },
            SyncEvent::Uploaded { instrument, name } => info!(instrument, name, "uploaded"),
            SyncEvent::Diagnostic(diagnostic) => warn!("{}", diagnostic),
        }
    }
}

#[cfg(test)]
pub use recording::RecordingObserver;
