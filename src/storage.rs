//! Contracts the pipeline needs from the cloud storage and document services.
//!
//! The pipeline only ever talks to these traits; `drive` provides the REST
//! implementation and the in-memory implementation below backs the tests.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{RemoteFile, RemoteFolder};

pub const PDF_MIME: &str = "application/pdf";
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    /// Server-side fault; worth retrying.
    #[error("transient server error ({status}): {message}")]
    Transient { status: u16, message: String },
    /// Any other API-level rejection; never retried.
    #[error("request rejected ({status}): {message}")]
    Permanent { status: u16, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// The connection dropped while a body was being read.
    #[error("connection interrupted: {0}")]
    Interrupted(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classify an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            500 | 502 | 503 | 504 => StorageError::Transient { status, message },
            404 => StorageError::NotFound(message),
            _ => StorageError::Permanent { status, message },
        }
    }

    /// Default retry predicate: server faults and transport timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transient { .. } | StorageError::Interrupted(_) => true,
            StorageError::Transport(message) => {
                let lowered = message.to_ascii_lowercase();
                lowered.contains("timed out") || lowered.contains("timeout")
            }
            _ => false,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Cloud file storage. Listings are complete (pagination is the implementation's job)
/// and never include trashed entries.
pub trait Storage: Sync {
    fn list_subfolders(&self, folder_id: &str) -> StorageResult<Vec<RemoteFolder>>;

    /// Files directly inside `folder_id`, optionally restricted to one MIME type.
    fn list_files(&self, folder_id: &str, mime_filter: Option<&str>) -> StorageResult<Vec<RemoteFile>>;

    fn folder_name(&self, folder_id: &str) -> StorageResult<String>;

    fn find_folder(&self, name: &str, parent_id: &str) -> StorageResult<Option<RemoteFolder>>;

    fn create_folder(&self, name: &str, parent_id: &str) -> StorageResult<String>;

    fn copy_file(&self, source_id: &str, dest_folder_id: &str, new_name: &str) -> StorageResult<String>;

    /// Soft delete. Hard deletes are never issued.
    fn trash_file(&self, file_id: &str) -> StorageResult<()>;

    /// Create a new file from local bytes. See [`upload_replacing`] for overwrite semantics.
    fn upload_file(&self, local_path: &Path, dest_folder_id: &str, name: &str) -> StorageResult<String>;

    /// Stream a file's content to `local_path`, staging it in [`partial_path`]
    /// until complete.
    fn download_file(&self, file_id: &str, local_path: &Path) -> StorageResult<()>;
}

/// Source of setlist documents.
pub trait DocumentSource {
    /// Every hyperlink in the document, in document order.
    fn extract_links(&self, document_id: &str) -> StorageResult<Vec<String>>;
}

// ============================================================================
// Helpers
// ============================================================================

/// Id of the folder `name` under `parent_id`, creating it when missing.
pub fn get_or_create_folder<S: Storage + ?Sized>(storage: &S, name: &str, parent_id: &str) -> StorageResult<String> {
    match storage.find_folder(name, parent_id)? {
        Some(folder) => Ok(folder.id),
        None => storage.create_folder(name, parent_id),
    }
}

/// Staging file for an in-progress download of `local_path`.
pub fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    local_path.with_file_name(name)
}

/// Upload with overwrite semantics: trash every live file called `name` first.
pub fn upload_replacing<S: Storage + ?Sized>(
    storage: &S,
    local_path: &Path,
    dest_folder_id: &str,
    name: &str,
) -> StorageResult<String> {
    for existing in storage.list_files(dest_folder_id, None)? {
        if existing.name == name {
            storage.trash_file(&existing.id)?;
        }
    }
    storage.upload_file(local_path, dest_folder_id, name)
}

// ============================================================================
// In-memory Storage (tests)
// ============================================================================

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Call {
        CreateFolder { parent: String, name: String },
        Copy { source: String, folder: String, name: String },
        Trash { id: String },
        Upload { folder: String, name: String },
        Download { id: String },
    }

    #[derive(Clone, Debug)]
    struct Node {
        name: String,
        parent: String,
        is_folder: bool,
        created_ms: i64,
        modified_ms: i64,
        content: Vec<u8>,
        trashed: bool,
    }

    #[derive(Default)]
    struct State {
        nodes: BTreeMap<String, Node>,
        links: BTreeMap<String, Vec<String>>,
        calls: Vec<Call>,
        next_id: usize,
    }

    impl State {
        fn insert(&mut self, node: Node) -> String {
            self.next_id += 1;
            let id = format!("id{:04}", self.next_id);
            self.nodes.insert(id.clone(), node);
            id
        }
    }

    /// Drive-like tree kept in memory. Ids are handed out in creation order.
    #[derive(Default)]
    pub struct MemoryStorage {
        state: Mutex<State>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_folder(&self, parent: &str, name: &str) -> String {
            self.state.lock().unwrap().insert(Node {
                name: name.to_string(),
                parent: parent.to_string(),
                is_folder: true,
                created_ms: 0,
                modified_ms: 0,
                content: Vec::new(),
                trashed: false,
            })
        }

        pub fn add_file(&self, parent: &str, name: &str, modified_ms: i64, content: Vec<u8>) -> String {
            self.state.lock().unwrap().insert(Node {
                name: name.to_string(),
                parent: parent.to_string(),
                is_folder: false,
                created_ms: modified_ms,
                modified_ms,
                content,
                trashed: false,
            })
        }

        pub fn set_modified(&self, id: &str, modified_ms: i64) {
            if let Some(node) = self.state.lock().unwrap().nodes.get_mut(id) {
                node.modified_ms = modified_ms;
            }
        }

        pub fn set_links(&self, document_id: &str, links: Vec<String>) {
            self.state.lock().unwrap().links.insert(document_id.to_string(), links);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn clear_calls(&self) {
            self.state.lock().unwrap().calls.clear();
        }

        /// Names of live files in `folder`, in id order.
        pub fn live_names(&self, folder: &str) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .values()
                .filter(|n| n.parent == folder && !n.is_folder && !n.trashed)
                .map(|n| n.name.clone())
                .collect()
        }

        pub fn content_of(&self, folder: &str, name: &str) -> Option<Vec<u8>> {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .values()
                .find(|n| n.parent == folder && n.name == name && !n.trashed)
                .map(|n| n.content.clone())
        }
    }

    fn mime_of(name: &str) -> &'static str {
        if name.to_ascii_lowercase().ends_with(".pdf") { PDF_MIME } else { "application/octet-stream" }
    }

    impl Storage for MemoryStorage {
        fn list_subfolders(&self, folder_id: &str) -> StorageResult<Vec<RemoteFolder>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .nodes
                .iter()
                .filter(|(_, n)| n.parent == folder_id && n.is_folder && !n.trashed)
                .map(|(id, n)| RemoteFolder {
                    id: id.clone(),
                    name: n.name.clone(),
                })
                .collect())
        }

        fn list_files(&self, folder_id: &str, mime_filter: Option<&str>) -> StorageResult<Vec<RemoteFile>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .nodes
                .iter()
                .filter(|(_, n)| n.parent == folder_id && !n.is_folder && !n.trashed)
                .filter(|(_, n)| mime_filter.map_or(true, |m| mime_of(&n.name) == m))
                .map(|(id, n)| RemoteFile {
                    id: id.clone(),
                    name: n.name.clone(),
                    size: n.content.len() as u64,
                    created_ms: n.created_ms,
                    modified_ms: n.modified_ms,
                })
                .collect())
        }

        fn folder_name(&self, folder_id: &str) -> StorageResult<String> {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .get(folder_id)
                .filter(|n| n.is_folder)
                .map(|n| n.name.clone())
                .ok_or_else(|| StorageError::NotFound(folder_id.to_string()))
        }

        fn find_folder(&self, name: &str, parent_id: &str) -> StorageResult<Option<RemoteFolder>> {
            Ok(self.list_subfolders(parent_id)?.into_iter().find(|f| f.name == name))
        }

        fn create_folder(&self, name: &str, parent_id: &str) -> StorageResult<String> {
            let id = self.add_folder(parent_id, name);
            self.state.lock().unwrap().calls.push(Call::CreateFolder {
                parent: parent_id.to_string(),
                name: name.to_string(),
            });
            Ok(id)
        }

        fn copy_file(&self, source_id: &str, dest_folder_id: &str, new_name: &str) -> StorageResult<String> {
            let mut state = self.state.lock().unwrap();
            let source = state
                .nodes
                .get(source_id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(source_id.to_string()))?;
            state.calls.push(Call::Copy {
                source: source_id.to_string(),
                folder: dest_folder_id.to_string(),
                name: new_name.to_string(),
            });
            Ok(state.insert(Node {
                name: new_name.to_string(),
                parent: dest_folder_id.to_string(),
                ..source
            }))
        }

        fn trash_file(&self, file_id: &str) -> StorageResult<()> {
            let mut state = self.state.lock().unwrap();
            let node = state
                .nodes
                .get_mut(file_id)
                .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;
            node.trashed = true;
            state.calls.push(Call::Trash { id: file_id.to_string() });
            Ok(())
        }

        fn upload_file(&self, local_path: &Path, dest_folder_id: &str, name: &str) -> StorageResult<String> {
            let content = std::fs::read(local_path)?;
            let id = self.add_file(dest_folder_id, name, 0, content);
            self.state.lock().unwrap().calls.push(Call::Upload {
                folder: dest_folder_id.to_string(),
                name: name.to_string(),
            });
            Ok(id)
        }

        fn download_file(&self, file_id: &str, local_path: &Path) -> StorageResult<()> {
            let content = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(Call::Download { id: file_id.to_string() });
                state
                    .nodes
                    .get(file_id)
                    .map(|n| n.content.clone())
                    .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?
            };
            let partial = partial_path(local_path);
            std::fs::write(&partial, content)?;
            std::fs::rename(&partial, local_path)?;
            Ok(())
        }
    }

    impl DocumentSource for MemoryStorage {
        fn extract_links(&self, document_id: &str) -> StorageResult<Vec<String>> {
            let state = self.state.lock().unwrap();
            state
                .links
                .get(document_id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(document_id.to_string()))
        }
    }
}
