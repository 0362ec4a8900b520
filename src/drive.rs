//! Google Drive v3 and Docs v1 REST client.
//!
//! Blocking `ureq` calls wrapped in the configured [`RetryPolicy`]. Listing
//! follows `nextPageToken` until exhausted and always excludes trashed entries.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::models::{RemoteFile, RemoteFolder};
use crate::retry::RetryPolicy;
use crate::storage::{partial_path, DocumentSource, Storage, StorageError, StorageResult, FOLDER_MIME};

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const DOCS_BASE: &str = "https://docs.googleapis.com/v1/documents";
const PAGE_SIZE: &str = "1000";
/// Bytes requested per ranged download call.
const DOWNLOAD_CHUNK: u64 = 8 * 1024 * 1024;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_timestamp_ms(value: &str) -> StorageResult<i64> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| StorageError::Decode(format!("bad timestamp '{}': {}", value, e)))
}

/// Escape a literal for use inside a Drive `q` expression.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn map_ureq_error(error: ureq::Error) -> StorageError {
    match error {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            StorageError::from_status(code, body)
        }
        ureq::Error::Transport(transport) => StorageError::Transport(transport.to_string()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: ureq::Response) -> StorageResult<T> {
    response.into_json().map_err(|e| StorageError::Decode(e.to_string()))
}

// ============================================================================
// Ranged Downloads
// ============================================================================

enum Chunk {
    /// Bytes starting at the requested offset, with the full size when the server reports it.
    Range { bytes: Vec<u8>, total: Option<u64> },
    /// The server ignored the range and sent the whole file.
    Whole(Vec<u8>),
    /// Nothing left past the offset (416).
    Past,
}

/// `Range` header for the chunk of `chunk` bytes starting at `offset`.
fn chunk_range(offset: u64, chunk: u64) -> String {
    format!("bytes={}-{}", offset, offset + chunk.max(1) - 1)
}

/// Full size from a `Content-Range: bytes 0-99/1234` header. `*` means unknown.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// Bytes already staged in `partial` by an earlier, interrupted download.
fn resume_offset(partial: &Path) -> StorageResult<u64> {
    match std::fs::metadata(partial) {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Whether a ranged download is finished after a chunk of `received` bytes
/// brought the staged length to `offset`.
fn download_complete(offset: u64, received: u64, total: Option<u64>, chunk: u64) -> bool {
    if received == 0 {
        return true;
    }
    match total {
        Some(total) => offset >= total,
        None => received < chunk,
    }
}

impl TryFrom<DriveFile> for RemoteFile {
    type Error = StorageError;

    fn try_from(file: DriveFile) -> StorageResult<Self> {
        let size = match file.size.as_deref() {
            Some(s) => s
                .parse()
                .map_err(|_| StorageError::Decode(format!("bad size '{}' for {}", s, file.id)))?,
            None => 0,
        };
        let created_ms = file.created_time.as_deref().map(parse_timestamp_ms).transpose()?.unwrap_or(0);
        let modified_ms = file.modified_time.as_deref().map(parse_timestamp_ms).transpose()?.unwrap_or(0);
        Ok(RemoteFile {
            id: file.id,
            name: file.name,
            size,
            created_ms,
            modified_ms,
        })
    }
}

/// Collect every hyperlink in a Docs API document body, descending into tables.
pub fn collect_links(content: &Value, links: &mut Vec<String>) {
    let Some(elements) = content.as_array() else {
        return;
    };
    for element in elements {
        if let Some(runs) = element.pointer("/paragraph/elements").and_then(Value::as_array) {
            for run in runs {
                if let Some(url) = run.pointer("/textRun/textStyle/link/url").and_then(Value::as_str) {
                    links.push(url.to_string());
                }
            }
        }
        if let Some(rows) = element.pointer("/table/tableRows").and_then(Value::as_array) {
            for row in rows {
                for cell in row.get("tableCells").and_then(Value::as_array).into_iter().flatten() {
                    if let Some(cell_content) = cell.get("content") {
                        collect_links(cell_content, links);
                    }
                }
            }
        }
    }
}

pub struct DriveClient {
    agent: ureq::Agent,
    auth_header: String,
    retry: RetryPolicy,
}

impl DriveClient {
    pub fn new(access_token: &str, retry: RetryPolicy) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(120))
            .timeout_write(Duration::from_secs(120))
            .build();
        Self {
            agent,
            auth_header: format!("Bearer {}", access_token.trim()),
            retry,
        }
    }

    fn call<F>(&self, label: &str, request: F) -> StorageResult<ureq::Response>
    where
        F: Fn() -> Result<ureq::Response, ureq::Error>,
    {
        self.retry
            .run(label, || request().map_err(map_ureq_error), StorageError::is_transient)
    }

    fn get(&self, url: &str) -> ureq::Request {
        self.agent
            .get(url)
            .set("Authorization", &self.auth_header)
            .query("supportsAllDrives", "true")
    }

    fn send(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &self.auth_header)
            .query("supportsAllDrives", "true")
    }

    /// One ranged GET of file content. Body read failures are reported as
    /// interruptions so the retry policy re-requests the same range.
    fn fetch_chunk(&self, url: &str, offset: u64) -> StorageResult<Chunk> {
        let request = self
            .get(url)
            .query("alt", "media")
            .set("Range", &chunk_range(offset, DOWNLOAD_CHUNK));
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(416, _)) => return Ok(Chunk::Past),
            Err(e) => return Err(map_ureq_error(e)),
        };
        let ranged = response.status() == 206;
        let total = response.header("Content-Range").and_then(content_range_total);
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| StorageError::Interrupted(e.to_string()))?;
        Ok(if ranged { Chunk::Range { bytes, total } } else { Chunk::Whole(bytes) })
    }

    /// Run a files.list query, following page tokens.
    fn list(&self, query: &str, fields: &str) -> StorageResult<Vec<DriveFile>> {
        let url = format!("{}/files", API_BASE);
        let fields = format!("nextPageToken, files({})", fields);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let response = self.call("files.list", || {
                let mut request = self
                    .get(&url)
                    .query("q", query)
                    .query("fields", &fields)
                    .query("pageSize", PAGE_SIZE)
                    .query("includeItemsFromAllDrives", "true");
                if let Some(token) = &page_token {
                    request = request.query("pageToken", token);
                }
                request.call()
            })?;
            let page: FileList = decode(response)?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(files),
            }
        }
    }
}

impl Storage for DriveClient {
    fn list_subfolders(&self, folder_id: &str) -> StorageResult<Vec<RemoteFolder>> {
        let query = format!(
            "'{}' in parents and mimeType = '{}' and trashed = false",
            escape_query(folder_id),
            FOLDER_MIME
        );
        Ok(self
            .list(&query, "id, name")?
            .into_iter()
            .map(|f| RemoteFolder { id: f.id, name: f.name })
            .collect())
    }

    fn list_files(&self, folder_id: &str, mime_filter: Option<&str>) -> StorageResult<Vec<RemoteFile>> {
        let mut query = format!(
            "'{}' in parents and mimeType != '{}' and trashed = false",
            escape_query(folder_id),
            FOLDER_MIME
        );
        if let Some(mime) = mime_filter {
            query.push_str(&format!(" and mimeType = '{}'", escape_query(mime)));
        }
        self.list(&query, "id, name, size, createdTime, modifiedTime")?
            .into_iter()
            .map(RemoteFile::try_from)
            .collect()
    }

    fn folder_name(&self, folder_id: &str) -> StorageResult<String> {
        let url = format!("{}/files/{}", API_BASE, urlencoding::encode(folder_id));
        let response = self.call("files.get", || self.get(&url).query("fields", "id, name").call())?;
        let file: DriveFile = decode(response)?;
        Ok(file.name)
    }

    fn find_folder(&self, name: &str, parent_id: &str) -> StorageResult<Option<RemoteFolder>> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            FOLDER_MIME,
            escape_query(parent_id)
        );
        Ok(self
            .list(&query, "id, name")?
            .into_iter()
            .next()
            .map(|f| RemoteFolder { id: f.id, name: f.name }))
    }

    fn create_folder(&self, name: &str, parent_id: &str) -> StorageResult<String> {
        let url = format!("{}/files", API_BASE);
        let body = json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent_id] });
        let response = self.call("files.create", || {
            self.send("POST", &url).query("fields", "id").send_json(&body)
        })?;
        Ok(decode::<CreatedFile>(response)?.id)
    }

    fn copy_file(&self, source_id: &str, dest_folder_id: &str, new_name: &str) -> StorageResult<String> {
        let url = format!("{}/files/{}/copy", API_BASE, urlencoding::encode(source_id));
        let body = json!({ "name": new_name, "parents": [dest_folder_id] });
        let response = self.call("files.copy", || {
            self.send("POST", &url).query("fields", "id").send_json(&body)
        })?;
        Ok(decode::<CreatedFile>(response)?.id)
    }

    fn trash_file(&self, file_id: &str) -> StorageResult<()> {
        let url = format!("{}/files/{}", API_BASE, urlencoding::encode(file_id));
        let body = json!({ "trashed": true });
        self.call("files.update", || self.send("PATCH", &url).send_json(&body))?;
        Ok(())
    }

    fn upload_file(&self, local_path: &Path, dest_folder_id: &str, name: &str) -> StorageResult<String> {
        let bytes = std::fs::read(local_path)?;

        // Metadata first, then the content as a media upload against the new id
        let url = format!("{}/files", API_BASE);
        let body = json!({ "name": name, "parents": [dest_folder_id] });
        let response = self.call("files.create", || {
            self.send("POST", &url).query("fields", "id").send_json(&body)
        })?;
        let id = decode::<CreatedFile>(response)?.id;

        let media_url = format!("{}/files/{}", UPLOAD_BASE, urlencoding::encode(&id));
        self.call("files.upload", || {
            self.send("PATCH", &media_url)
                .query("uploadType", "media")
                .set("Content-Type", "application/octet-stream")
                .send_bytes(&bytes)
        })?;
        Ok(id)
    }

    fn download_file(&self, file_id: &str, local_path: &Path) -> StorageResult<()> {
        let url = format!("{}/files/{}", API_BASE, urlencoding::encode(file_id));
        let partial = partial_path(local_path);
        let mut offset = resume_offset(&partial)?;
        let mut writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(&partial)?);

        loop {
            let chunk = self.retry.run(
                "files.download",
                || self.fetch_chunk(&url, offset),
                StorageError::is_transient,
            )?;
            match chunk {
                Chunk::Range { bytes, total } => {
                    writer.write_all(&bytes)?;
                    writer.flush()?;
                    offset += bytes.len() as u64;
                    if download_complete(offset, bytes.len() as u64, total, DOWNLOAD_CHUNK) {
                        break;
                    }
                }
                Chunk::Whole(bytes) => {
                    writer.flush()?;
                    writer.get_mut().set_len(0)?;
                    writer.write_all(&bytes)?;
                    writer.flush()?;
                    break;
                }
                Chunk::Past => break,
            }
        }
        drop(writer);
        std::fs::rename(&partial, local_path)?;
        Ok(())
    }
}

impl DocumentSource for DriveClient {
    fn extract_links(&self, document_id: &str) -> StorageResult<Vec<String>> {
        let url = format!("{}/{}", DOCS_BASE, urlencoding::encode(document_id));
        let response = self.call("documents.get", || {
            self.agent.get(&url).set("Authorization", &self.auth_header).call()
        })?;
        let doc: Value = decode(response)?;
        let mut links = Vec::new();
        if let Some(content) = doc.pointer("/body/content") {
            collect_links(content, &mut links);
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_ms() {
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:01.500Z").unwrap(), 1500);
        assert_eq!(parse_timestamp_ms("2024-03-01T12:00:00.000Z").unwrap(), 1_709_294_400_000);
        assert!(parse_timestamp_ms("yesterday").is_err());
    }

    #[test]
    fn test_chunk_range() {
        assert_eq!(chunk_range(0, 1024), "bytes=0-1023");
        assert_eq!(chunk_range(4096, 1024), "bytes=4096-5119");
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("bytes 0-1023/5000"), Some(5000));
        assert_eq!(content_range_total("bytes 0-1023/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn test_resume_offset_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let partial = partial_path(&dir.path().join("Tuba.pdf"));
        assert_eq!(resume_offset(&partial).unwrap(), 0);

        std::fs::write(&partial, vec![0u8; 1500]).unwrap();
        assert_eq!(resume_offset(&partial).unwrap(), 1500);
        assert_eq!(chunk_range(resume_offset(&partial).unwrap(), 1000), "bytes=1500-2499");
    }

    #[test]
    fn test_download_complete() {
        // Known size: done once the staged length reaches it
        assert!(!download_complete(1000, 1000, Some(2500), 1000));
        assert!(download_complete(2500, 500, Some(2500), 1000));
        // Unknown size: a short chunk is the last one
        assert!(!download_complete(1000, 1000, None, 1000));
        assert!(download_complete(1200, 200, None, 1000));
        assert!(download_complete(1000, 0, None, 1000));
    }

    #[test]
    fn test_server_faults_are_retried_with_backoff() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10), Duration::from_millis(40));
        let mut attempts = 0;
        let mut slept = Vec::new();
        let result = policy.run_with_sleep(
            "files.download",
            || {
                attempts += 1;
                match attempts {
                    1 => Err(StorageError::from_status(500, "internal error")),
                    2 => Err(StorageError::Interrupted("connection reset".into())),
                    _ => Ok(attempts),
                }
            },
            StorageError::is_transient,
            |d| slept.push(d),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(slept, vec![Duration::from_millis(10), Duration::from_millis(20)]);
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10), Duration::from_millis(40));
        let mut attempts = 0;
        let result: StorageResult<()> = policy.run_with_sleep(
            "files.copy",
            || {
                attempts += 1;
                Err(StorageError::from_status(403, "insufficient permissions"))
            },
            StorageError::is_transient,
            |_| panic!("should not sleep"),
        );
        assert!(matches!(result, Err(StorageError::Permanent { status: 403, .. })));
        assert_eq!(attempts, 1);

        let mut attempts = 0;
        let result: StorageResult<()> = policy.run_with_sleep(
            "files.copy",
            || {
                attempts += 1;
                Err(StorageError::from_status(503, "backend error"))
            },
            StorageError::is_transient,
            |_| {},
        );
        assert!(matches!(result, Err(StorageError::Transient { status: 503, .. })));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("Rock 'n' Roll"), "Rock \\'n\\' Roll");
    }

    #[test]
    fn test_drive_file_conversion() {
        let file = DriveFile {
            id: "f1".into(),
            name: "Tuba.pdf".into(),
            size: Some("2048".into()),
            created_time: Some("1970-01-01T00:00:01Z".into()),
            modified_time: Some("1970-01-01T00:00:02Z".into()),
        };
        let remote = RemoteFile::try_from(file).unwrap();
        assert_eq!(remote.size, 2048);
        assert_eq!(remote.created_ms, 1000);
        assert_eq!(remote.modified_ms, 2000);
    }

    #[test]
    fn test_collect_links_walks_paragraphs_and_tables() {
        let body = json!([
            { "sectionBreak": {} },
            { "paragraph": { "elements": [
                { "textRun": { "content": "Warmup" } },
                { "textRun": { "content": "Tune", "textStyle": { "link": { "url": "https://drive.google.com/drive/folders/abc" } } } }
            ] } },
            { "table": { "tableRows": [ { "tableCells": [ { "content": [
                { "paragraph": { "elements": [
                    { "textRun": { "textStyle": { "link": { "url": "https://example.com" } } } }
                ] } }
            ] } ] } ] } }
        ]);
        let mut links = Vec::new();
        collect_links(&body, &mut links);
        assert_eq!(links, vec!["https://drive.google.com/drive/folders/abc", "https://example.com"]);
    }
}
