//! Gateway-owned Document Registry: the file-based source of truth for
//! document metadata.
//!
//! Persisted layout under `registry.root`:
//!
//! ```text
//! documents.json   # { document_id -> Document }
//! version          # monotonic counter, one line
//! ```
//!
//! and, under the registry root's parent, `blobs/{document_id}/{original_filename}`
//! holding the uploaded bytes. Writes are atomic (write to a temp file in the
//! same directory, then rename) and an advisory file lock serializes
//! concurrent writers across processes. Every successful write bumps the
//! monotonic version counter; callers that pass a stale `expected_version`
//! to [`DocumentRegistry::update`] get a 409 conflict error.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::models::Document;

const DOCUMENTS_FILE: &str = "documents.json";
const VERSION_FILE: &str = "version";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentsFile {
    documents: HashMap<String, Document>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub version: u64,
    pub document_count: usize,
}

/// The Gateway's document registry. All mutating operations serialize
/// through an in-process mutex (held only across the in-memory update and
/// the atomic file write) plus a cross-process advisory lock on `.lock`.
pub struct DocumentRegistry {
    root: PathBuf,
    state: Mutex<DocumentsFile>,
}

impl DocumentRegistry {
    /// Load (or initialize) a registry rooted at `root`, creating the
    /// directory and an empty `documents.json`/`version` if absent.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating registry root {}", root.display()))?;

        let documents_path = root.join(DOCUMENTS_FILE);
        let state = if documents_path.exists() {
            let content = std::fs::read_to_string(&documents_path)
                .with_context(|| format!("reading {}", documents_path.display()))?;
            serde_json::from_str(&content).with_context(|| "parsing documents.json")?
        } else {
            DocumentsFile::default()
        };

        let version_path = root.join(VERSION_FILE);
        if !version_path.exists() {
            std::fs::write(&version_path, "0")?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    /// Reload in-memory state from disk, discarding any uncommitted local
    /// changes. Used after acquiring the cross-process lock to observe
    /// writes made by other processes.
    pub fn reload_from_disk(&self) -> Result<()> {
        let documents_path = self.root.join(DOCUMENTS_FILE);
        let content = std::fs::read_to_string(&documents_path)
            .with_context(|| format!("reading {}", documents_path.display()))?;
        let fresh: DocumentsFile =
            serde_json::from_str(&content).with_context(|| "parsing documents.json")?;
        *self.state.lock().unwrap() = fresh;
        Ok(())
    }

    fn current_version(&self) -> Result<u64> {
        let content = std::fs::read_to_string(self.root.join(VERSION_FILE))?;
        Ok(content.trim().parse().unwrap_or(0))
    }

    fn acquire_lock(&self) -> Result<File> {
        let lock_path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("opening lock file {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| "acquiring registry lock")?;
        Ok(file)
    }

    /// Persist the current in-memory state atomically: write to a temp file
    /// in the registry root, then rename over `documents.json`. Bumps the
    /// version counter. Must be called while holding the cross-process lock.
    fn persist_locked(&self, state: &DocumentsFile) -> Result<u64> {
        let json = serde_json::to_vec_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(self.root.join(DOCUMENTS_FILE))
            .map_err(|e| anyhow::anyhow!("persisting documents.json: {}", e))?;

        let next_version = self.current_version()? + 1;
        let mut version_tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        version_tmp.write_all(next_version.to_string().as_bytes())?;
        version_tmp.flush()?;
        version_tmp
            .persist(self.root.join(VERSION_FILE))
            .map_err(|e| anyhow::anyhow!("persisting version: {}", e))?;

        Ok(next_version)
    }

    /// Add a new document record. Fails if `document_id` already exists.
    pub fn add(&self, document: Document) -> Result<u64, RegistryError> {
        let _lock = self.acquire_lock()?;
        self.reload_from_disk()?;
        let mut state = self.state.lock().unwrap();

        if state.documents.contains_key(&document.document_id) {
            return Err(RegistryError::Conflict {
                expected: 0,
                actual: 0,
            });
        }
        state.documents.insert(document.document_id.clone(), document);
        let version = self.persist_locked(&state)?;
        Ok(version)
    }

    pub fn get(&self, document_id: &str) -> Result<Document, RegistryError> {
        let state = self.state.lock().unwrap();
        state
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(document_id.to_string()))
    }

    pub fn list(&self) -> Vec<Document> {
        let state = self.state.lock().unwrap();
        let mut docs: Vec<Document> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        docs
    }

    /// Optimistic-concurrency update: `expected_version` must match the
    /// document's current `version_info.version`, else a conflict error is
    /// returned (maps to HTTP 409 at the boundary). Renames are tolerated —
    /// `original_name` is preserved across a `name` change.
    pub fn update<F>(
        &self,
        document_id: &str,
        expected_version: Option<u64>,
        mutate: F,
    ) -> Result<Document, RegistryError>
    where
        F: FnOnce(&mut Document),
    {
        let _lock = self.acquire_lock()?;
        self.reload_from_disk()?;
        let mut state = self.state.lock().unwrap();

        let document = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| RegistryError::NotFound(document_id.to_string()))?;

        if let Some(expected) = expected_version {
            if document.version_info.version != expected {
                return Err(RegistryError::Conflict {
                    expected,
                    actual: document.version_info.version,
                });
            }
        }

        mutate(document);
        document.version_info.version += 1;

        let updated = document.clone();
        self.persist_locked(&state)?;
        Ok(updated)
    }

    pub fn remove(&self, document_id: &str) -> Result<(), RegistryError> {
        let _lock = self.acquire_lock()?;
        self.reload_from_disk()?;
        let mut state = self.state.lock().unwrap();

        if state.documents.remove(document_id).is_none() {
            return Err(RegistryError::NotFound(document_id.to_string()));
        }
        self.persist_locked(&state)?;
        Ok(())
    }

    /// Detect whether another process has advanced the registry past
    /// `known_version` since the caller last read it.
    pub fn check_for_conflicts(&self, known_version: u64) -> Result<bool> {
        Ok(self.current_version()? != known_version)
    }

    pub fn registry_version(&self) -> Result<u64> {
        self.current_version()
    }

    /// Snapshot of registry health: current version plus how many documents
    /// it holds. Used by `GET /health` and the `get_system_stats` MCP tool.
    pub fn get_sync_status(&self) -> Result<SyncStatus> {
        let document_count = self.state.lock().unwrap().documents.len();
        Ok(SyncStatus {
            version: self.current_version()?,
            document_count,
        })
    }

    pub fn blobs_dir(&self, document_id: &str) -> PathBuf {
        self.root
            .parent()
            .map(|p| p.join("blobs").join(document_id))
            .unwrap_or_else(|| self.root.join("blobs").join(document_id))
    }

    /// Store the uploaded bytes under `blobs/{document_id}/{original_filename}`.
    pub fn write_blob(&self, document_id: &str, original_filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.blobs_dir(document_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(original_filename);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| anyhow::anyhow!("persisting blob: {}", e))?;
        Ok(path)
    }

    pub fn read_blob(&self, document_id: &str, original_filename: &str) -> Result<Vec<u8>> {
        let path = self.blobs_dir(document_id).join(original_filename);
        let mut file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadMetadata;
    use chrono::Utc;

    fn upload() -> UploadMetadata {
        UploadMetadata {
            source: "upload".to_string(),
            timestamp: Utc::now(),
            size_bytes: 10,
            uploader: None,
        }
    }

    #[test]
    fn add_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(dir.path()).unwrap();
        let doc = Document::new("doc1".to_string(), "a.pdf".to_string(), "hash".to_string(), upload());
        reg.add(doc).unwrap();

        let fetched = reg.get("doc1").unwrap();
        assert_eq!(fetched.name, "a.pdf");
    }

    #[test]
    fn add_duplicate_id_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(dir.path()).unwrap();
        let doc = Document::new("doc1".to_string(), "a.pdf".to_string(), "hash".to_string(), upload());
        reg.add(doc.clone()).unwrap();
        let err = reg.add(doc).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(dir.path()).unwrap();
        let err = reg.get("missing").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn update_bumps_version_and_rejects_stale_expected_version() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(dir.path()).unwrap();
        let doc = Document::new("doc1".to_string(), "a.pdf".to_string(), "hash".to_string(), upload());
        reg.add(doc).unwrap();

        let updated = reg
            .update("doc1", Some(0), |d| d.name = "renamed.pdf".to_string())
            .unwrap();
        assert_eq!(updated.version_info.version, 1);
        assert_eq!(updated.name, "renamed.pdf");
        assert_eq!(updated.original_name, "a.pdf");

        let conflict = reg.update("doc1", Some(0), |d| d.name = "again.pdf".to_string());
        assert!(matches!(conflict, Err(RegistryError::Conflict { .. })));
    }

    #[test]
    fn remove_deletes_document() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(dir.path()).unwrap();
        let doc = Document::new("doc1".to_string(), "a.pdf".to_string(), "hash".to_string(), upload());
        reg.add(doc).unwrap();
        reg.remove("doc1").unwrap();
        assert!(matches!(reg.get("doc1"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn list_is_sorted_by_document_id() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(dir.path()).unwrap();
        reg.add(Document::new("b".to_string(), "b.pdf".to_string(), "h".to_string(), upload()))
            .unwrap();
        reg.add(Document::new("a".to_string(), "a.pdf".to_string(), "h".to_string(), upload()))
            .unwrap();
        let docs = reg.list();
        assert_eq!(docs[0].document_id, "a");
        assert_eq!(docs[1].document_id, "b");
    }

    #[test]
    fn blob_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let reg = DocumentRegistry::open(&dir.path().join("registry")).unwrap();
        reg.write_blob("doc1", "a.pdf", b"hello world").unwrap();
        let bytes = reg.read_blob("doc1", "a.pdf").unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn persisting_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let reg = DocumentRegistry::open(dir.path()).unwrap();
            reg.add(Document::new("doc1".to_string(), "a.pdf".to_string(), "h".to_string(), upload()))
                .unwrap();
        }
        let reg2 = DocumentRegistry::open(dir.path()).unwrap();
        assert_eq!(reg2.list().len(), 1);
    }
}
