//! Append-only Memory Store.
//!
//! Persists short textual memory entries to a JSON-Lines log, one object per
//! line, and keeps the full history in memory for retrieval.
//!
//! # Storage layout
//!
//! ```text
//! {"id":0,"text":"PLACE: sofa, lamp","metadata":{"type":"PLACE"}}
//! {"id":1,"text":"LOC: living room","metadata":{"type":"LOC"}}
//! ```
//!
//! The log is never rewritten.  On load every entry is numbered by its
//! position in the file, so a missing, gapped or duplicated `id` on disk
//! never leaks into the in-memory sequence.
//!
//! # Example
//!
//! ```rust
//! use objnav_memory::store::{MemoryMetadata, MemoryStore};
//! use objnav_types::MemoryType;
//!
//! let mut store = MemoryStore::in_memory();
//! let entry = store.upsert("LOC: kitchen", MemoryMetadata::of(MemoryType::Loc)).unwrap();
//! assert_eq!(entry.id, 0);
//! assert_eq!(store.len(), 1);
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use objnav_types::{MemoryType, NavError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from memory store operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed memory log line {line} in {path}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode memory entry: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<MemoryError> for NavError {
    fn from(e: MemoryError) -> Self {
        NavError::Memory(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryEntry
// ─────────────────────────────────────────────────────────────────────────────

/// Typed metadata attached to every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryType>,
    /// Any further keys are preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemoryMetadata {
    /// Metadata carrying only a type tag.
    pub fn of(kind: MemoryType) -> Self {
        Self {
            kind: Some(kind),
            extra: Map::new(),
        }
    }
}

/// A single memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Dense, strictly increasing identifier within one store.
    pub id: u64,
    pub text: String,
    pub metadata: MemoryMetadata,
}

impl MemoryEntry {
    pub fn kind(&self) -> Option<&MemoryType> {
        self.metadata.kind.as_ref()
    }
}

/// On-disk shape.  The stored `id` is advisory only.
#[derive(Deserialize)]
struct StoredEntry {
    id: Option<u64>,
    #[serde(default)]
    text: String,
    #[serde(default = "empty_metadata")]
    metadata: MemoryMetadata,
}

fn empty_metadata() -> MemoryMetadata {
    MemoryMetadata {
        kind: None,
        extra: Map::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// JSONL-backed append-only memory store.
///
/// [`upsert`][MemoryStore::upsert] always appends, despite its name: entries
/// are never merged, updated or deleted.  Each append is written to the log
/// before the call returns.
pub struct MemoryStore {
    path: Option<PathBuf>,
    file: Option<File>,
    entries: Vec<MemoryEntry>,
}

impl MemoryStore {
    /// Open (or create) the log at `path` and load every existing entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source: std::io::Error| MemoryError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(io_err)?;
        let entries = Self::load(&path)?;
        info!(path = %path.display(), entries = entries.len(), "opened memory store");
        Ok(Self {
            path: Some(path),
            file: Some(file),
            entries,
        })
    }

    /// A store that is never persisted (useful for testing).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            entries: Vec::new(),
        }
    }

    fn load(path: &Path) -> Result<Vec<MemoryEntry>, MemoryError> {
        let file = File::open(path).map_err(|source| MemoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entries: Vec<MemoryEntry> = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| MemoryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let stored: StoredEntry =
                serde_json::from_str(line).map_err(|source| MemoryError::Malformed {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    source,
                })?;
            let id = entries.len() as u64;
            if stored.id.is_some_and(|stored_id| stored_id != id) {
                debug!(line = idx + 1, stored = ?stored.id, id, "renumbered memory entry");
            }
            entries.push(MemoryEntry {
                id,
                text: stored.text,
                metadata: stored.metadata,
            });
        }
        Ok(entries)
    }

    /// Append a new entry and persist it before returning.
    pub fn upsert(
        &mut self,
        text: impl Into<String>,
        metadata: MemoryMetadata,
    ) -> Result<&MemoryEntry, MemoryError> {
        let entry = MemoryEntry {
            id: self.entries.len() as u64,
            text: text.into(),
            metadata,
        };
        if let (Some(file), Some(path)) = (self.file.as_mut(), self.path.as_ref()) {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|source| MemoryError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        debug!(id = entry.id, text = %entry.text, "memory entry appended");
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// Backing log path, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn place() -> MemoryMetadata {
        MemoryMetadata::of(MemoryType::Place)
    }

    #[test]
    fn upsert_always_appends() {
        let mut store = MemoryStore::in_memory();
        store.upsert("PLACE: sofa", place()).unwrap();
        store.upsert("PLACE: sofa", place()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[0].id, 0);
        assert_eq!(store.entries()[1].id, 1);
    }

    #[test]
    fn open_creates_missing_file_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rag_store.jsonl");
        let store = MemoryStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn upsert_writes_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag_store.jsonl");
        let mut store = MemoryStore::open(&path).unwrap();
        store.upsert("LOC: kitchen", MemoryMetadata::of(MemoryType::Loc)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 1);
        let json: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["id"], 0);
        assert_eq!(json["text"], "LOC: kitchen");
        assert_eq!(json["metadata"]["type"], "LOC");
    }

    #[test]
    fn reload_across_two_lifetimes_keeps_ids_dense() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag_store.jsonl");
        {
            let mut first = MemoryStore::open(&path).unwrap();
            first.upsert("PLACE: a", place()).unwrap();
            first.upsert("PLACE: b", place()).unwrap();
        }
        {
            let mut second = MemoryStore::open(&path).unwrap();
            assert_eq!(second.len(), 2);
            second.upsert("PLACE: c", place()).unwrap();
        }
        let reloaded = MemoryStore::open(&path).unwrap();
        let ids: Vec<u64> = reloaded.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let texts: Vec<&str> = reloaded.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["PLACE: a", "PLACE: b", "PLACE: c"]);
    }

    #[test]
    fn legacy_lines_without_id_are_assigned_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.jsonl");
        std::fs::write(
            &path,
            "{\"text\":\"PLACE: sofa\",\"metadata\":{\"type\":\"PLACE\"}}\n\n\
             {\"text\":\"LOC: den\",\"metadata\":{\"type\":\"LOC\"}}\n",
        )
        .unwrap();
        let mut store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.entries()[0].id, 0);
        assert_eq!(store.entries()[1].id, 1);
        assert_eq!(store.entries()[1].kind(), Some(&MemoryType::Loc));
        let next = store
            .upsert("DIR: target_rel=unknown", MemoryMetadata::of(MemoryType::Dir))
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn gapped_ids_on_disk_are_renumbered_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.jsonl");
        std::fs::write(
            &path,
            "{\"id\":5,\"text\":\"PLACE: a\",\"metadata\":{\"type\":\"PLACE\"}}\n\
             {\"text\":\"PLACE: b\",\"metadata\":{\"type\":\"PLACE\"}}\n",
        )
        .unwrap();
        let mut store = MemoryStore::open(&path).unwrap();
        store.upsert("PLACE: c", place()).unwrap();
        let ids: Vec<u64> = store.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_and_descending_ids_on_disk_are_renumbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.jsonl");
        std::fs::write(
            &path,
            "{\"id\":3,\"text\":\"PLACE: a\",\"metadata\":{}}\n\
             {\"id\":3,\"text\":\"PLACE: b\",\"metadata\":{}}\n\
             {\"id\":1,\"text\":\"LOC: hall\",\"metadata\":{\"type\":\"LOC\"}}\n",
        )
        .unwrap();
        let mut store = MemoryStore::open(&path).unwrap();
        let next = store.upsert("PLACE: d", place()).unwrap().id;
        assert_eq!(next, 3);

        let ids: Vec<u64> = store.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        let texts: Vec<&str> = store.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["PLACE: a", "PLACE: b", "LOC: hall", "PLACE: d"]);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"id\":0,\"text\":\"ok\",\"metadata\":{}}\nnot json\n").unwrap();
        let err = MemoryStore::open(&path).err().expect("malformed log must fail");
        assert!(matches!(err, MemoryError::Malformed { line: 2, .. }));
    }

    #[test]
    fn unknown_metadata_keys_survive() {
        let mut meta = place();
        meta.extra.insert("episode".into(), Value::from(3));
        let mut store = MemoryStore::in_memory();
        let entry = store.upsert("PLACE: x", meta).unwrap();
        let json = serde_json::to_value(entry).unwrap();
        assert_eq!(json["metadata"]["episode"], 3);
        assert_eq!(json["metadata"]["type"], "PLACE");
    }
}
