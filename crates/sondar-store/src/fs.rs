//! JSON file-backed stores.
//!
//! Sessions are stored one JSON document per session under a root
//! directory, written atomically via tempfile-and-rename. The audit trail
//! and response log are append-only JSONL files.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use sondar_core::model::{Response, Session};
use sondar_core::traits::{AuditEntry, AuditSink, ResponseLog, SessionStore, StoreError};

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// One JSON document per session under `root`.
pub struct JsonSessionStore {
    root: PathBuf,
}

impl JsonSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_err)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn get(&self, id: Uuid) -> Result<Session, StoreError> {
        let path = self.path_for(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(io_err(e)),
        };
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        // Write to a sibling temp file, then rename: readers never observe
        // a half-written session.
        let tmp = self.root.join(format!("{}.json.tmp", session.id));
        std::fs::write(&tmp, &json).map_err(io_err)?;
        std::fs::rename(&tmp, self.path_for(session.id)).map_err(io_err)?;
        Ok(())
    }
}

/// Append-only JSONL response log, one file per session.
pub struct JsonlResponseLog {
    root: PathBuf,
    /// Keys already appended per session, so a retried append is a no-op.
    appended: Mutex<HashMap<Uuid, HashSet<(String, usize)>>>,
}

impl JsonlResponseLog {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_err)?;
        Ok(Self {
            root,
            appended: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.root.join(format!("{session_id}.responses.jsonl"))
    }
}

#[async_trait]
impl ResponseLog for JsonlResponseLog {
    async fn append(&self, session_id: Uuid, response: &Response) -> Result<(), StoreError> {
        let key = (response.item_id.clone(), response.position);
        {
            let mut appended = self.appended.lock().unwrap();
            let seen = appended.entry(session_id).or_default();
            if seen.contains(&key) {
                return Ok(());
            }
            seen.insert(key);
        }

        let line =
            serde_json::to_string(response).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        Ok(())
    }
}

/// Append-only JSONL audit trail in a single file.
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        Ok(Self { path })
    }

    /// Read the full trail back, skipping unparseable lines.
    pub fn read_all(path: &Path) -> Result<Vec<AuditEntry>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let line = serde_json::to_string(entry).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        Ok(())
    }
}
