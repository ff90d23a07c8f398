//! Persistence handle for [`ConnectionData`].
//!
//! The session never touches the filesystem directly; it reads and writes
//! through an injected [`ConnectionStore`]. The CLI uses the file store in
//! the config directory, tests use the in-memory one.

use anyhow::{Context, Result};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::connection_data::ConnectionData;

/// File name of the connection record inside the config directory.
pub const CONNECTION_FILE: &str = "connection.json";

/// Load/save access to the connection record.
pub trait ConnectionStore: Send + Sync + std::fmt::Debug {
    /// Load the stored record, `None` if nothing has been saved yet.
    fn load(&self) -> Result<Option<ConnectionData>>;

    /// Replace the stored record.
    fn save(&self, data: &ConnectionData) -> Result<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileConnectionStore {
    path: PathBuf,
}

impl FileConnectionStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`CONNECTION_FILE`] inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CONNECTION_FILE))
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionStore for FileConnectionStore {
    fn load(&self) -> Result<Option<ConnectionData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let data = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(data))
    }

    fn save(&self, data: &ConnectionData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(data)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        // Owner read/write only: the record holds broker credentials
        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    data: Mutex<Option<ConnectionData>>,
    saves: Mutex<usize>,
}

impl MemoryConnectionStore {
    /// Store pre-seeded with `data`.
    #[must_use]
    pub fn with_data(data: ConnectionData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            saves: Mutex::new(0),
        }
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> Option<ConnectionData> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Number of `save` calls so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or_default()
    }
}

impl ConnectionStore for MemoryConnectionStore {
    fn load(&self) -> Result<Option<ConnectionData>> {
        Ok(self.snapshot())
    }

    fn save(&self, data: &ConnectionData) -> Result<()> {
        let mut slot = self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("connection store lock poisoned: {e}"))?;
        *slot = Some(data.clone());
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use chrono::Utc;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryConnectionStore::default();
        assert!(store.load().expect("load").is_none());

        let data = ConnectionData::new(&DeviceDescriptor::generate(), Utc::now());
        store.save(&data).expect("save");
        assert_eq!(store.load().expect("load"), Some(data));
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileConnectionStore::in_dir(dir.path());
        assert!(store.load().expect("load").is_none());
    }
}
