//! JSON file backend for [`DocumentStore`].
//!
//! The whole store lives in one pretty-printed JSON file. Saving writes a
//! temporary file in the same directory and renames it over the target, so
//! readers see either the old store or the new one, never a partial write.

use std::io::Write;
use std::path::{Path, PathBuf};

use infradoc_core::error::{Result, StoreError};
use infradoc_core::models::StoreData;
use infradoc_core::store::DocumentStore;

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> Result<StoreData> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no existing store, starting empty");
                return Ok(StoreData::empty());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| StoreError::parse(&self.path, e))
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let body = serde_json::to_vec_pretty(data).map_err(|e| StoreError::parse(&self.path, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infradoc_core::merge::MergeRequest;
    use infradoc_core::models::EntityDocument;
    use std::collections::BTreeSet;

    #[test]
    fn missing_file_loads_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        let data = store.load().unwrap();
        assert!(data.documents.is_empty());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{broken").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn save_creates_parent_dirs_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/store.json");
        let store = JsonFileStore::new(&path);

        let mut doc = EntityDocument::new("server_a", "server", "a", "a server");
        doc.set_meta("system_name", "a");
        let (merged, _) = store
            .merge(MergeRequest {
                documents: vec![doc],
                reprocessed: BTreeSet::from(["a".to_string()]),
                ..MergeRequest::default()
            })
            .unwrap();

        assert!(path.exists());
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, merged);
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn failed_load_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.merge(MergeRequest::default()).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }
}
