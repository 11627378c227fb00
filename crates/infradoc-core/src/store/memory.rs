//! In-memory [`DocumentStore`] implementation for tests and dry runs.
//!
//! Holds at most one [`StoreData`] behind a `std::sync::RwLock`.

use std::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::models::StoreData;

use super::DocumentStore;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<Option<StoreData>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `data`.
    pub fn with_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(Some(data)),
        }
    }
}

impl DocumentStore for InMemoryStore {
    fn load(&self) -> Result<StoreData> {
        let guard = self
            .data
            .read()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))?;
        Ok(guard.clone().unwrap_or_else(StoreData::empty))
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))?;
        *guard = Some(data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::merge::MergeRequest;
    use crate::models::EntityDocument;

    fn owned(id: &str, system: &str) -> EntityDocument {
        let mut doc = EntityDocument::new(id, "server", id, "");
        doc.set_meta("system_name", system);
        doc
    }

    #[test]
    fn empty_store_loads_default_schema() {
        let store = InMemoryStore::new();
        let data = store.load().unwrap();
        assert!(data.documents.is_empty());
        assert_eq!(data.entities.len(), 3);
    }

    #[test]
    fn merge_persists_through_the_trait() {
        let store = InMemoryStore::new();
        let request = |docs| MergeRequest {
            documents: docs,
            reprocessed: BTreeSet::from(["a".to_string()]),
            ..MergeRequest::default()
        };

        store.merge(request(vec![owned("server_a", "a")])).unwrap();
        let (data, report) = store.merge(request(vec![owned("server_a", "a")])).unwrap();
        assert_eq!(report.removed_documents, 1);
        assert_eq!(data.documents.len(), 1);
        assert_eq!(store.load().unwrap().documents.len(), 1);
    }
}
