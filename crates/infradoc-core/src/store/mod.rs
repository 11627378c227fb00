//! Storage abstraction for the document store.
//!
//! The [`DocumentStore`] trait is the narrow load/save seam between the
//! merge engine and persistence. The in-memory backend lives here; the JSON
//! file backend lives in the application crate.
//!
//! Stores assume a single writer. Two concurrent merges against the same
//! backend may lose one run's output.

pub mod memory;

use crate::error::Result;
use crate::merge::{merge, MergeReport, MergeRequest};
use crate::models::StoreData;

/// Abstract persistence for [`StoreData`].
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load`](DocumentStore::load) | Read the current store, or an empty one if none exists |
/// | [`save`](DocumentStore::save) | Replace the persisted store as a whole |
/// | [`merge`](DocumentStore::merge) | Load, fold in one run, save |
pub trait DocumentStore: Send + Sync {
    /// Load the persisted store.
    ///
    /// A missing store is not an error and yields [`StoreData::empty`].
    /// An unreadable or corrupt store is.
    fn load(&self) -> Result<StoreData>;

    /// Persist `data`, replacing the previous contents entirely.
    fn save(&self, data: &StoreData) -> Result<()>;

    /// Load, merge `request`, save. Nothing is written if loading fails.
    fn merge(&self, request: MergeRequest) -> Result<(StoreData, MergeReport)> {
        let existing = self.load()?;
        let (merged, report) = merge(existing, request);
        self.save(&merged)?;
        Ok((merged, report))
    }
}
