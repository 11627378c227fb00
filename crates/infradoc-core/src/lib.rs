//! # infradoc core
//!
//! Pure assembly logic for infradoc: the entity data model, the
//! relationship builder, the service clustering engine, the host
//! capability classifier and the incremental store merge.
//!
//! This crate performs no filesystem, network or async work. Callers hand
//! it already-collected data and persist what it returns.

pub mod classify;
pub mod cluster;
pub mod error;
pub mod merge;
pub mod models;
pub mod relationship;
pub mod store;
