//! # infradoc
//!
//! Turns per-system infrastructure snapshots into a single JSON document
//! store of entities (hosts, hardware, containers, services, VMs, config
//! files) and the typed relationships between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐   ┌───────────┐
//! │ Snapshots  │──▶│  Classifier  │──▶│ Builders │──▶│  Tagging  │
//! │ *_unified  │   │ capabilities │   │ sections │   │ (optional)│
//! └────────────┘   └──────────────┘   └──────────┘   └─────┬─────┘
//!                                                          ▼
//!                                ┌───────────┐      ┌────────────┐
//!                                │   Store   │◀─────│ Clustering │
//!                                │  (merge)  │      │  services  │
//!                                └───────────┘      └────────────┘
//! ```
//!
//! The pure pieces (data model, relationships, clustering, classification,
//! merge) live in `infradoc-core`. This crate adds snapshot I/O, the
//! section builders, the LLM tagger, the JSON file store and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`snapshot`] | Snapshot discovery and loading |
//! | [`builders`] | Per-section entity builders |
//! | [`tagging`] | Semantic tagging through an LLM |
//! | [`pipeline`] | Run orchestration |
//! | [`json_store`] | JSON file store backend |
//! | [`stats`], [`get`], [`validate`], [`sources`] | Read-side commands |
//! | [`progress`] | Progress reporting |

pub mod builders;
pub mod config;
pub mod get;
pub mod json_store;
pub mod pipeline;
pub mod progress;
pub mod snapshot;
pub mod sources;
pub mod stats;
pub mod tagging;
pub mod validate;
