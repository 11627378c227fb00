//! Typed relationships and the bidirectional edge builder.
//!
//! Every relationship type that appears as a key in the inverse table
//! ([`RelationshipType::inverse`]) gets an automatically generated reverse
//! edge from [`create_bidirectional`]. Types absent from the table (including
//! the reverse names themselves, e.g. `HOSTS`) yield only the forward edge.
//!
//! # Example
//!
//! ```rust
//! use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
//!
//! let edges = create_bidirectional(
//!     EntityRef::new("container_h1_web", "container"),
//!     EntityRef::new("server_h1", "server"),
//!     RelationshipType::HostedBy,
//!     None,
//! );
//! assert_eq!(edges.len(), 2);
//! assert_eq!(edges[1].rel_type, RelationshipType::Hosts);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Metadata, Relationship};

/// Metadata key filled with the creation time when the caller omits it.
pub const CREATED_AT: &str = "created_at";

/// Relationship type enumeration.
///
/// Serialized as the upper snake case name (`HOSTED_BY`). Names outside the
/// enumeration round-trip through [`RelationshipType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipType {
    HostedBy,
    Hosts,
    RunsOn,
    Runs,
    StoresDataOn,
    ProvidesStorageFor,
    ConnectsTo,
    Uses,
    UsedBy,
    DependsOn,
    Supports,
    PartOf,
    Contains,
    ManagedBy,
    Manages,
    StoredOn,
    Stores,
    Configures,
    ConfiguredBy,
    Monitors,
    MonitoredBy,
    ProvidesService,
    ProvidedBy,
    Specifies,
    SpecifiedBy,
    RoutesTo,
    Proxies,
    Other(String),
}

const NAMED: &[(RelationshipType, &str)] = &[
    (RelationshipType::HostedBy, "HOSTED_BY"),
    (RelationshipType::Hosts, "HOSTS"),
    (RelationshipType::RunsOn, "RUNS_ON"),
    (RelationshipType::Runs, "RUNS"),
    (RelationshipType::StoresDataOn, "STORES_DATA_ON"),
    (RelationshipType::ProvidesStorageFor, "PROVIDES_STORAGE_FOR"),
    (RelationshipType::ConnectsTo, "CONNECTS_TO"),
    (RelationshipType::Uses, "USES"),
    (RelationshipType::UsedBy, "USED_BY"),
    (RelationshipType::DependsOn, "DEPENDS_ON"),
    (RelationshipType::Supports, "SUPPORTS"),
    (RelationshipType::PartOf, "PART_OF"),
    (RelationshipType::Contains, "CONTAINS"),
    (RelationshipType::ManagedBy, "MANAGED_BY"),
    (RelationshipType::Manages, "MANAGES"),
    (RelationshipType::StoredOn, "STORED_ON"),
    (RelationshipType::Stores, "STORES"),
    (RelationshipType::Configures, "CONFIGURES"),
    (RelationshipType::ConfiguredBy, "CONFIGURED_BY"),
    (RelationshipType::Monitors, "MONITORS"),
    (RelationshipType::MonitoredBy, "MONITORED_BY"),
    (RelationshipType::ProvidesService, "PROVIDES_SERVICE"),
    (RelationshipType::ProvidedBy, "PROVIDED_BY"),
    (RelationshipType::Specifies, "SPECIFIES"),
    (RelationshipType::SpecifiedBy, "SPECIFIED_BY"),
    (RelationshipType::RoutesTo, "ROUTES_TO"),
    (RelationshipType::Proxies, "PROXIES"),
];

impl RelationshipType {
    pub fn as_str(&self) -> &str {
        if let Self::Other(name) = self {
            return name;
        }
        NAMED
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// The static inverse table. Only forward types are keys.
    pub fn inverse(&self) -> Option<RelationshipType> {
        use RelationshipType::*;
        let inverse = match self {
            HostedBy => Hosts,
            RunsOn => Runs,
            StoresDataOn => ProvidesStorageFor,
            ConnectsTo => ConnectsTo,
            Uses => UsedBy,
            DependsOn => Supports,
            PartOf => Contains,
            ManagedBy => Manages,
            StoredOn => Stores,
            Configures => ConfiguredBy,
            Monitors => MonitoredBy,
            ProvidesService => ProvidedBy,
            Specifies => SpecifiedBy,
            _ => return None,
        };
        Some(inverse)
    }
}

impl From<String> for RelationshipType {
    fn from(name: String) -> Self {
        NAMED
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| t.clone())
            .unwrap_or(Self::Other(name))
    }
}

impl From<RelationshipType> for String {
    fn from(t: RelationshipType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint of a relationship: entity id plus entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef<'a> {
    pub id: &'a str,
    pub kind: &'a str,
}

impl<'a> EntityRef<'a> {
    pub fn new(id: &'a str, kind: &'a str) -> Self {
        Self { id, kind }
    }
}

/// Deterministic relationship id: `{source}_{type in lower case}_{target}`.
pub fn relationship_id(source_id: &str, rel_type: &RelationshipType, target_id: &str) -> String {
    format!(
        "{}_{}_{}",
        source_id,
        rel_type.as_str().to_lowercase(),
        target_id
    )
}

/// Create a single directed relationship.
///
/// Fills `created_at` when the metadata does not carry one; the timestamp
/// never contributes to the id.
pub fn create(
    source: EntityRef<'_>,
    target: EntityRef<'_>,
    rel_type: RelationshipType,
    metadata: Option<Metadata>,
) -> Relationship {
    let mut metadata = metadata.unwrap_or_default();
    stamp_created_at(&mut metadata);

    Relationship {
        id: relationship_id(source.id, &rel_type, target.id),
        rel_type,
        source_id: source.id.to_string(),
        source_type: source.kind.to_string(),
        target_id: target.id.to_string(),
        target_type: target.kind.to_string(),
        metadata,
    }
}

/// Create the forward edge and, when `forward` is tabulated, its inverse.
///
/// Returns one element for untabulated types. Both edges receive their own
/// copy of the same metadata, including one shared `created_at`.
pub fn create_bidirectional(
    source: EntityRef<'_>,
    target: EntityRef<'_>,
    forward: RelationshipType,
    metadata: Option<Metadata>,
) -> Vec<Relationship> {
    let mut metadata = metadata.unwrap_or_default();
    stamp_created_at(&mut metadata);

    let reverse = forward.inverse();
    let mut edges = vec![create(source, target, forward, Some(metadata.clone()))];
    if let Some(reverse) = reverse {
        edges.push(create(target, source, reverse, Some(metadata)));
    }
    edges
}

fn stamp_created_at(metadata: &mut Metadata) {
    metadata
        .entry(CREATED_AT.to_string())
        .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
}
