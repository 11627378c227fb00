//! Core data models shared by the builders, the clustering engine and the store.
//!
//! A run produces [`EntityDocument`]s and [`Relationship`]s; the persisted
//! collection of both is a [`StoreData`]. Container documents are projected
//! into [`ContainerRecord`]s before clustering.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::relationship::RelationshipType;

/// Flat, queryable attributes of a document or relationship, in the order
/// they were written.
pub type Metadata = Map<String, Value>;

/// Metadata key naming the system that owns a document.
pub const OWNER_FIELD: &str = "system_name";
/// Fallback ownership key, used when [`OWNER_FIELD`] is absent.
pub const OWNER_FALLBACK_FIELD: &str = "hosted_by";

/// Document type names produced by the builders and the clustering engine.
pub mod kind {
    pub const SERVER: &str = "server";
    pub const VIRTUAL_SERVER: &str = "virtual_server";
    pub const HARDWARE: &str = "hardware";
    pub const CONTAINER: &str = "container";
    pub const SERVICE: &str = "service";
    pub const NETWORK: &str = "network";
    pub const VM: &str = "vm";
    pub const LXC: &str = "lxc";
    pub const CONFIG_FILE: &str = "config_file";
}

/// Derive a deterministic entity id from `(kind, scope, name)`.
///
/// Re-deriving the same inputs always yields the same id.
pub fn entity_id(kind: &str, scope: &str, name: &str) -> String {
    format!("{}_{}_{}", kind, scope, name)
}

/// Id of a system-level entity (one per system), e.g. `server_pve1`.
pub fn system_entity_id(kind: &str, system: &str) -> String {
    format!("{}_{}", kind, system)
}

/// A self-contained semantic record describing one infrastructure object.
///
/// Fields this crate does not know about are kept in `extra` so that
/// documents written by other tools survive a load/save cycle unchanged.
/// An explicit `"details": null` and an empty `"tags": []` are kept as
/// written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Tags::is_absent")]
    pub tags: Tags,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityDocument {
    pub fn new(
        id: impl Into<String>,
        doc_type: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            title: title.into(),
            content: content.into(),
            metadata: Metadata::new(),
            details: None,
            tags: Tags::default(),
            extra: Map::new(),
        }
    }

    /// Set a metadata attribute, replacing any previous value.
    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// String-valued metadata attribute, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// The system this document belongs to.
    ///
    /// Reads [`OWNER_FIELD`], then [`OWNER_FALLBACK_FIELD`]. Returns `None`
    /// when neither is a non-empty string.
    pub fn owning_system(&self) -> Option<&str> {
        [OWNER_FIELD, OWNER_FALLBACK_FIELD]
            .iter()
            .find_map(|key| self.meta_str(key).filter(|s| !s.is_empty()))
    }

    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.tags.insert(tag);
        }
    }
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Document tags in insertion order, without duplicates.
///
/// `None` means the document has no `tags` field at all, which is not the
/// same as an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(Option<Vec<String>>);

impl Tags {
    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, Vec::len)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flatten().map(String::as_str)
    }

    /// Append a tag unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        let list = self.0.get_or_insert_with(Vec::new);
        if list.contains(&tag) {
            return false;
        }
        list.push(tag);
        true
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub source_id: String,
    pub source_type: String,
    pub target_id: String,
    pub target_type: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Store-level bookkeeping: timestamps and aggregate counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub processing_method: String,
    #[serde(default)]
    pub total_documents: usize,
    #[serde(default)]
    pub total_relationships: usize,
    #[serde(default)]
    pub total_systems: usize,
    #[serde(default)]
    pub document_counts: BTreeMap<String, usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entity summary categories kept in [`StoreData::entities`].
pub mod category {
    pub const SYSTEMS: &str = "systems";
    pub const SERVICES: &str = "services";
    pub const CATEGORIES: &str = "categories";
}

/// The persisted collection of all documents and relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub metadata: StoreMetadata,
    #[serde(default)]
    pub documents: Vec<EntityDocument>,
    #[serde(default)]
    pub entities: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl StoreData {
    /// An empty store with the standard entity categories.
    pub fn empty() -> Self {
        let entities = [category::SYSTEMS, category::SERVICES, category::CATEGORIES]
            .iter()
            .map(|c| (c.to_string(), BTreeMap::new()))
            .collect();
        Self {
            metadata: StoreMetadata {
                export_timestamp: Some(chrono::Utc::now().to_rfc3339()),
                processing_method: "infradoc".to_string(),
                ..StoreMetadata::default()
            },
            documents: Vec::new(),
            entities,
            relationships: Vec::new(),
        }
    }

    pub fn document(&self, id: &str) -> Option<&EntityDocument> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Mutable access to one entity category, creating it if missing.
    pub fn entity_category(&mut self, name: &str) -> &mut BTreeMap<String, Value> {
        self.entities.entry(name.to_string()).or_default()
    }
}

impl Default for StoreData {
    fn default() -> Self {
        Self::empty()
    }
}

/// The fields of a container document that the clustering engine inspects.
///
/// Everything else in the document's metadata is carried in `extra`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerRecord {
    pub id: String,
    pub container_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub networks: Vec<String>,
    pub depends_on: Vec<String>,
    pub hosted_by: Option<String>,
    pub status: Option<String>,
    pub image: Option<String>,
    pub part_of_service: Option<String>,
    pub extra: Metadata,
}

const RECORD_FIELDS: &[&str] = &[
    "container_name",
    "labels",
    "networks",
    "depends_on",
    "hosted_by",
    "status",
    "image",
    "part_of_service",
];

impl ContainerRecord {
    /// Project a container document into a record.
    ///
    /// Malformed fields (wrong JSON type, non-string list entries) are
    /// dropped rather than rejected; an empty name counts as absent.
    pub fn from_document(doc: &EntityDocument) -> Self {
        let meta = &doc.metadata;
        let labels = meta
            .get("labels")
            .or_else(|| doc.details.as_ref().and_then(|d| d.get("labels")))
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let extra = meta
            .iter()
            .filter(|(k, _)| !RECORD_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            id: doc.id.clone(),
            container_name: non_empty_str(meta.get("container_name")),
            labels,
            networks: string_list(meta.get("networks")),
            depends_on: string_list(meta.get("depends_on")),
            hosted_by: non_empty_str(meta.get("hosted_by")),
            status: non_empty_str(meta.get("status")),
            image: non_empty_str(meta.get("image")),
            part_of_service: non_empty_str(meta.get("part_of_service")),
            extra,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.as_deref() == Some("running")
    }

    /// Display name: container name if known, else the id.
    pub fn display_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or(&self.id)
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_ids_are_deterministic() {
        assert_eq!(entity_id("container", "web01", "nginx"), "container_web01_nginx");
        assert_eq!(
            entity_id("container", "web01", "nginx"),
            entity_id("container", "web01", "nginx")
        );
        assert_eq!(system_entity_id("server", "pve1"), "server_pve1");
    }

    #[test]
    fn owning_system_prefers_primary_field() {
        let mut doc = EntityDocument::new("d1", "container", "t", "c");
        assert_eq!(doc.owning_system(), None);
        doc.set_meta("hosted_by", "b");
        assert_eq!(doc.owning_system(), Some("b"));
        doc.set_meta("system_name", "a");
        assert_eq!(doc.owning_system(), Some("a"));
        doc.set_meta("system_name", "");
        assert_eq!(doc.owning_system(), Some("b"));
    }

    #[test]
    fn unknown_document_fields_round_trip() {
        let raw = json!({
            "id": "legacy_1",
            "type": "note",
            "title": "Old",
            "content": "text",
            "metadata": {"author": "ops"},
            "source_file": "notes.md"
        });
        let doc: EntityDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(doc.extra.get("source_file"), Some(&json!("notes.md")));
        assert_eq!(serde_json::to_value(&doc).unwrap(), raw);
    }

    #[test]
    fn null_details_and_tag_order_survive_round_trip() {
        let text = r#"{"id":"y1","type":"note","title":"Y","content":"c","metadata":{"system_name":"Y","a":1},"details":null,"tags":["zeta","alpha"]}"#;
        let doc: EntityDocument = serde_json::from_str(text).unwrap();
        assert_eq!(doc.details, Some(Value::Null));
        assert_eq!(doc.tags.iter().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(serde_json::to_string(&doc).unwrap(), text);

        let empty = r#"{"id":"y2","type":"note","title":"Y","content":"c","metadata":{},"tags":[]}"#;
        let doc: EntityDocument = serde_json::from_str(empty).unwrap();
        assert!(!doc.tags.is_absent());
        assert_eq!(serde_json::to_string(&doc).unwrap(), empty);
    }

    #[test]
    fn add_tags_keeps_first_occurrence_order() {
        let mut doc = EntityDocument::new("d1", "container", "t", "c");
        assert!(doc.tags.is_absent());
        doc.add_tags(Vec::<String>::new());
        assert!(doc.tags.is_absent());
        doc.add_tags(["web", "docker", "web", "alpha"]);
        assert_eq!(doc.tags.iter().collect::<Vec<_>>(), vec!["web", "docker", "alpha"]);
        assert_eq!(doc.tags.len(), 3);
    }

    #[test]
    fn container_record_tolerates_malformed_fields() {
        let mut doc = EntityDocument::new("container_h_x", "container", "t", "c");
        doc.set_meta("container_name", "");
        doc.set_meta("networks", json!(["frontend", 7, "backend"]));
        doc.set_meta("labels", json!({"app": "foo", "weight": 3}));
        doc.set_meta("depends_on", "not-a-list");
        doc.set_meta("restart_policy", "always");

        let record = ContainerRecord::from_document(&doc);
        assert_eq!(record.container_name, None);
        assert_eq!(record.display_name(), "container_h_x");
        assert_eq!(record.networks, vec!["frontend", "backend"]);
        assert_eq!(record.labels.get("app").map(String::as_str), Some("foo"));
        assert!(!record.labels.contains_key("weight"));
        assert!(record.depends_on.is_empty());
        assert_eq!(record.extra.get("restart_policy"), Some(&json!("always")));
    }

    #[test]
    fn empty_store_has_standard_categories() {
        let store = StoreData::empty();
        assert!(store.entities.contains_key("systems"));
        assert!(store.entities.contains_key("services"));
        assert!(store.entities.contains_key("categories"));
        assert!(store.documents.is_empty());
    }
}
