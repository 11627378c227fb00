//! Incremental store merge.
//!
//! [`merge`] folds one run's output into an existing [`StoreData`] without
//! touching documents owned by systems that were not reprocessed.
//!
//! # Algorithm
//!
//! 1. Drop every existing document whose owning system (see
//!    [`EntityDocument::owning_system`]) is in `reprocessed`. Documents with
//!    no resolvable owner are kept.
//! 2. De-duplicate the new documents by id (first wins). A new document
//!    whose id matches a kept document replaces it.
//! 3. Drop existing relationships that touch a removed or replaced document,
//!    or whose id is produced again by this run.
//! 4. Append the new documents and relationships.
//! 5. Rebuild the entity summaries and aggregate counts, stamp the time.
//!
//! The function is pure; persistence belongs to the
//! [`DocumentStore`](crate::store::DocumentStore) implementation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{category, kind, EntityDocument, Relationship, StoreData};

/// One run's output, ready to merge.
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    pub documents: Vec<EntityDocument>,
    pub relationships: Vec<Relationship>,
    /// Systems whose prior documents are replaced wholesale.
    pub reprocessed: BTreeSet<String>,
    /// Summary written to `entities.systems[system]` per reprocessed system.
    pub system_summaries: BTreeMap<String, Value>,
    pub run_id: Option<String>,
}

/// What a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub removed_documents: usize,
    pub preserved_documents: usize,
    pub replaced_documents: usize,
    pub added_documents: usize,
    pub duplicate_documents: usize,
    pub removed_relationships: usize,
    pub added_relationships: usize,
    pub duplicate_relationships: usize,
}

/// Merge `request` into `existing`.
pub fn merge(existing: StoreData, request: MergeRequest) -> (StoreData, MergeReport) {
    let StoreData {
        mut metadata,
        documents: old_documents,
        mut entities,
        relationships: old_relationships,
    } = existing;
    let mut report = MergeReport::default();

    let mut new_documents = Vec::with_capacity(request.documents.len());
    let mut new_ids: HashSet<String> = HashSet::new();
    for doc in request.documents {
        if new_ids.insert(doc.id.clone()) {
            new_documents.push(doc);
        } else {
            tracing::warn!(id = %doc.id, "duplicate document id in run output; keeping the first");
            report.duplicate_documents += 1;
        }
    }

    let mut gone: HashSet<String> = HashSet::new();
    let mut documents = Vec::with_capacity(old_documents.len() + new_documents.len());
    for doc in old_documents {
        let owned = doc
            .owning_system()
            .is_some_and(|system| request.reprocessed.contains(system));
        if owned {
            report.removed_documents += 1;
            gone.insert(doc.id.clone());
        } else if new_ids.contains(&doc.id) {
            report.replaced_documents += 1;
            gone.insert(doc.id.clone());
        } else {
            report.preserved_documents += 1;
            documents.push(doc);
        }
    }

    let mut new_relationships = Vec::with_capacity(request.relationships.len());
    let mut new_rel_ids: HashSet<String> = HashSet::new();
    for rel in request.relationships {
        if new_rel_ids.insert(rel.id.clone()) {
            new_relationships.push(rel);
        } else {
            report.duplicate_relationships += 1;
        }
    }

    let mut relationships: Vec<Relationship> = old_relationships
        .into_iter()
        .filter(|rel| {
            let stale = gone.contains(&rel.source_id)
                || gone.contains(&rel.target_id)
                || new_rel_ids.contains(&rel.id);
            if stale {
                report.removed_relationships += 1;
            }
            !stale
        })
        .collect();

    report.added_documents = new_documents.len();
    report.added_relationships = new_relationships.len();
    documents.extend(new_documents);
    relationships.extend(new_relationships);

    rebuild_entities(
        &mut entities,
        &documents,
        &request.reprocessed,
        request.system_summaries,
    );

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for doc in &documents {
        *counts.entry(doc.doc_type.clone()).or_default() += 1;
    }
    let systems: BTreeSet<&str> = documents.iter().filter_map(|d| d.owning_system()).collect();

    metadata.export_timestamp = Some(chrono::Utc::now().to_rfc3339());
    if request.run_id.is_some() {
        metadata.run_id = request.run_id;
    }
    if metadata.processing_method.is_empty() {
        metadata.processing_method = "infradoc".to_string();
    }
    metadata.total_documents = documents.len();
    metadata.total_relationships = relationships.len();
    metadata.total_systems = systems.len();
    metadata.document_counts = counts;

    tracing::info!(
        removed = report.removed_documents,
        preserved = report.preserved_documents,
        added = report.added_documents,
        relationships = relationships.len(),
        "merged run into store"
    );

    let merged = StoreData {
        metadata,
        documents,
        entities,
        relationships,
    };
    (merged, report)
}

fn rebuild_entities(
    entities: &mut BTreeMap<String, BTreeMap<String, Value>>,
    documents: &[EntityDocument],
    reprocessed: &BTreeSet<String>,
    mut summaries: BTreeMap<String, Value>,
) {
    let systems = entities.entry(category::SYSTEMS.to_string()).or_default();
    for system in reprocessed {
        let document_count = documents
            .iter()
            .filter(|d| d.owning_system() == Some(system.as_str()))
            .count();
        let mut summary = match summaries.remove(system) {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        summary.insert("document_count".to_string(), json!(document_count));
        systems.insert(system.clone(), Value::Object(summary));
    }

    let mut services = BTreeMap::new();
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    for doc in documents.iter().filter(|d| d.doc_type == kind::SERVICE) {
        let field = |key: &str| doc.metadata.get(key).cloned().unwrap_or(Value::Null);
        services.insert(
            doc.id.clone(),
            json!({
                "name": field("service_name"),
                "host": field("hosted_by"),
                "status": field("status"),
                "container_count": field("container_count"),
                "grouping_method": field("grouping_method"),
                "category": field("category"),
            }),
        );
        if let Some(cat) = doc.meta_str("category") {
            *categories.entry(cat.to_string()).or_default() += 1;
        }
    }

    entities.insert(category::SERVICES.to_string(), services);
    entities.insert(
        category::CATEGORIES.to_string(),
        categories
            .into_iter()
            .map(|(name, count)| (name, json!(count)))
            .collect(),
    );
}
