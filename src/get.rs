//! Document retrieval by id.
//!
//! Fetches one document together with the relationships that touch it.
//! Used by `infradoc get`.

use anyhow::{bail, Context, Result};
use infradoc_core::models::{EntityDocument, Relationship, StoreData};
use infradoc_core::store::DocumentStore;
use serde::Serialize;

use crate::config::Config;
use crate::json_store::JsonFileStore;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub document: EntityDocument,
    /// Relationships with this document as source.
    pub outgoing: Vec<Relationship>,
    /// Relationships with this document as target.
    pub incoming: Vec<Relationship>,
}

/// Look `id` up in an already loaded store.
pub fn find_document(data: &StoreData, id: &str) -> Option<DocumentResponse> {
    let document = data.document(id)?.clone();
    let outgoing = data
        .relationships
        .iter()
        .filter(|r| r.source_id == id)
        .cloned()
        .collect();
    let incoming = data
        .relationships
        .iter()
        .filter(|r| r.target_id == id)
        .cloned()
        .collect();
    Some(DocumentResponse {
        document,
        outgoing,
        incoming,
    })
}

pub fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let path = &config.store.path;
    let data = JsonFileStore::new(path)
        .load()
        .with_context(|| format!("load store {}", path.display()))?;
    match find_document(&data, id) {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", id),
    }
}

/// CLI entry point: print the document as text, or JSON with `--json`.
pub fn run_get(config: &Config, id: &str, as_json: bool) -> Result<()> {
    let resp = get_document(config, id)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    let doc = &resp.document;
    println!("--- document ---");
    println!("id: {}", doc.id);
    println!("type: {}", doc.doc_type);
    println!("title: {}", doc.title);
    if let Some(system) = doc.owning_system() {
        println!("system: {}", system);
    }
    if !doc.tags.is_empty() {
        let tags: Vec<&str> = doc.tags.iter().collect();
        println!("tags: {}", tags.join(", "));
    }
    println!();
    println!("{}", doc.content);
    println!();
    println!("--- metadata ---");
    for (key, value) in &doc.metadata {
        println!("{}: {}", key, value);
    }
    if !resp.outgoing.is_empty() {
        println!();
        println!("--- outgoing ({}) ---", resp.outgoing.len());
        for r in &resp.outgoing {
            println!("{} -> {} ({})", r.rel_type, r.target_id, r.target_type);
        }
    }
    if !resp.incoming.is_empty() {
        println!();
        println!("--- incoming ({}) ---", resp.incoming.len());
        for r in &resp.incoming {
            println!("{} <- {} ({})", r.rel_type, r.source_id, r.source_type);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};

    #[test]
    fn splits_incoming_and_outgoing() {
        let mut data = StoreData::empty();
        data.documents.push(EntityDocument::new("container_h_a", "container", "a", ""));
        data.documents.push(EntityDocument::new("server_h", "server", "h", ""));
        data.relationships = create_bidirectional(
            EntityRef::new("container_h_a", "container"),
            EntityRef::new("server_h", "server"),
            RelationshipType::HostedBy,
            None,
        );

        let resp = find_document(&data, "container_h_a").unwrap();
        assert_eq!(resp.outgoing.len(), 1);
        assert_eq!(resp.outgoing[0].rel_type, RelationshipType::HostedBy);
        assert_eq!(resp.incoming.len(), 1);
        assert_eq!(resp.incoming[0].rel_type, RelationshipType::Hosts);
        assert!(find_document(&data, "nope").is_none());
    }
}
