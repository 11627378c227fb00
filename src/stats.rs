//! Store statistics and health overview.
//!
//! Summarises what the store holds: document and relationship totals,
//! counts by type, and a per-system breakdown with the time each system
//! was last processed. Used by `infradoc stats`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use infradoc_core::models::{category, StoreData};
use infradoc_core::store::DocumentStore;
use serde::Serialize;

use crate::config::Config;
use crate::json_store::JsonFileStore;

/// Per-system breakdown.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SystemStats {
    pub system: String,
    pub documents: usize,
    pub processed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub relationships: usize,
    pub documents_by_type: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,
    pub systems: Vec<SystemStats>,
    pub unowned_documents: usize,
    pub last_run: Option<String>,
    pub export_timestamp: Option<String>,
}

pub fn compute_stats(data: &StoreData) -> StoreStats {
    let mut documents_by_type = BTreeMap::new();
    let mut per_system: BTreeMap<String, usize> = BTreeMap::new();
    let mut unowned = 0;
    for doc in &data.documents {
        *documents_by_type.entry(doc.doc_type.clone()).or_default() += 1;
        match doc.owning_system() {
            Some(system) => *per_system.entry(system.to_string()).or_default() += 1,
            None => unowned += 1,
        }
    }

    let mut relationships_by_type = BTreeMap::new();
    for rel in &data.relationships {
        *relationships_by_type
            .entry(rel.rel_type.as_str().to_string())
            .or_default() += 1;
    }

    let summaries = data.entities.get(category::SYSTEMS);
    let systems = per_system
        .into_iter()
        .map(|(system, documents)| SystemStats {
            processed_at: summaries
                .and_then(|s| s.get(&system))
                .and_then(|v| v.get("processed_at"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            system,
            documents,
        })
        .collect();

    StoreStats {
        documents: data.documents.len(),
        relationships: data.relationships.len(),
        documents_by_type,
        relationships_by_type,
        systems,
        unowned_documents: unowned,
        last_run: data.metadata.run_id.clone(),
        export_timestamp: data.metadata.export_timestamp.clone(),
    }
}

/// Run the stats command: load the store and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let path = &config.store.path;
    let data = JsonFileStore::new(path)
        .load()
        .with_context(|| format!("load store {}", path.display()))?;
    let stats = compute_stats(&data);
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("infradoc — Store Stats");
    println!("======================");
    println!();
    println!("  Store:          {}", path.display());
    println!("  Size:           {}", format_bytes(size));
    if let Some(ts) = &stats.export_timestamp {
        println!("  Updated:        {}", ts);
    }
    if let Some(run) = &stats.last_run {
        println!("  Last run:       {}", run);
    }
    println!();
    println!("  Documents:      {}", stats.documents);
    println!("  Relationships:  {}", stats.relationships);
    println!("  Systems:        {}", stats.systems.len());

    if !stats.documents_by_type.is_empty() {
        println!();
        println!("  By type:");
        for (doc_type, count) in &stats.documents_by_type {
            println!("    {:<20} {:>6}", doc_type, count);
        }
    }

    if !stats.relationships_by_type.is_empty() {
        println!();
        println!("  Relationships by type:");
        for (rel_type, count) in &stats.relationships_by_type {
            println!("    {:<24} {:>6}", rel_type, count);
        }
    }

    if !stats.systems.is_empty() {
        println!();
        println!("  By system:");
        println!("  {:<24} {:>6}   {}", "SYSTEM", "DOCS", "PROCESSED");
        println!("  {}", "-".repeat(60));
        for s in &stats.systems {
            println!(
                "  {:<24} {:>6}   {}",
                s.system,
                s.documents,
                s.processed_at.as_deref().unwrap_or("unknown")
            );
        }
    }
    if stats.unowned_documents > 0 {
        println!();
        println!("  Documents without an owning system: {}", stats.unowned_documents);
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infradoc_core::models::EntityDocument;
    use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
    use serde_json::json;

    #[test]
    fn counts_by_type_and_system() {
        let mut data = StoreData::empty();
        for (id, ty, system) in [
            ("server_a", "server", Some("a")),
            ("container_a_x", "container", Some("a")),
            ("server_b", "server", Some("b")),
            ("note", "note", None),
        ] {
            let mut doc = EntityDocument::new(id, ty, id, "");
            if let Some(s) = system {
                doc.set_meta("system_name", s);
            }
            data.documents.push(doc);
        }
        data.relationships = create_bidirectional(
            EntityRef::new("container_a_x", "container"),
            EntityRef::new("server_a", "server"),
            RelationshipType::HostedBy,
            None,
        );
        data.entity_category("systems")
            .insert("a".into(), json!({"processed_at": "2026-10-01T00:00:00Z"}));

        let stats = compute_stats(&data);
        assert_eq!(stats.documents, 4);
        assert_eq!(stats.documents_by_type["server"], 2);
        assert_eq!(stats.relationships_by_type["HOSTED_BY"], 1);
        assert_eq!(stats.relationships_by_type["HOSTS"], 1);
        assert_eq!(stats.unowned_documents, 1);
        assert_eq!(
            stats.systems[0],
            SystemStats {
                system: "a".into(),
                documents: 2,
                processed_at: Some("2026-10-01T00:00:00Z".into()),
            }
        );
        assert_eq!(stats.systems[1].processed_at, None);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
