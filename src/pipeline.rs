//! Processing pipeline orchestration.
//!
//! Coordinates one run: snapshots → classification → section builders →
//! tagging → service clustering → store merge. Everything up to the merge
//! works on in-memory collections owned by this module; the store is only
//! touched once, at the end.
//!
//! A snapshot that fails to load is skipped and its system is left out of
//! the reprocessed set, so the store keeps that system's previous data.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use infradoc_core::classify::Capabilities;
use infradoc_core::cluster::{ClusterOutput, ServiceClusterer};
use infradoc_core::merge::{MergeReport, MergeRequest};
use infradoc_core::models::{kind, ContainerRecord, EntityDocument, Metadata, Relationship};
use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
use infradoc_core::store::memory::InMemoryStore;
use infradoc_core::store::DocumentStore;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::builders::{BuildContext, BuilderRegistry};
use crate::config::Config;
use crate::json_store::JsonFileStore;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::snapshot::{load_all, Snapshot};
use crate::tagging::{create_tagger, enrich_documents, TagSummary};

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Restrict the run to these systems. Empty means all.
    pub systems: Vec<String>,
    pub dry_run: bool,
}

/// Per-system facts recorded in `entities.systems`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub system: String,
    pub host_id: String,
    pub host_kind: &'static str,
    pub capabilities: Capabilities,
    pub snapshot_path: PathBuf,
    pub snapshot_sha256: String,
    pub collected_at: Option<String>,
    pub documents: usize,
    pub failures: usize,
}

/// Everything one run produced, before merging.
#[derive(Debug, Default)]
pub struct RunOutput {
    pub systems: Vec<SystemInfo>,
    pub documents: Vec<EntityDocument>,
    pub relationships: Vec<Relationship>,
    pub build_failures: usize,
    pub services: ClusterOutput,
    pub dropped_relationships: usize,
}

impl RunOutput {
    pub fn reprocessed(&self) -> BTreeSet<String> {
        self.systems.iter().map(|s| s.system.clone()).collect()
    }

    pub fn services_by_method(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for group in &self.services.groups {
            *counts.entry(group.method.as_str().to_string()).or_default() += 1;
        }
        counts
    }
}

/// Outcome of `infradoc process`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dry_run: bool,
    pub systems: Vec<String>,
    pub failed_snapshots: Vec<(PathBuf, String)>,
    pub documents: usize,
    pub relationships: usize,
    pub build_failures: usize,
    pub dropped_relationships: usize,
    pub services_by_method: BTreeMap<String, usize>,
    pub tagged: Option<usize>,
    pub merge: Option<MergeReport>,
}

/// Classify and build every snapshot.
pub fn build_all(
    snapshots: &[Snapshot],
    config: &Config,
    registry: &BuilderRegistry,
    progress: &dyn ProgressReporter,
) -> RunOutput {
    let rules = config.clustering.rules();
    let mut run = RunOutput::default();
    let total = snapshots.len() as u64;

    for (i, snapshot) in snapshots.iter().enumerate() {
        progress.report(ProgressEvent::Building {
            system: snapshot.system_name.clone(),
            n: i as u64 + 1,
            total,
        });
        let capabilities = snapshot.capabilities();
        let ctx = BuildContext::new(snapshot, &capabilities, &rules);
        let output = registry.build_snapshot(&ctx);

        tracing::info!(
            system = %snapshot.system_name,
            os = %capabilities.os_type,
            virtualization = %capabilities.virtualization,
            documents = output.documents.len(),
            relationships = output.relationships.len(),
            failures = output.failures.len(),
            "system built"
        );

        run.systems.push(SystemInfo {
            system: snapshot.system_name.clone(),
            host_id: ctx.host_id.clone(),
            host_kind: ctx.host_kind,
            capabilities: capabilities.clone(),
            snapshot_path: snapshot.path.clone(),
            snapshot_sha256: snapshot.sha256.clone(),
            collected_at: snapshot.collected_at.clone(),
            documents: output.documents.len(),
            failures: output.failures.len(),
        });
        run.build_failures += output.failures.len();
        run.documents.extend(output.documents);
        run.relationships.extend(output.relationships);
    }

    run
}

/// Group every container of the run into services and link them up.
///
/// Writes `part_of_service` into each container document, appends the
/// service documents, and adds container PART_OF service and service
/// RUNS_ON host edges.
pub fn cluster_services(run: &mut RunOutput, config: &Config) {
    let clusterer = ServiceClusterer::new(
        config.clustering.rules(),
        config.clustering.allow_multi_host_services,
    );

    let container_docs: Vec<usize> = run
        .documents
        .iter()
        .enumerate()
        .filter(|(_, d)| d.doc_type == kind::CONTAINER)
        .map(|(i, _)| i)
        .collect();
    let records: Vec<ContainerRecord> = container_docs
        .iter()
        .map(|&i| ContainerRecord::from_document(&run.documents[i]))
        .collect();

    let output = clusterer.cluster(&records);

    for (&doc_idx, record) in container_docs.iter().zip(&output.containers) {
        if let Some(service) = &record.part_of_service {
            run.documents[doc_idx].set_meta("part_of_service", service.as_str());
        }
    }

    let hosts: HashMap<&str, EntityRef<'_>> = run
        .systems
        .iter()
        .map(|s| (s.system.as_str(), EntityRef::new(&s.host_id, s.host_kind)))
        .collect();

    let mut edges = Vec::new();
    for group in &output.groups {
        let service = EntityRef::new(&group.id, kind::SERVICE);
        let mut meta = Metadata::new();
        meta.insert("grouping_method".into(), json!(group.method.as_str()));
        for member in &group.members {
            edges.extend(create_bidirectional(
                EntityRef::new(member, kind::CONTAINER),
                service,
                RelationshipType::PartOf,
                Some(meta.clone()),
            ));
        }
        for host in &group.hosts {
            let Some(host_ref) = hosts.get(host.as_str()) else {
                tracing::debug!(service = %group.id, host = %host, "service host not in this run");
                continue;
            };
            edges.extend(create_bidirectional(
                service,
                *host_ref,
                RelationshipType::RunsOn,
                None,
            ));
        }
    }

    run.documents.extend(output.services.iter().cloned());
    run.relationships.extend(edges);
    run.services = output;
}

/// Drop relationships with an endpoint that no document of this run has.
///
/// Such edges point at entities that failed to build.
pub fn drop_dangling(run: &mut RunOutput) {
    let ids: HashSet<&str> = run.documents.iter().map(|d| d.id.as_str()).collect();
    let before = run.relationships.len();
    let mut kept = Vec::with_capacity(before);
    for rel in run.relationships.drain(..) {
        if ids.contains(rel.source_id.as_str()) && ids.contains(rel.target_id.as_str()) {
            kept.push(rel);
        } else {
            tracing::debug!(id = %rel.id, "dropping relationship with a missing endpoint");
        }
    }
    run.dropped_relationships = before - kept.len();
    run.relationships = kept;
}

fn system_summaries(run: &RunOutput) -> BTreeMap<String, serde_json::Value> {
    let processed_at = chrono::Utc::now().to_rfc3339();
    run.systems
        .iter()
        .map(|s| {
            let caps = &s.capabilities;
            (
                s.system.clone(),
                json!({
                    "host_id": s.host_id,
                    "os_type": caps.os_type.as_str(),
                    "virtualization": caps.virtualization.as_str(),
                    "capabilities": caps.features(),
                    "docker_compose_locations": caps.docker_compose_locations,
                    "snapshot_path": s.snapshot_path.display().to_string(),
                    "snapshot_sha256": s.snapshot_sha256,
                    "collected_at": s.collected_at,
                    "build_failures": s.failures,
                    "processed_at": processed_at,
                }),
            )
        })
        .collect()
}

/// Run the whole pipeline and merge into the store. With `dry_run` the
/// merge runs against an in-memory copy and the store file is not written.
pub async fn process(
    config: &Config,
    options: &ProcessOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4().to_string();
    tracing::info!(run_id = %run_id, dir = %config.snapshots.dir.display(), "starting run");

    let loaded = load_all(&config.snapshots, &options.systems)?;
    for wanted in &options.systems {
        if !loaded.snapshots.iter().any(|s| &s.system_name == wanted) {
            tracing::warn!(system = %wanted, "no snapshot found for requested system");
        }
    }

    let registry = BuilderRegistry::builtin();
    let mut run = build_all(&loaded.snapshots, config, &registry, progress);

    let mut tagged = None;
    if config.tagging.is_enabled() {
        let tagger = create_tagger(&config.tagging)?;
        let TagSummary {
            requested,
            tagged: ok,
            failed,
        } = enrich_documents(tagger, &mut run.documents, &config.tagging, progress).await;
        tracing::info!(requested, tagged = ok, failed, "tagging finished");
        tagged = Some(ok);
    }

    cluster_services(&mut run, config);
    drop_dangling(&mut run);

    let mut merge = None;
    if run.systems.is_empty() {
        tracing::warn!("no snapshots processed, store left untouched");
    } else {
        progress.report(ProgressEvent::Merging {
            documents: run.documents.len() as u64,
        });
        let file = JsonFileStore::new(&config.store.path);
        let request = MergeRequest {
            documents: run.documents.clone(),
            relationships: run.relationships.clone(),
            reprocessed: run.reprocessed(),
            system_summaries: system_summaries(&run),
            run_id: Some(run_id.clone()),
        };
        let context = || format!("merge: store {}", config.store.path.display());
        let (_, report) = if options.dry_run {
            // Merge against a copy so the report is real but nothing is written.
            let existing = file.load().with_context(context)?;
            InMemoryStore::with_data(existing).merge(request)
        } else {
            file.merge(request)
        }
        .with_context(context)?;
        tracing::info!(
            removed = report.removed_documents,
            added = report.added_documents,
            preserved = report.preserved_documents,
            dry_run = options.dry_run,
            "store merged"
        );
        merge = Some(report);
    }

    Ok(RunSummary {
        run_id,
        dry_run: options.dry_run,
        systems: run.systems.iter().map(|s| s.system.clone()).collect(),
        failed_snapshots: loaded.failed,
        documents: run.documents.len(),
        relationships: run.relationships.len(),
        build_failures: run.build_failures,
        dropped_relationships: run.dropped_relationships,
        services_by_method: run.services_by_method(),
        tagged,
        merge,
    })
}

/// `infradoc process`: run the pipeline and print a summary.
pub async fn run_process(
    config: &Config,
    options: &ProcessOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let summary = process(config, options, progress).await?;

    if summary.dry_run {
        println!("process (dry-run)");
    } else {
        println!("process {}", config.store.path.display());
    }
    println!("  systems: {}", summary.systems.join(", "));
    for (path, error) in &summary.failed_snapshots {
        println!("  skipped snapshot: {} ({})", path.display(), error);
    }
    println!("  documents: {}", summary.documents);
    println!("  relationships: {}", summary.relationships);
    let services: usize = summary.services_by_method.values().sum();
    println!("  services: {}", services);
    for (method, count) in &summary.services_by_method {
        println!("    {:<20} {}", method, count);
    }
    if summary.build_failures > 0 {
        println!("  entity failures: {}", summary.build_failures);
    }
    if summary.dropped_relationships > 0 {
        println!("  dropped relationships: {}", summary.dropped_relationships);
    }
    if let Some(tagged) = summary.tagged {
        println!("  tagged documents: {}", tagged);
    }
    if let Some(report) = &summary.merge {
        println!(
            "  store{}: {} removed, {} preserved, {} added",
            if summary.dry_run { " (not written)" } else { "" },
            report.removed_documents,
            report.preserved_documents,
            report.added_documents
        );
    }
    println!("  run: {}", summary.run_id);
    println!("ok");
    Ok(())
}
