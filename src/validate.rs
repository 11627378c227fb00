//! Relationship validation for a persisted store.
//!
//! Works on the raw JSON so that structural problems (missing fields,
//! wrong types) are reported rather than rejected by deserialization.
//!
//! | Check | Severity |
//! |-------|----------|
//! | Required fields present with the right JSON types | error |
//! | `metadata.created_at` present and RFC 3339 | error |
//! | Tabulated types have their inverse edge | error |
//! | Endpoints exist and their types match the documents | error |
//! | Unknown relationship type | warning |
//! | Id does not start with the source id | warning |
//! | Inverse pair with different `created_at` | warning |

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context, Result};
use infradoc_core::relationship::{RelationshipType, CREATED_AT};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;

const REQUIRED_FIELDS: &[&str] = &[
    "id",
    "type",
    "source_id",
    "source_type",
    "target_id",
    "target_type",
    "metadata",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub documents: usize,
    pub relationships: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate the relationships of a store given as raw JSON.
pub fn validate_store(store: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let documents: HashMap<&str, Option<&str>> = store
        .get("documents")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .filter_map(|d| Some((d.get("id")?.as_str()?, d.get("type").and_then(Value::as_str))))
                .collect()
        })
        .unwrap_or_default();
    report.documents = documents.len();

    let Some(relationships) = store.get("relationships").and_then(Value::as_array) else {
        report.errors.push("store has no 'relationships' array".to_string());
        return report;
    };
    report.relationships = relationships.len();

    let mut index: HashMap<(&str, &str, &str), &Value> = HashMap::new();
    for rel in relationships {
        if let (Some(s), Some(t), Some(ty)) = (
            rel.get("source_id").and_then(Value::as_str),
            rel.get("target_id").and_then(Value::as_str),
            rel.get("type").and_then(Value::as_str),
        ) {
            index.insert((s, t, ty), rel);
        }
    }

    for (i, rel) in relationships.iter().enumerate() {
        let label = rel
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("relationships[{}]", i));
        check_structure(rel, &label, &mut report);
        check_endpoints(rel, &label, &documents, &mut report);
    }
    check_inverses(relationships, &index, &mut report);

    report
}

fn check_structure(rel: &Value, label: &str, report: &mut ValidationReport) {
    for field in REQUIRED_FIELDS {
        match rel.get(*field) {
            None => report
                .errors
                .push(format!("{}: missing required field '{}'", label, field)),
            Some(v) if *field == "metadata" && !v.is_object() => report
                .errors
                .push(format!("{}: field 'metadata' must be an object", label)),
            Some(v) if *field != "metadata" && !v.is_string() => report
                .errors
                .push(format!("{}: field '{}' must be a string", label, field)),
            Some(_) => {}
        }
    }

    if let Some(ty) = rel.get("type").and_then(Value::as_str) {
        if matches!(RelationshipType::from(ty.to_string()), RelationshipType::Other(_)) {
            report
                .warnings
                .push(format!("{}: relationship type '{}' is not recognized", label, ty));
        }
    }

    if let Some(meta) = rel.get("metadata").and_then(Value::as_object) {
        match meta.get(CREATED_AT) {
            None => report
                .errors
                .push(format!("{}: metadata missing '{}'", label, CREATED_AT)),
            Some(Value::String(ts)) => {
                if chrono::DateTime::parse_from_rfc3339(ts).is_err() {
                    report.errors.push(format!(
                        "{}: metadata.{} is not an RFC 3339 timestamp",
                        label, CREATED_AT
                    ));
                }
            }
            Some(_) => report
                .errors
                .push(format!("{}: metadata.{} must be a string", label, CREATED_AT)),
        }
    }

    if let (Some(id), Some(source)) = (
        rel.get("id").and_then(Value::as_str),
        rel.get("source_id").and_then(Value::as_str),
    ) {
        if !id.starts_with(&format!("{}_", source)) {
            report
                .warnings
                .push(format!("{}: id does not start with source id '{}'", label, source));
        }
    }
}

fn check_endpoints(
    rel: &Value,
    label: &str,
    documents: &HashMap<&str, Option<&str>>,
    report: &mut ValidationReport,
) {
    for (end, id_key, type_key) in [
        ("source", "source_id", "source_type"),
        ("target", "target_id", "target_type"),
    ] {
        let Some(id) = rel.get(id_key).and_then(Value::as_str) else {
            continue;
        };
        match documents.get(id) {
            None => report
                .errors
                .push(format!("{}: {} '{}' does not exist in documents", label, end, id)),
            Some(doc_type) => {
                let declared = rel.get(type_key).and_then(Value::as_str);
                if declared.is_some() && declared != *doc_type {
                    report.errors.push(format!(
                        "{}: {} type mismatch, relationship says '{}', document is '{}'",
                        label,
                        end,
                        declared.unwrap_or_default(),
                        doc_type.unwrap_or("?")
                    ));
                }
            }
        }
    }
}

fn check_inverses(
    relationships: &[Value],
    index: &HashMap<(&str, &str, &str), &Value>,
    report: &mut ValidationReport,
) {
    let mut seen: HashSet<String> = HashSet::new();
    for rel in relationships {
        let (Some(source), Some(target), Some(ty)) = (
            rel.get("source_id").and_then(Value::as_str),
            rel.get("target_id").and_then(Value::as_str),
            rel.get("type").and_then(Value::as_str),
        ) else {
            continue;
        };
        let Some(reverse) = RelationshipType::from(ty.to_string()).inverse() else {
            continue;
        };
        if !seen.insert(format!("{}|{}|{}", source, target, ty)) {
            continue;
        }
        let label = rel.get("id").and_then(Value::as_str).unwrap_or("unknown");
        match index.get(&(target, source, reverse.as_str())) {
            None => report.errors.push(format!(
                "{}: missing inverse {} -{}-> {}",
                label, target, reverse, source
            )),
            Some(back) => {
                let created = |v: &Value| v.pointer("/metadata/created_at").cloned();
                if created(rel) != created(back) {
                    report.warnings.push(format!(
                        "{}: inverse pair has different created_at timestamps",
                        label
                    ));
                }
            }
        }
    }
}

/// `infradoc validate`: print the report; fails when there are errors.
pub fn run_validate(config: &Config, as_json: bool) -> Result<()> {
    let path = &config.store.path;
    let raw = std::fs::read(path).with_context(|| format!("load store {}", path.display()))?;
    let store: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("parse store {}", path.display()))?;
    let report = validate_store(&store);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("validate {}", path.display());
        println!("  documents: {}", report.documents);
        println!("  relationships: {}", report.relationships);
        println!("  errors: {}", report.errors.len());
        for e in &report.errors {
            println!("    ✗ {}", e);
        }
        println!("  warnings: {}", report.warnings.len());
        for w in &report.warnings {
            println!("    ! {}", w);
        }
    }

    if !report.is_valid() {
        bail!("store validation failed with {} error(s)", report.errors.len());
    }
    if !as_json {
        println!("ok");
    }
    Ok(())
}
