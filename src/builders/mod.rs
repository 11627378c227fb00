//! Section builders: one snapshot section in, entity documents and
//! relationships out.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              BuilderRegistry             │
//! │  ┌────────┐ ┌────────┐ ┌──────────────┐  │
//! │  │hardware│ │ docker │ │   proxmox    │  │
//! │  └────────┘ └────────┘ │ config_files │  │
//! │                        └──────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!       build_snapshot() → BuildOutput
//! ```
//!
//! The host document is always built first; every section builder then
//! attaches its entities to that host. Each entity is built in isolation:
//! one malformed container or VM is logged, recorded in
//! [`BuildOutput::failures`] and skipped, and its siblings carry on.

pub mod config_files;
pub mod docker;
pub mod hardware;
pub mod host;
pub mod proxmox;

use anyhow::Result;
use infradoc_core::classify::Capabilities;
use infradoc_core::cluster::ClusterRules;
use infradoc_core::models::{kind, system_entity_id, EntityDocument, Relationship};
use infradoc_core::relationship::EntityRef;
use serde_json::Value;

use crate::snapshot::{Snapshot, CAPABILITIES_SECTION, PROBES_SECTION};

/// Sections consumed by the host builder or the classifier rather than a
/// [`SectionBuilder`].
const HOST_SECTIONS: &[&str] = &[PROBES_SECTION, CAPABILITIES_SECTION, host::OVERVIEW_SECTION];

/// Everything a builder knows about the system it is building for.
pub struct BuildContext<'a> {
    pub system: &'a str,
    pub capabilities: &'a Capabilities,
    pub rules: &'a ClusterRules,
    pub snapshot: &'a Snapshot,
    pub host_id: String,
    pub host_kind: &'static str,
}

impl<'a> BuildContext<'a> {
    pub fn new(snapshot: &'a Snapshot, capabilities: &'a Capabilities, rules: &'a ClusterRules) -> Self {
        let host_kind = if capabilities.is_physical() {
            kind::SERVER
        } else {
            kind::VIRTUAL_SERVER
        };
        Self {
            system: &snapshot.system_name,
            capabilities,
            rules,
            snapshot,
            host_id: system_entity_id(host_kind, &snapshot.system_name),
            host_kind,
        }
    }

    pub fn host_ref(&self) -> EntityRef<'_> {
        EntityRef::new(&self.host_id, self.host_kind)
    }
}

/// An entity that could not be built.
#[derive(Debug, Clone)]
pub struct BuildFailure {
    pub section: String,
    pub entity: String,
    pub error: String,
}

/// Documents and relationships produced for one system.
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub documents: Vec<EntityDocument>,
    pub relationships: Vec<Relationship>,
    pub failures: Vec<BuildFailure>,
}

impl BuildOutput {
    /// Build one entity; on error, log and record the failure instead.
    pub fn isolate<F>(&mut self, ctx: &BuildContext<'_>, section: &str, entity: &str, build: F)
    where
        F: FnOnce() -> Result<(EntityDocument, Vec<Relationship>)>,
    {
        match build() {
            Ok((doc, rels)) => {
                self.documents.push(doc);
                self.relationships.extend(rels);
            }
            Err(e) => {
                tracing::warn!(
                    system = %ctx.system,
                    section = section,
                    entity = entity,
                    error = %format!("{:#}", e),
                    "failed to build entity, skipping"
                );
                self.failures.push(BuildFailure {
                    section: section.to_string(),
                    entity: entity.to_string(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    pub fn extend(&mut self, other: BuildOutput) {
        self.documents.extend(other.documents);
        self.relationships.extend(other.relationships);
        self.failures.extend(other.failures);
    }
}

/// Builds the entities for one snapshot section.
///
/// Implementations must not fail the whole section because one entity is
/// malformed: use [`BuildOutput::isolate`] per entity. Returning `Err`
/// means the section as a whole was unusable (e.g. wrong JSON shape).
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use infradoc::builders::{BuildContext, BuildOutput, SectionBuilder};
/// use serde_json::Value;
///
/// pub struct UpsBuilder;
///
/// impl SectionBuilder for UpsBuilder {
///     fn section(&self) -> &str { "ups" }
///     fn description(&self) -> &str { "Battery backup units" }
///
///     fn build(&self, _ctx: &BuildContext<'_>, _data: &Value) -> Result<BuildOutput> {
///         Ok(BuildOutput::default())
///     }
/// }
/// ```
pub trait SectionBuilder: Send + Sync {
    /// Snapshot section this builder consumes.
    fn section(&self) -> &str;

    /// One-line description shown by `infradoc sources`.
    fn description(&self) -> &str;

    fn build(&self, ctx: &BuildContext<'_>, data: &Value) -> Result<BuildOutput>;
}

/// Section builders in registration order.
pub struct BuilderRegistry {
    builders: Vec<Box<dyn SectionBuilder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self {
            builders: Vec::new(),
        }
    }

    /// The built-in builders. `docker` runs before `config_files` so that
    /// config files can point at containers.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(hardware::HardwareBuilder::physical()));
        registry.register(Box::new(hardware::HardwareBuilder::allocation()));
        registry.register(Box::new(docker::DockerBuilder));
        registry.register(Box::new(proxmox::ProxmoxBuilder));
        registry.register(Box::new(config_files::ConfigFilesBuilder));
        registry
    }

    /// Register a builder. A later builder for the same section replaces
    /// the earlier one.
    pub fn register(&mut self, builder: Box<dyn SectionBuilder>) {
        self.builders.retain(|b| b.section() != builder.section());
        self.builders.push(builder);
    }

    pub fn get(&self, section: &str) -> Option<&dyn SectionBuilder> {
        self.builders
            .iter()
            .find(|b| b.section() == section)
            .map(|b| b.as_ref())
    }

    pub fn list(&self) -> impl Iterator<Item = &dyn SectionBuilder> {
        self.builders.iter().map(|b| b.as_ref())
    }

    /// Build every document for one snapshot.
    ///
    /// The host document is always produced. A section whose builder
    /// returns `Err` is logged and recorded as a failure; the remaining
    /// sections still run.
    pub fn build_snapshot(&self, ctx: &BuildContext<'_>) -> BuildOutput {
        let mut output = BuildOutput::default();
        output.isolate(ctx, "host", &ctx.host_id, || Ok((host::build_host(ctx), Vec::new())));

        for builder in &self.builders {
            let Some(data) = ctx.snapshot.section(builder.section()) else {
                continue;
            };
            match builder.build(ctx, data) {
                Ok(section_output) => {
                    tracing::debug!(
                        system = %ctx.system,
                        section = builder.section(),
                        documents = section_output.documents.len(),
                        relationships = section_output.relationships.len(),
                        "section built"
                    );
                    output.extend(section_output);
                }
                Err(e) => {
                    tracing::warn!(
                        system = %ctx.system,
                        section = builder.section(),
                        error = %format!("{:#}", e),
                        "section skipped"
                    );
                    output.failures.push(BuildFailure {
                        section: builder.section().to_string(),
                        entity: "*".to_string(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        for name in ctx.snapshot.sections.keys() {
            if self.get(name).is_none() && !HOST_SECTIONS.contains(&name.as_str()) {
                tracing::debug!(system = %ctx.system, section = %name, "no builder for section, ignoring");
            }
        }

        output
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Read `value[a][b]...`, treating a missing key at any depth as absent.
pub(crate) fn path<'v>(value: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    keys.iter().try_fold(value, |v, k| v.get(*k))
}

pub(crate) fn str_at<'v>(value: &'v Value, keys: &[&str]) -> Option<&'v str> {
    path(value, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Number that may be encoded as a JSON number or a numeric string.
pub(crate) fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Entries of a section that is either a bare array or `{key: [...]}`.
pub(crate) fn entries<'v>(data: &'v Value, key: &str) -> Option<&'v Vec<Value>> {
    match data {
        Value::Array(items) => Some(items),
        other => other.get(key).and_then(Value::as_array),
    }
}

/// `12.0` → `"12"`, `1.5` → `"1.5"`.
pub(crate) fn format_amount(value: f64) -> String {
    if (value - value.round()).abs() < 0.05 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.1}", value)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use serde_json::Value;

    use crate::snapshot::Snapshot;

    pub fn snapshot(system: &str, sections: Value) -> Snapshot {
        let raw = serde_json::to_vec(&serde_json::json!({
            "system_name": system,
            "sections": sections,
        }))
        .unwrap();
        Snapshot::from_slice(Path::new("test_unified.json"), &raw).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::snapshot;
    use super::*;
    use infradoc_core::classify::Virtualization;
    use serde_json::json;

    #[test]
    fn host_is_always_built() {
        let snap = snapshot("bare", json!({}));
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = BuilderRegistry::builtin().build_snapshot(&ctx);
        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.documents[0].id, "server_bare");
        assert!(out.failures.is_empty());
    }

    #[test]
    fn virtual_hosts_get_virtual_server_ids() {
        let snap = snapshot("vm1", json!({}));
        let caps = Capabilities {
            virtualization: Virtualization::Vm,
            ..Capabilities::default()
        };
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        assert_eq!(ctx.host_id, "virtual_server_vm1");
        assert_eq!(ctx.host_kind, "virtual_server");
    }

    #[test]
    fn malformed_section_is_recorded_not_fatal() {
        let snap = snapshot(
            "h1",
            json!({
                "proxmox": "not an object",
                "docker": {"containers": [{"name": "web", "image": "nginx:1.25", "status": "running"}]},
                "mystery": {"x": 1}
            }),
        );
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = BuilderRegistry::builtin().build_snapshot(&ctx);

        assert!(out.documents.iter().any(|d| d.id == "container_h1_web"));
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].section, "proxmox");
    }

    #[test]
    fn register_replaces_same_section() {
        struct Quiet;
        impl SectionBuilder for Quiet {
            fn section(&self) -> &str {
                "docker"
            }
            fn description(&self) -> &str {
                "quiet"
            }
            fn build(&self, _: &BuildContext<'_>, _: &Value) -> Result<BuildOutput> {
                Ok(BuildOutput::default())
            }
        }

        let mut registry = BuilderRegistry::builtin();
        let before = registry.list().count();
        registry.register(Box::new(Quiet));
        assert_eq!(registry.list().count(), before);
        assert_eq!(registry.get("docker").map(|b| b.description()), Some("quiet"));
    }

    #[test]
    fn value_helpers() {
        let v = json!({"a": {"b": " x "}, "n": "4", "m": 2.5});
        assert_eq!(str_at(&v, &["a", "b"]), Some("x"));
        assert_eq!(str_at(&v, &["a", "c"]), None);
        assert_eq!(number(v.get("n")), Some(4.0));
        assert_eq!(number(v.get("m")), Some(2.5));
        assert_eq!(format_amount(16.0), "16");
        assert_eq!(format_amount(0.5), "0.5");
    }
}
