//! Collected configuration files.
//!
//! Only file-level facts are recorded (path, kind, size, owning service).
//! Parsing the contents of specific formats is left to downstream tools.

use std::path::Path;

use anyhow::{bail, Context, Result};
use infradoc_core::models::{entity_id, kind, EntityDocument, Relationship, OWNER_FIELD};
use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
use serde_json::Value;

use super::docker::{self, container_entity_id};
use super::{entries, number, str_at, BuildContext, BuildOutput, SectionBuilder};

pub const SECTION: &str = "config_files";

pub struct ConfigFilesBuilder;

impl SectionBuilder for ConfigFilesBuilder {
    fn section(&self) -> &str {
        SECTION
    }

    fn description(&self) -> &str {
        "Configuration files and the containers they configure"
    }

    fn build(&self, ctx: &BuildContext<'_>, data: &Value) -> Result<BuildOutput> {
        let Some(files) = entries(data, "files") else {
            bail!("'config_files' section has no 'files' array");
        };
        let containers = ctx
            .snapshot
            .section(docker::SECTION)
            .map(docker::container_names)
            .unwrap_or_default();

        let mut output = BuildOutput::default();
        for (i, file) in files.iter().enumerate() {
            let label = str_at(file, &["path"])
                .map(str::to_string)
                .unwrap_or_else(|| format!("files[{}]", i));
            output.isolate(ctx, SECTION, &label, || {
                config_file_document(ctx, file, &containers)
            });
        }
        Ok(output)
    }
}

/// Turn a file path into an id-safe token: `/etc/nginx/nginx.conf` →
/// `etc_nginx_nginx.conf`.
pub fn sanitize_path(path: &str) -> String {
    let mapped: String = path
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_matches('_').to_string()
}

/// Guess a file's kind from its name when the collector did not say.
pub fn infer_kind(path: &str) -> &'static str {
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let ext = Path::new(&file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    if file_name.starts_with("docker-compose") || file_name.starts_with("compose.") {
        "docker_compose"
    } else if file_name == "dockerfile" {
        "dockerfile"
    } else if file_name == ".env" || ext == "env" {
        "env"
    } else if path.contains("nginx") && ext == "conf" {
        "nginx"
    } else {
        match ext.as_str() {
            "yml" | "yaml" => "yaml",
            "json" => "json",
            "toml" => "toml",
            "ini" | "conf" | "cfg" => "ini",
            _ => "config",
        }
    }
}

fn config_file_document(
    ctx: &BuildContext<'_>,
    file: &Value,
    containers: &[String],
) -> Result<(EntityDocument, Vec<Relationship>)> {
    let path = str_at(file, &["path"]).context("config file has no path")?;
    let token = sanitize_path(path);
    if token.is_empty() {
        bail!("config file path '{}' has no usable characters", path);
    }
    let file_kind = str_at(file, &["kind"])
        .or_else(|| str_at(file, &["type"]))
        .unwrap_or_else(|| infer_kind(path));
    let size = number(file.get("size")).map(|s| s as u64);
    let service = str_at(file, &["service"]);
    let target = service.filter(|s| containers.iter().any(|c| c == s));

    let id = entity_id(kind::CONFIG_FILE, ctx.system, &token);
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    let mut parts = vec![format!(
        "Configuration file {} on {} ({}).",
        path, ctx.system, file_kind
    )];
    if let Some(size) = size {
        parts.push(format!("Size: {} bytes.", size));
    }
    if let Some(service) = service {
        parts.push(format!("Configures service '{}'.", service));
    }

    let mut doc = EntityDocument::new(
        &id,
        kind::CONFIG_FILE,
        format!("{} on {}", file_name, ctx.system),
        parts.join(" "),
    );
    doc.set_meta(OWNER_FIELD, ctx.system);
    doc.set_meta("hosted_by", ctx.system);
    doc.set_meta("file_path", path);
    doc.set_meta("file_name", file_name.as_str());
    doc.set_meta("file_kind", file_kind);
    if let Some(size) = size {
        doc.set_meta("size_bytes", size);
    }
    if let Some(service) = service {
        doc.set_meta("service", service);
    }
    doc.add_tags(["config", file_kind]);

    let me = EntityRef::new(&id, kind::CONFIG_FILE);
    let mut rels = create_bidirectional(me, ctx.host_ref(), RelationshipType::StoredOn, None);
    if let Some(container) = target {
        let container_id = container_entity_id(ctx.system, container);
        rels.extend(create_bidirectional(
            me,
            EntityRef::new(&container_id, kind::CONTAINER),
            RelationshipType::Configures,
            None,
        ));
    }
    Ok((doc, rels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::snapshot;
    use infradoc_core::cluster::ClusterRules;
    use serde_json::json;

    #[test]
    fn path_tokens_and_kinds() {
        assert_eq!(sanitize_path("/etc/nginx/nginx.conf"), "etc_nginx_nginx.conf");
        assert_eq!(sanitize_path("/opt/my stack/.env"), "opt_my_stack_.env");
        assert_eq!(infer_kind("/opt/stack/docker-compose.yml"), "docker_compose");
        assert_eq!(infer_kind("/etc/nginx/sites-enabled/app.conf"), "nginx");
        assert_eq!(infer_kind("/opt/stack/.env"), "env");
        assert_eq!(infer_kind("/srv/app/settings.toml"), "toml");
        assert_eq!(infer_kind("/srv/app/README"), "config");
    }

    #[test]
    fn links_to_host_and_named_container() {
        let snap = snapshot(
            "web01",
            json!({
                "docker": {"containers": [{"name": "nginx", "image": "nginx"}]},
                "config_files": {"files": [
                    {"path": "/etc/nginx/nginx.conf", "size": 2048, "service": "nginx"},
                    {"path": "/opt/app/compose.yaml", "service": "absent"},
                    {"size": 10}
                ]}
            }),
        );
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = ConfigFilesBuilder
            .build(&ctx, snap.section(SECTION).unwrap())
            .unwrap();

        assert_eq!(out.documents.len(), 2);
        assert_eq!(out.failures.len(), 1);
        let nginx = &out.documents[0];
        assert_eq!(nginx.id, "config_file_web01_etc_nginx_nginx.conf");
        assert_eq!(nginx.meta_str("file_kind"), Some("nginx"));
        assert!(out.relationships.iter().any(|r| r.rel_type == RelationshipType::Configures
            && r.target_id == "container_web01_nginx"));
        assert!(out.relationships.iter().any(|r| r.rel_type == RelationshipType::ConfiguredBy));

        let compose = &out.documents[1];
        assert_eq!(compose.meta_str("file_kind"), Some("docker_compose"));
        let compose_rels: Vec<_> = out
            .relationships
            .iter()
            .filter(|r| r.source_id == compose.id)
            .collect();
        assert_eq!(compose_rels.len(), 1);
        assert_eq!(compose_rels[0].rel_type, RelationshipType::StoredOn);
    }
}
