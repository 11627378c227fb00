//! Docker containers and networks.
//!
//! Accepts `{"containers": [...], "networks": [...]}` or a bare container
//! array. A container entry is either flat
//! (`name`, `image`, `status`, `labels`, `networks`, `ports`) or carries a
//! `docker inspect` object under `inspect` (or is one itself).
//!
//! Compose `depends_on` labels are resolved to container ids on the same
//! host through `(project, compose service)`, so resolution happens after
//! every container of the section has been parsed.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context, Result};
use infradoc_core::models::{entity_id, kind, EntityDocument, Metadata, Relationship, OWNER_FIELD};
use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
use serde_json::{json, Value};

use super::{entries, path, str_at, BuildContext, BuildOutput, SectionBuilder};

pub const SECTION: &str = "docker";

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
pub const COMPOSE_DEPENDS_ON_LABEL: &str = "com.docker.compose.depends_on";

const KNOWN_STATUSES: &[&str] = &[
    "running",
    "stopped",
    "paused",
    "restarting",
    "dead",
    "created",
    "exited",
];

/// Keyword table for inferring what a dependency provides. First match wins.
const DEPENDENCY_TYPES: &[(&str, &[&str])] = &[
    (
        "database",
        &["postgres", "postgresql", "mysql", "mariadb", "mongo", "database", "db"],
    ),
    ("cache", &["redis", "memcached", "cache"]),
    ("message_queue", &["rabbit", "kafka", "nats", "queue", "mq"]),
    ("search", &["elastic", "opensearch", "solr"]),
    ("storage", &["minio", "s3", "storage"]),
    ("proxy", &["nginx", "apache", "httpd", "proxy", "traefik"]),
];

pub struct DockerBuilder;

impl SectionBuilder for DockerBuilder {
    fn section(&self) -> &str {
        SECTION
    }

    fn description(&self) -> &str {
        "Docker containers, compose dependencies and networks"
    }

    fn build(&self, ctx: &BuildContext<'_>, data: &Value) -> Result<BuildOutput> {
        let Some(items) = entries(data, "containers") else {
            bail!("'docker' section has no 'containers' array");
        };

        let mut output = BuildOutput::default();
        let mut parsed = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let label = item_label(item, i);
            match ParsedContainer::parse(ctx.system, item) {
                Ok(c) => parsed.push(c),
                Err(e) => output.isolate(ctx, SECTION, &label, || Err(e)),
            }
        }

        let by_compose: HashMap<(String, String), String> = parsed
            .iter()
            .filter_map(|c| {
                let project = c.compose_project.as_ref()?.to_lowercase();
                let service = c.compose_service.clone()?;
                Some(((project, service), c.id.clone()))
            })
            .collect();

        let network_meta = network_details(data);
        let mut network_members: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

        for container in &parsed {
            for net in &container.networks {
                if !ctx.rules.is_default_network(net) {
                    network_members
                        .entry(net.clone())
                        .or_default()
                        .push((container.id.clone(), container.name.clone()));
                }
            }
            output.isolate(ctx, SECTION, &container.name, || {
                Ok(container_document(ctx, container, &by_compose))
            });
        }

        for (network, members) in &network_members {
            output.isolate(ctx, SECTION, network, || {
                Ok(network_document(ctx, network, members, network_meta.get(network)))
            });
        }

        Ok(output)
    }
}

fn item_label(item: &Value, index: usize) -> String {
    container_name(item).unwrap_or_else(|| format!("containers[{}]", index))
}

fn inspect_of(item: &Value) -> &Value {
    item.get("inspect").filter(|v| v.is_object()).unwrap_or(item)
}

fn container_name(item: &Value) -> Option<String> {
    str_at(item, &["name"])
        .or_else(|| str_at(inspect_of(item), &["Name"]))
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
}

/// Names of the containers in a docker section, in section order.
pub fn container_names(data: &Value) -> Vec<String> {
    entries(data, "containers")
        .map(|items| items.iter().filter_map(container_name).collect())
        .unwrap_or_default()
}

pub fn container_entity_id(system: &str, name: &str) -> String {
    entity_id(kind::CONTAINER, system, name)
}

/// An image reference split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Parse `registry/repo:tag`. The tag defaults to `latest`; the first
    /// path segment is a registry only if it looks like a host.
    pub fn parse(image: &str) -> Self {
        let image = image.split('@').next().unwrap_or(image);
        let (name, tag) = match image.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (image, "latest"),
        };
        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (Some(first.to_string()), rest)
            }
            _ => (None, name),
        };
        Self {
            registry,
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Last path segment of the repository, e.g. `nextcloud` for
    /// `linuxserver/nextcloud`.
    pub fn short_name(&self) -> &str {
        self.repository.rsplit('/').next().unwrap_or(&self.repository)
    }
}

/// One `depends_on` entry of a compose label: `service[:condition[:required]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeDependency {
    pub service: String,
    pub condition: String,
    pub required: bool,
}

pub fn parse_compose_depends_on(label: &str) -> Vec<ComposeDependency> {
    label
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.split(':');
            let service = parts.next()?.trim().to_string();
            if service.is_empty() {
                return None;
            }
            let condition = parts
                .next()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or("service_started")
                .to_string();
            let required = parts.next().map(|r| r.trim() != "false").unwrap_or(true);
            Some(ComposeDependency {
                service,
                condition,
                required,
            })
        })
        .collect()
}

/// Infer what a dependency provides from its service name.
pub fn dependency_type(service: &str) -> &'static str {
    let lower = service.to_lowercase();
    DEPENDENCY_TYPES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(name, _)| *name)
        .unwrap_or("service")
}

#[derive(Debug, Clone)]
struct ParsedContainer {
    id: String,
    name: String,
    docker_id: Option<String>,
    image: Option<String>,
    image_ref: Option<ImageRef>,
    status: String,
    restart_policy: String,
    labels: BTreeMap<String, String>,
    networks: Vec<String>,
    ports: Vec<String>,
    compose_project: Option<String>,
    compose_service: Option<String>,
    created: Option<String>,
}

impl ParsedContainer {
    fn parse(system: &str, item: &Value) -> Result<Self> {
        if !item.is_object() {
            bail!("container entry is not an object");
        }
        let name = container_name(item).context("container has no name")?;
        let inspect = inspect_of(item);

        let image = str_at(item, &["image"])
            .or_else(|| str_at(inspect, &["Config", "Image"]))
            .map(str::to_string);

        let labels: BTreeMap<String, String> = item
            .get("labels")
            .filter(|v| v.is_object())
            .or_else(|| path(inspect, &["Config", "Labels"]))
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let networks = match item.get("networks") {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => path(inspect, &["NetworkSettings", "Networks"])
                .and_then(Value::as_object)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default(),
        };

        let ports = match item.get("ports") {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => inspect_ports(inspect),
        };

        let compose_project = labels.get(COMPOSE_PROJECT_LABEL).cloned();
        let compose_service = labels.get(COMPOSE_SERVICE_LABEL).cloned();

        Ok(Self {
            id: container_entity_id(system, &name),
            docker_id: str_at(item, &["id"])
                .or_else(|| str_at(inspect, &["Id"]))
                .map(str::to_string),
            image_ref: image.as_deref().map(ImageRef::parse),
            image,
            status: container_status(item, inspect),
            restart_policy: str_at(item, &["restart_policy"])
                .or_else(|| str_at(inspect, &["HostConfig", "RestartPolicy", "Name"]))
                .unwrap_or("no")
                .to_string(),
            labels,
            networks,
            ports,
            compose_project,
            compose_service,
            created: str_at(item, &["created"])
                .or_else(|| str_at(inspect, &["Created"]))
                .map(str::to_string),
            name,
        })
    }
}

fn container_status(item: &Value, inspect: &Value) -> String {
    let declared = str_at(item, &["status"])
        .or_else(|| str_at(inspect, &["State", "Status"]))
        .map(str::to_lowercase);
    if let Some(status) = declared.filter(|s| KNOWN_STATUSES.contains(&s.as_str())) {
        return status;
    }
    let running = path(inspect, &["State", "Running"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status = if running { "running" } else { "stopped" };
    status.to_string()
}

/// `NetworkSettings.Ports` → `["8080:80/tcp", "443/tcp"]`.
fn inspect_ports(inspect: &Value) -> Vec<String> {
    let Some(map) = path(inspect, &["NetworkSettings", "Ports"]).and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut ports = Vec::new();
    for (container_port, bindings) in map {
        let host_ports: Vec<&str> = bindings
            .as_array()
            .map(|b| b.iter().filter_map(|x| str_at(x, &["HostPort"])).collect())
            .unwrap_or_default();
        if host_ports.is_empty() {
            ports.push(container_port.clone());
        }
        for host_port in host_ports {
            let mapping = format!("{}:{}", host_port, container_port);
            if !ports.contains(&mapping) {
                ports.push(mapping);
            }
        }
    }
    ports
}

/// Optional `networks` list of the section: `[{name, driver, subnet}]`.
fn network_details(data: &Value) -> HashMap<String, Value> {
    data.get("networks")
        .and_then(Value::as_array)
        .map(|nets| {
            nets.iter()
                .filter_map(|n| Some((str_at(n, &["name"])?.to_string(), n.clone())))
                .collect()
        })
        .unwrap_or_default()
}

fn container_document(
    ctx: &BuildContext<'_>,
    c: &ParsedContainer,
    by_compose: &HashMap<(String, String), String>,
) -> (EntityDocument, Vec<Relationship>) {
    let me = EntityRef::new(&c.id, kind::CONTAINER);
    let mut rels = create_bidirectional(me, ctx.host_ref(), RelationshipType::HostedBy, None);

    let mut depends_on = Vec::new();
    if let (Some(project), Some(label)) = (&c.compose_project, c.labels.get(COMPOSE_DEPENDS_ON_LABEL)) {
        for dep in parse_compose_depends_on(label) {
            let key = (project.to_lowercase(), dep.service.clone());
            let Some(target) = by_compose.get(&key).filter(|t| **t != c.id) else {
                tracing::debug!(
                    system = %ctx.system,
                    container = %c.name,
                    dependency = %dep.service,
                    "compose dependency not found on this host"
                );
                continue;
            };
            let mut meta = Metadata::new();
            meta.insert("dependency_type".into(), json!(dependency_type(&dep.service)));
            meta.insert(
                "required_for_startup".into(),
                json!(dep.condition == "service_started"),
            );
            meta.insert("from_compose".into(), json!(true));
            meta.insert("condition".into(), json!(dep.condition));
            meta.insert("required".into(), json!(dep.required));
            rels.extend(create_bidirectional(
                me,
                EntityRef::new(target, kind::CONTAINER),
                RelationshipType::DependsOn,
                Some(meta),
            ));
            if !depends_on.contains(target) {
                depends_on.push(target.clone());
            }
        }
    }

    for net in c.networks.iter().filter(|n| !ctx.rules.is_default_network(n)) {
        let net_id = entity_id(kind::NETWORK, ctx.system, net);
        rels.extend(create_bidirectional(
            me,
            EntityRef::new(&net_id, kind::NETWORK),
            RelationshipType::ConnectsTo,
            None,
        ));
    }

    let mut parts = vec![format!(
        "Docker container '{}' running on {}.",
        c.name, ctx.system
    )];
    if let Some(image) = &c.image {
        parts.push(format!("Image: {}.", image));
    }
    parts.push(format!("Current state: {}.", c.status));
    if c.restart_policy != "no" {
        parts.push(format!("Restart policy: {}.", c.restart_policy));
    }
    if !c.networks.is_empty() {
        parts.push(format!("Connected to networks: {}.", c.networks.join(", ")));
    }
    if !c.ports.is_empty() {
        parts.push(format!("Exposed ports: {}.", c.ports.join(", ")));
    }
    if let (Some(project), Some(service)) = (&c.compose_project, &c.compose_service) {
        parts.push(format!(
            "Part of Docker Compose project '{}' as service '{}'.",
            project, service
        ));
    }

    let mut doc = EntityDocument::new(
        &c.id,
        kind::CONTAINER,
        format!("{} container on {}", c.name, ctx.system),
        parts.join(" "),
    );
    doc.set_meta(OWNER_FIELD, ctx.system);
    doc.set_meta("hosted_by", ctx.system);
    doc.set_meta("container_name", c.name.as_str());
    doc.set_meta("status", c.status.as_str());
    doc.set_meta("restart_policy", c.restart_policy.as_str());
    doc.set_meta("networks", json!(c.networks));
    doc.set_meta("ports", json!(c.ports));
    doc.set_meta("labels", json!(c.labels));
    doc.set_meta("depends_on", json!(depends_on));
    if let Some(image) = &c.image {
        doc.set_meta("image", image.as_str());
    }
    if let Some(image_ref) = &c.image_ref {
        doc.set_meta("image_repository", image_ref.repository.as_str());
        doc.set_meta("image_tag", image_ref.tag.as_str());
        if let Some(registry) = &image_ref.registry {
            doc.set_meta("image_registry", registry.as_str());
        }
        doc.add_tags([image_ref.short_name().to_lowercase()]);
    }
    for (key, value) in [
        ("docker_id", &c.docker_id),
        ("compose_project", &c.compose_project),
        ("compose_service", &c.compose_service),
        ("created", &c.created),
    ] {
        if let Some(v) = value {
            doc.set_meta(key, v.as_str());
        }
    }

    doc.add_tags(["container", "docker", c.status.as_str()]);
    if c.compose_project.is_some() {
        doc.add_tags(["compose"]);
    }
    (doc, rels)
}

fn network_document(
    ctx: &BuildContext<'_>,
    network: &str,
    members: &[(String, String)],
    details: Option<&Value>,
) -> (EntityDocument, Vec<Relationship>) {
    let id = entity_id(kind::NETWORK, ctx.system, network);
    let names: Vec<&str> = members.iter().map(|(_, name)| name.as_str()).collect();
    let driver = details.and_then(|d| str_at(d, &["driver"]));
    let subnet = details.and_then(|d| {
        str_at(d, &["subnet"]).or_else(|| {
            path(d, &["IPAM", "Config"])
                .and_then(Value::as_array)
                .and_then(|cfg| cfg.iter().find_map(|c| str_at(c, &["Subnet"])))
        })
    });

    let mut parts = vec![format!("Docker network '{}' on {}.", network, ctx.system)];
    if let Some(driver) = driver {
        parts.push(format!("Driver: {}.", driver));
    }
    if let Some(subnet) = subnet {
        parts.push(format!("Subnet: {}.", subnet));
    }
    parts.push(format!(
        "Connects {} container(s): {}.",
        names.len(),
        names.join(", ")
    ));

    let mut doc = EntityDocument::new(
        &id,
        kind::NETWORK,
        format!("{} network on {}", network, ctx.system),
        parts.join(" "),
    );
    doc.set_meta(OWNER_FIELD, ctx.system);
    doc.set_meta("hosted_by", ctx.system);
    doc.set_meta("network_name", network);
    doc.set_meta("container_count", names.len());
    doc.set_meta("containers", json!(names));
    if let Some(driver) = driver {
        doc.set_meta("driver", driver);
    }
    if let Some(subnet) = subnet {
        doc.set_meta("subnet", subnet);
    }
    doc.add_tags(["network", "docker"]);

    let rels = create_bidirectional(
        EntityRef::new(&id, kind::NETWORK),
        ctx.host_ref(),
        RelationshipType::HostedBy,
        None,
    );
    (doc, rels)
}
