//! Service clustering: partition container records into logical services.
//!
//! [`ServiceClusterer::cluster`] assigns every input container to exactly one
//! service. Five heuristic passes run in a fixed order over a shrinking
//! [`Ungrouped`] set; a container claimed by an earlier pass is never seen
//! again by a later one.
//!
//! # Algorithm
//!
//! 1. **Explicit label**: the first non-empty value among
//!    [`ClusterRules::label_keys`] names the service. Singletons allowed.
//! 2. **Name prefix**: role suffix and trailing number are stripped from the
//!    lower-cased container name. Groups need ≥2 members.
//! 3. **Dependency cluster**: forward `depends_on` edges restricted to
//!    ungrouped containers, explored breadth-first from each unvisited
//!    container in input order. Groups need ≥2 members.
//! 4. **Compose project**: the compose project label. Singletons allowed.
//! 5. **Shared network**: containers on the same non-default network.
//!    Groups need ≥2 members.
//! 6. **Standalone**: every remaining container gets its own service.
//!
//! Iteration follows input order everywhere, so identical input always
//! yields the same partition and the same service ids.
//!
//! # Example
//!
//! ```rust
//! use infradoc_core::cluster::{GroupingMethod, ServiceClusterer};
//! use infradoc_core::models::ContainerRecord;
//!
//! let record = |id: &str, name: &str| ContainerRecord {
//!     id: id.to_string(),
//!     container_name: Some(name.to_string()),
//!     hosted_by: Some("h1".to_string()),
//!     ..ContainerRecord::default()
//! };
//! let out = ServiceClusterer::default()
//!     .cluster(&[record("c1", "nextcloud"), record("c2", "nextcloud-db")]);
//! assert_eq!(out.groups.len(), 1);
//! assert_eq!(out.groups[0].method, GroupingMethod::NamePrefix);
//! assert_eq!(out.groups[0].id, "service_h1_nextcloud");
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{kind, ContainerRecord, EntityDocument, OWNER_FIELD};

/// Scope qualifier used in ids of services spanning several hosts.
pub const GLOBAL_SCOPE: &str = "global";

const UNKNOWN_HOST: &str = "unknown";
const DEFAULT_CATEGORY: &str = "application";

/// A named service category and the keywords that select it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCategory {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Heuristic tables consulted by the clustering passes.
///
/// Ordering matters: label keys are tried first to last, and categories are
/// scanned in order with the first keyword hit winning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRules {
    pub label_keys: Vec<String>,
    pub compose_project_label: String,
    pub role_suffixes: Vec<String>,
    pub default_networks: Vec<String>,
    pub network_suffixes: Vec<String>,
    pub categories: Vec<ServiceCategory>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClusterRules {
    fn default() -> Self {
        let categories: &[(&str, &[&str])] = &[
            ("monitoring", &["prometheus", "grafana", "influx", "telegraf", "loki"]),
            ("database", &["postgres", "mysql", "mariadb", "mongo", "redis"]),
            ("web_server", &["nginx", "apache", "caddy", "traefik"]),
            ("home_automation", &["home-assistant", "homeassistant", "zigbee", "zwave"]),
            ("file_sharing", &["nextcloud", "seafile", "syncthing"]),
            ("media", &["plex", "jellyfin", "emby", "sonarr", "radarr"]),
            ("development", &["gitea", "gitlab", "jenkins", "drone"]),
            ("security", &["fail2ban", "authelia", "authentik"]),
            ("infrastructure", &["portainer", "watchtower", "registry"]),
        ];

        Self {
            label_keys: strings(&[
                "com.docker.service",
                "app",
                "service",
                "app.kubernetes.io/name",
            ]),
            compose_project_label: "com.docker.compose.project".to_string(),
            role_suffixes: strings(&[
                "db", "database", "redis", "cache", "web", "app", "worker", "cron", "nginx",
                "proxy", "api",
            ]),
            default_networks: strings(&["bridge", "host", "none", "default"]),
            network_suffixes: strings(&["_network", "-network"]),
            categories: categories
                .iter()
                .map(|(name, keywords)| ServiceCategory {
                    name: name.to_string(),
                    keywords: strings(keywords),
                })
                .collect(),
        }
    }
}

impl ClusterRules {
    /// Derive the service prefix of a container name.
    ///
    /// Lower-cases the name, strips one trailing `-role`/`_role` token, then
    /// one trailing `-N`/`_N` numeric token. Returns `None` when nothing
    /// usable is left.
    ///
    /// ```rust
    /// use infradoc_core::cluster::ClusterRules;
    ///
    /// let rules = ClusterRules::default();
    /// assert_eq!(rules.name_prefix("Nextcloud_Redis").as_deref(), Some("nextcloud"));
    /// assert_eq!(rules.name_prefix("plex-server-1").as_deref(), Some("plex-server"));
    /// assert_eq!(rules.name_prefix("redis").as_deref(), Some("redis"));
    /// ```
    pub fn name_prefix(&self, name: &str) -> Option<String> {
        let lowered = name.trim().to_lowercase();
        let mut prefix = lowered.as_str();

        if let Some((head, tail)) = split_last_token(prefix) {
            if self.role_suffixes.iter().any(|s| s == tail) {
                prefix = head;
            }
        }
        if let Some((head, tail)) = split_last_token(prefix) {
            if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
                prefix = head;
            }
        }

        let prefix = prefix.trim_matches(|c: char| c == '-' || c == '_');
        (!prefix.is_empty()).then(|| prefix.to_string())
    }

    /// Service name derived from a network name.
    ///
    /// Strips configured network suffixes, then applies [`name_prefix`](Self::name_prefix).
    /// Falls back to the lower-cased network name.
    pub fn network_service_name(&self, network: &str) -> String {
        let mut name = network.to_string();
        for suffix in &self.network_suffixes {
            name = name.replace(suffix.as_str(), "");
        }
        self.name_prefix(&name)
            .unwrap_or_else(|| network.trim().to_lowercase())
    }

    pub fn is_default_network(&self, network: &str) -> bool {
        self.default_networks.iter().any(|n| n == network)
    }

    /// First category with a keyword contained in the service name.
    pub fn category_for(&self, service_name: &str) -> &str {
        let lowered = service_name.to_lowercase();
        self.categories
            .iter()
            .find(|c| c.keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map(|c| c.name.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    fn service_label<'a>(&self, record: &'a ContainerRecord) -> Option<(&'a str, &'a str)> {
        self.label_keys.iter().find_map(|key| {
            record
                .labels
                .get_key_value(key.as_str())
                .map(|(k, v)| (k.as_str(), v.trim()))
                .filter(|(_, v)| !v.is_empty())
        })
    }
}

fn split_last_token(name: &str) -> Option<(&str, &str)> {
    let pos = name.rfind(['-', '_'])?;
    Some((&name[..pos], &name[pos + 1..]))
}

/// Which pass created a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMethod {
    ExplicitLabel,
    NamePrefix,
    DependencyCluster,
    ComposeProject,
    SharedNetwork,
    Standalone,
}

impl GroupingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitLabel => "explicit_label",
            Self::NamePrefix => "name_prefix",
            Self::DependencyCluster => "dependency_cluster",
            Self::ComposeProject => "compose_project",
            Self::SharedNetwork => "shared_network",
            Self::Standalone => "standalone",
        }
    }

    /// Whether a group of one is acceptable for this method.
    pub fn allows_singleton(self) -> bool {
        matches!(
            self,
            Self::ExplicitLabel | Self::ComposeProject | Self::Standalone
        )
    }
}

impl fmt::Display for GroupingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated run state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    PartiallyRunning,
}

impl ServiceStatus {
    pub fn aggregate<'a>(members: impl IntoIterator<Item = &'a ContainerRecord>) -> Self {
        let (mut running, mut total) = (0usize, 0usize);
        for m in members {
            total += 1;
            if m.is_running() {
                running += 1;
            }
        }
        match running {
            0 => Self::Stopped,
            n if n == total => Self::Running,
            _ => Self::PartiallyRunning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::PartiallyRunning => "partially_running",
        }
    }
}

/// The set of container positions not yet claimed by any pass.
///
/// Passes take the set by value and hand back what is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ungrouped(BTreeSet<usize>);

impl Ungrouped {
    pub fn all(len: usize) -> Self {
        Self((0..len).collect())
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.0.contains(&idx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positions in input order.
    pub fn indices(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    fn claim(&mut self, members: &[usize]) {
        for m in members {
            self.0.remove(m);
        }
    }
}

/// One materialized service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceGroup {
    pub id: String,
    pub name: String,
    pub method: GroupingMethod,
    pub details: String,
    /// Member container ids, in input order.
    pub members: Vec<String>,
    /// Distinct member hosts, primary member's host first.
    pub hosts: Vec<String>,
    pub primary: String,
    pub status: ServiceStatus,
    pub category: String,
}

impl ServiceGroup {
    /// Host the service is attributed to: the primary member's host.
    pub fn host(&self) -> &str {
        self.hosts.first().map(String::as_str).unwrap_or(UNKNOWN_HOST)
    }
}

/// Result of one clustering run.
#[derive(Debug, Clone, Default)]
pub struct ClusterOutput {
    /// Input records, in input order, with `part_of_service` set.
    pub containers: Vec<ContainerRecord>,
    /// One service document per group, in creation order.
    pub services: Vec<EntityDocument>,
    pub groups: Vec<ServiceGroup>,
}

impl ClusterOutput {
    /// Service id assigned to a container id.
    pub fn service_of(&self, container_id: &str) -> Option<&str> {
        self.containers
            .iter()
            .find(|c| c.id == container_id)
            .and_then(|c| c.part_of_service.as_deref())
    }
}

/// Insertion-ordered buckets.
struct Buckets<K> {
    order: Vec<(K, Vec<usize>)>,
    index: HashMap<K, usize>,
}

impl<K: Clone + Eq + Hash> Buckets<K> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, key: K, idx: usize) {
        match self.index.get(&key) {
            Some(&slot) => self.order[slot].1.push(idx),
            None => {
                self.index.insert(key.clone(), self.order.len());
                self.order.push((key, vec![idx]));
            }
        }
    }
}

struct PendingGroup {
    id: String,
    name: String,
    method: GroupingMethod,
    details: String,
    members: Vec<usize>,
}

/// Groups under construction, keyed by service id.
struct Assembly<'a> {
    records: &'a [ContainerRecord],
    allow_multi_host: bool,
    groups: Vec<PendingGroup>,
    by_id: HashMap<String, usize>,
}

/// Distinct hosts of `members`, in input order.
fn hosts_of(records: &[ContainerRecord], members: &[usize]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for &m in members {
        let host = records[m].hosted_by.as_deref().unwrap_or(UNKNOWN_HOST);
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

impl<'a> Assembly<'a> {
    fn service_id(&self, name: &str, members: &[usize]) -> String {
        let hosts = hosts_of(self.records, members);
        if self.allow_multi_host && hosts.len() > 1 {
            return format!("service_{}_{}", GLOBAL_SCOPE, name);
        }
        let host = hosts.first().map(String::as_str).unwrap_or(UNKNOWN_HOST);
        format!("service_{}_{}", host, name)
    }

    /// Record a group and claim its members.
    ///
    /// A group whose id already exists is folded into the earlier group,
    /// which keeps its name and method.
    fn add(
        &mut self,
        name: &str,
        method: GroupingMethod,
        details: String,
        mut members: Vec<usize>,
        ungrouped: &mut Ungrouped,
    ) {
        members.retain(|&m| ungrouped.contains(m));
        members.sort_unstable();
        members.dedup();
        let min = if method.allows_singleton() { 1 } else { 2 };
        if members.len() < min {
            return;
        }

        ungrouped.claim(&members);
        let id = self.service_id(name, &members);
        tracing::debug!(
            service = %id,
            method = %method,
            members = members.len(),
            "grouped containers"
        );

        match self.by_id.get(&id) {
            Some(&slot) => {
                let existing = &mut self.groups[slot];
                existing.members.extend(members);
                existing.members.sort_unstable();
                existing.members.dedup();
            }
            None => {
                self.by_id.insert(id.clone(), self.groups.len());
                self.groups.push(PendingGroup {
                    id,
                    name: name.to_string(),
                    method,
                    details,
                    members,
                });
            }
        }
    }
}

/// The clustering engine. Stateless between runs.
#[derive(Debug, Clone)]
pub struct ServiceClusterer {
    rules: ClusterRules,
    allow_multi_host: bool,
}

impl Default for ServiceClusterer {
    fn default() -> Self {
        Self::new(ClusterRules::default(), true)
    }
}

impl ServiceClusterer {
    pub fn new(rules: ClusterRules, allow_multi_host: bool) -> Self {
        Self {
            rules,
            allow_multi_host,
        }
    }

    pub fn rules(&self) -> &ClusterRules {
        &self.rules
    }

    /// Partition `records` into services.
    pub fn cluster(&self, records: &[ContainerRecord]) -> ClusterOutput {
        let mut asm = Assembly {
            records,
            allow_multi_host: self.allow_multi_host,
            groups: Vec::new(),
            by_id: HashMap::new(),
        };

        let ungrouped = Ungrouped::all(records.len());
        let ungrouped = self.label_pass(&mut asm, ungrouped);
        let ungrouped = self.prefix_pass(&mut asm, ungrouped);
        let ungrouped = self.dependency_pass(&mut asm, ungrouped);
        let ungrouped = self.compose_pass(&mut asm, ungrouped);
        let ungrouped = self.network_pass(&mut asm, ungrouped);
        let ungrouped = self.standalone_pass(&mut asm, ungrouped);
        debug_assert!(ungrouped.is_empty());

        self.finish(asm)
    }

    fn label_pass(&self, asm: &mut Assembly<'_>, mut ungrouped: Ungrouped) -> Ungrouped {
        let mut buckets = Buckets::new();
        let mut keys: HashMap<String, String> = HashMap::new();
        for idx in ungrouped.indices() {
            let record = &asm.records[idx];
            if let Some((key, value)) = self.rules.service_label(record) {
                keys.entry(value.to_string()).or_insert_with(|| key.to_string());
                buckets.push(value.to_string(), idx);
            }
        }

        for (value, members) in buckets.order {
            let key = keys.get(&value).map(String::as_str).unwrap_or_default();
            let details = format!("Grouped by service label {}={}", key, value);
            asm.add(&value, GroupingMethod::ExplicitLabel, details, members, &mut ungrouped);
        }
        ungrouped
    }

    fn prefix_pass(&self, asm: &mut Assembly<'_>, mut ungrouped: Ungrouped) -> Ungrouped {
        let mut buckets = Buckets::new();
        for idx in ungrouped.indices() {
            let record = &asm.records[idx];
            let Some(prefix) = record
                .container_name
                .as_deref()
                .and_then(|n| self.rules.name_prefix(n))
            else {
                continue;
            };
            buckets.push(prefix, idx);
        }

        for (prefix, members) in buckets.order {
            let details = format!("Grouped by common name prefix: {}", prefix);
            asm.add(&prefix, GroupingMethod::NamePrefix, details, members, &mut ungrouped);
        }
        ungrouped
    }

    fn dependency_pass(&self, asm: &mut Assembly<'_>, mut ungrouped: Ungrouped) -> Ungrouped {
        let records = asm.records;
        let mut by_id: HashMap<&str, usize> = HashMap::new();
        let mut by_name: HashMap<&str, Option<usize>> = HashMap::new();
        for idx in ungrouped.indices() {
            let record = &records[idx];
            by_id.insert(record.id.as_str(), idx);
            if let Some(name) = record.container_name.as_deref() {
                by_name
                    .entry(name)
                    .and_modify(|slot| *slot = None)
                    .or_insert(Some(idx));
            }
        }

        let edges: HashMap<usize, Vec<usize>> = ungrouped
            .indices()
            .into_iter()
            .map(|idx| {
                let targets = records[idx]
                    .depends_on
                    .iter()
                    .filter_map(|dep| {
                        by_id
                            .get(dep.as_str())
                            .copied()
                            .or_else(|| by_name.get(dep.as_str()).copied().flatten())
                    })
                    .collect::<Vec<_>>();
                (idx, targets)
            })
            .filter(|(_, targets)| !targets.is_empty())
            .collect();

        let mut visited: BTreeSet<usize> = BTreeSet::new();
        for root in ungrouped.indices() {
            if visited.contains(&root) || !edges.contains_key(&root) || !ungrouped.contains(root) {
                continue;
            }

            let mut cluster = vec![root];
            let mut seen: BTreeSet<usize> = BTreeSet::from([root]);
            let mut queue = VecDeque::from([root]);
            while let Some(current) = queue.pop_front() {
                for &next in edges.get(&current).into_iter().flatten() {
                    if ungrouped.contains(next) && !visited.contains(&next) && seen.insert(next) {
                        cluster.push(next);
                        queue.push_back(next);
                    }
                }
            }

            if cluster.len() < 2 {
                continue;
            }
            visited.extend(cluster.iter().copied());

            let root_record = &records[root];
            let name = root_record
                .container_name
                .as_deref()
                .and_then(|n| self.rules.name_prefix(n))
                .unwrap_or_else(|| root_record.display_name().to_lowercase());
            let details = format!(
                "Grouped by container dependencies starting at {}",
                root_record.display_name()
            );
            asm.add(&name, GroupingMethod::DependencyCluster, details, cluster, &mut ungrouped);
        }
        ungrouped
    }

    fn compose_pass(&self, asm: &mut Assembly<'_>, mut ungrouped: Ungrouped) -> Ungrouped {
        let mut buckets = Buckets::new();
        for idx in ungrouped.indices() {
            let record = &asm.records[idx];
            let project = record
                .labels
                .get(&self.rules.compose_project_label)
                .map(|p| p.trim())
                .filter(|p| !p.is_empty());
            if let Some(project) = project {
                buckets.push(project.to_string(), idx);
            }
        }

        for (project, members) in buckets.order {
            let details = format!("Grouped by Docker Compose project: {}", project);
            asm.add(&project, GroupingMethod::ComposeProject, details, members, &mut ungrouped);
        }
        ungrouped
    }

    fn network_pass(&self, asm: &mut Assembly<'_>, mut ungrouped: Ungrouped) -> Ungrouped {
        let mut buckets = Buckets::new();
        for idx in ungrouped.indices() {
            let record = &asm.records[idx];
            let mut seen = BTreeSet::new();
            for network in &record.networks {
                if self.rules.is_default_network(network) || !seen.insert(network.as_str()) {
                    continue;
                }
                buckets.push(network.clone(), idx);
            }
        }

        // A container on several shared networks joins the first one that
        // still has two unclaimed members.
        for (network, members) in buckets.order {
            let name = self.rules.network_service_name(&network);
            let details = format!("Grouped by shared network: {}", network);
            asm.add(&name, GroupingMethod::SharedNetwork, details, members, &mut ungrouped);
        }
        ungrouped
    }

    fn standalone_pass(&self, asm: &mut Assembly<'_>, mut ungrouped: Ungrouped) -> Ungrouped {
        for idx in ungrouped.indices() {
            let name = asm.records[idx].display_name().to_string();
            let details = "Standalone container (no grouping criteria matched)".to_string();
            asm.add(&name, GroupingMethod::Standalone, details, vec![idx], &mut ungrouped);
        }
        ungrouped
    }

    fn finish(&self, asm: Assembly<'_>) -> ClusterOutput {
        let Assembly {
            records,
            groups: pending_groups,
            ..
        } = asm;
        let mut containers = records.to_vec();
        let mut groups = Vec::with_capacity(pending_groups.len());
        let mut services = Vec::with_capacity(pending_groups.len());

        for pending in pending_groups {
            let members: Vec<&ContainerRecord> =
                pending.members.iter().map(|&m| &records[m]).collect();
            let primary = members
                .iter()
                .find(|m| m.is_running())
                .or_else(|| members.first())
                .copied();
            let Some(primary) = primary else { continue };

            let mut hosts = hosts_of(records, &pending.members);
            let primary_host = primary.hosted_by.as_deref().unwrap_or(UNKNOWN_HOST);
            if let Some(pos) = hosts.iter().position(|h| h == primary_host) {
                let h = hosts.remove(pos);
                hosts.insert(0, h);
            }

            for &m in &pending.members {
                containers[m].part_of_service = Some(pending.id.clone());
            }

            let group = ServiceGroup {
                id: pending.id,
                category: self.rules.category_for(&pending.name).to_string(),
                name: pending.name,
                method: pending.method,
                details: pending.details,
                members: members.iter().map(|m| m.id.clone()).collect(),
                hosts,
                primary: primary.id.clone(),
                status: ServiceStatus::aggregate(members.iter().copied()),
            };
            services.push(service_document(&group, &members));
            groups.push(group);
        }

        tracing::info!(
            containers = records.len(),
            services = groups.len(),
            "clustered containers into services"
        );

        ClusterOutput {
            containers,
            services,
            groups,
        }
    }
}

fn host_phrase(hosts: &[String]) -> String {
    match hosts {
        [] => UNKNOWN_HOST.to_string(),
        [one] => one.clone(),
        many => format!("hosts {}", many.join(", ")),
    }
}

/// Build the service document for a group.
pub fn service_document(group: &ServiceGroup, members: &[&ContainerRecord]) -> EntityDocument {
    let host = group.host().to_string();
    let where_ = host_phrase(&group.hosts);
    let count = members.len();

    let mut parts = Vec::new();
    if count == 1 {
        parts.push(format!("{} is a standalone service running on {}.", group.name, where_));
    } else {
        parts.push(format!(
            "{} is a multi-container service running on {} with {} containers.",
            group.name, where_, count
        ));
    }
    if group.method != GroupingMethod::Standalone {
        parts.push(format!(
            "Containers were grouped by {}.",
            group.method.as_str().replace('_', " ")
        ));
    }
    if count > 1 {
        let names: Vec<&str> = members.iter().map(|m| m.display_name()).collect();
        parts.push(format!("Includes containers: {}.", names.join(", ")));
    }
    parts.push(format!("Service category: {}.", group.category));

    let title = if group.hosts.len() > 1 {
        format!("{} service across {} hosts", group.name, group.hosts.len())
    } else {
        format!("{} service on {}", group.name, host)
    };

    let images: BTreeSet<&str> = members.iter().filter_map(|m| m.image.as_deref()).collect();
    let networks: BTreeSet<&str> = members
        .iter()
        .flat_map(|m| m.networks.iter().map(String::as_str))
        .collect();
    let names: Vec<&str> = members.iter().map(|m| m.display_name()).collect();

    let mut doc = EntityDocument::new(&group.id, kind::SERVICE, title, parts.join(" "));
    doc.set_meta("service_name", group.name.as_str());
    doc.set_meta(OWNER_FIELD, host.as_str());
    doc.set_meta("hosted_by", host.as_str());
    doc.set_meta("hosts", json!(group.hosts));
    doc.set_meta("container_count", count);
    doc.set_meta("containers", json!(group.members));
    doc.set_meta("container_names", json!(names));
    doc.set_meta("primary_container", group.primary.as_str());
    doc.set_meta("status", group.status.as_str());
    doc.set_meta("images", json!(images));
    doc.set_meta("networks", json!(networks));
    doc.set_meta("grouping_method", group.method.as_str());
    doc.set_meta("grouping_details", group.details.as_str());
    doc.set_meta("category", group.category.as_str());
    doc.set_meta("multi_host", Value::Bool(group.hosts.len() > 1));

    doc.add_tags([
        "service".to_string(),
        "docker".to_string(),
        group.name.to_lowercase(),
        group.category.clone(),
        if count > 1 { "multi-container" } else { "standalone" }.to_string(),
    ]);
    doc
}
