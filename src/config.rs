use anyhow::{Context, Result};
use infradoc_core::cluster::{ClusterRules, ServiceCategory};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub snapshots: SnapshotsConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotsConfig {
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*_unified.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// `[clustering]`: every table is optional and falls back to the built-in
/// defaults of [`ClusterRules`].
#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_allow_multi_host")]
    pub allow_multi_host_services: bool,
    #[serde(default)]
    pub label_keys: Option<Vec<String>>,
    #[serde(default)]
    pub compose_project_label: Option<String>,
    #[serde(default)]
    pub role_suffixes: Option<Vec<String>>,
    #[serde(default)]
    pub default_networks: Option<Vec<String>>,
    #[serde(default)]
    pub network_suffixes: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<ServiceCategory>>,
}

fn default_allow_multi_host() -> bool {
    true
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            allow_multi_host_services: true,
            label_keys: None,
            compose_project_label: None,
            role_suffixes: None,
            default_networks: None,
            network_suffixes: None,
            categories: None,
        }
    }
}

impl ClusteringConfig {
    /// Resolve the configured overrides against the built-in tables.
    pub fn rules(&self) -> ClusterRules {
        let defaults = ClusterRules::default();
        ClusterRules {
            label_keys: self.label_keys.clone().unwrap_or(defaults.label_keys),
            compose_project_label: self
                .compose_project_label
                .clone()
                .unwrap_or(defaults.compose_project_label),
            role_suffixes: self
                .role_suffixes
                .clone()
                .map(|s| s.into_iter().map(|r| r.to_lowercase()).collect())
                .unwrap_or(defaults.role_suffixes),
            default_networks: self
                .default_networks
                .clone()
                .unwrap_or(defaults.default_networks),
            network_suffixes: self
                .network_suffixes
                .clone()
                .unwrap_or(defaults.network_suffixes),
            categories: self
                .categories
                .clone()
                .map(|cats| {
                    cats.into_iter()
                        .map(|c| ServiceCategory {
                            name: c.name,
                            keywords: c.keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                        })
                        .collect()
                })
                .unwrap_or(defaults.categories),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaggingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Document types sent to the tagger. Empty means all.
    #[serde(default)]
    pub entity_types: Vec<String>,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_workers: 4,
            max_retries: 3,
            timeout_secs: 60,
            entity_types: Vec::new(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

impl TaggingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn applies_to(&self, doc_type: &str) -> bool {
        self.entity_types.is_empty() || self.entity_types.iter().any(|t| t == doc_type)
    }
}

impl Config {
    /// Config used when no file exists: snapshots under `./snapshots`,
    /// store at `./data/infradoc_store.json`, tagging disabled.
    pub fn minimal() -> Self {
        Self {
            snapshots: SnapshotsConfig {
                dir: PathBuf::from("./snapshots"),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            store: StoreConfig {
                path: PathBuf::from("./data/infradoc_store.json"),
            },
            clustering: ClusteringConfig::default(),
            tagging: TaggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_config_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.snapshots.include_globs.is_empty() {
        anyhow::bail!("snapshots.include_globs must not be empty");
    }

    let rules = config.clustering.rules();
    if rules.label_keys.iter().any(|k| k.trim().is_empty()) {
        anyhow::bail!("clustering.label_keys must not contain empty keys");
    }
    if rules.compose_project_label.trim().is_empty() {
        anyhow::bail!("clustering.compose_project_label must not be empty");
    }
    for category in &rules.categories {
        if category.name.trim().is_empty() || category.keywords.is_empty() {
            anyhow::bail!("clustering.categories entries need a name and at least one keyword");
        }
    }

    if config.tagging.max_workers == 0 {
        anyhow::bail!("tagging.max_workers must be >= 1");
    }

    match config.tagging.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.tagging.model.is_none() {
                anyhow::bail!(
                    "tagging.model must be specified when provider is '{}'",
                    config.tagging.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown tagging provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let file = write_config(
            r#"
[snapshots]
dir = "./snapshots"

[store]
path = "./data/store.json"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.snapshots.include_globs, vec!["**/*_unified.json"]);
        assert!(config.clustering.allow_multi_host_services);
        assert!(!config.tagging.is_enabled());
        assert_eq!(config.tagging.max_workers, 4);
        assert_eq!(config.clustering.rules(), ClusterRules::default());
    }

    #[test]
    fn clustering_overrides_replace_tables() {
        let file = write_config(
            r#"
[snapshots]
dir = "s"

[store]
path = "d.json"

[clustering]
allow_multi_host_services = false
role_suffixes = ["DB", "sidecar"]

[[clustering.categories]]
name = "wiki"
keywords = ["BookStack", "wiki"]
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert!(!config.clustering.allow_multi_host_services);
        let rules = config.clustering.rules();
        assert_eq!(rules.role_suffixes, vec!["db", "sidecar"]);
        assert_eq!(rules.categories.len(), 1);
        assert_eq!(rules.category_for("bookstack-app"), "wiki");
        assert_eq!(rules.label_keys, ClusterRules::default().label_keys);
    }

    #[test]
    fn rejects_bad_tagging_settings() {
        let file = write_config(
            r#"
[snapshots]
dir = "s"
[store]
path = "d.json"
[tagging]
provider = "openai"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("tagging.model"));

        let file = write_config(
            r#"
[snapshots]
dir = "s"
[store]
path = "d.json"
[tagging]
provider = "magic"
model = "m"
"#,
        );
        assert!(load_config(file.path()).is_err());

        let file = write_config(
            r#"
[snapshots]
dir = "s"
[store]
path = "d.json"
[tagging]
max_workers = 0
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn entity_type_filter() {
        let mut tagging = TaggingConfig::default();
        assert!(tagging.applies_to("container"));
        tagging.entity_types = vec!["service".into()];
        assert!(tagging.applies_to("service"));
        assert!(!tagging.applies_to("container"));
    }
}
