//! Snapshot discovery and loading.
//!
//! A snapshot is one JSON file per system, collected out-of-band:
//!
//! ```json
//! { "system_name": "pve1", "collected_at": "...", "sections": { "docker": {...} } }
//! ```
//!
//! The object may also be wrapped as `{"data": {...}}`. When `system_name`
//! is missing, the file stem without its `_unified` suffix is used.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use infradoc_core::classify::{classify, Capabilities, ProbeSet};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SnapshotsConfig;

/// Section holding raw probe results for the classifier.
pub const PROBES_SECTION: &str = "probes";
/// Section holding pre-computed capabilities.
pub const CAPABILITIES_SECTION: &str = "capabilities";

/// One system's collected data.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub system_name: String,
    pub collected_at: Option<String>,
    pub sections: Map<String, Value>,
    pub path: PathBuf,
    /// SHA-256 of the raw file, hex encoded.
    pub sha256: String,
}

impl Snapshot {
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name).filter(|v| !v.is_null())
    }

    /// Classify the host.
    ///
    /// Uses the `probes` section when present, else a declared
    /// `capabilities` section, else empty probes.
    pub fn capabilities(&self) -> Capabilities {
        if let Some(probes) = self.section(PROBES_SECTION) {
            match serde_json::from_value::<ProbeSet>(probes.clone()) {
                Ok(probes) => return classify(&probes),
                Err(e) => tracing::warn!(
                    system = %self.system_name,
                    error = %e,
                    "malformed probes section, ignoring"
                ),
            }
        }
        if let Some(declared) = self.section(CAPABILITIES_SECTION) {
            return Capabilities::from_value(declared);
        }
        classify(&ProbeSet::default())
    }

    /// Parse a snapshot from raw file contents.
    pub fn from_slice(path: &Path, raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
        let root = match value.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => &value,
        };
        let Some(root) = root.as_object() else {
            bail!("Snapshot is not a JSON object: {}", path.display());
        };

        let system_name = root
            .get("system_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| system_name_from_path(path))
            .with_context(|| format!("Cannot determine system name for {}", path.display()))?;

        let sections = match root.get("sections") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => bail!("'sections' must be an object in {}", path.display()),
            None => Map::new(),
        };

        Ok(Self {
            system_name,
            collected_at: root
                .get("collected_at")
                .and_then(Value::as_str)
                .map(str::to_string),
            sections,
            path: path.to_path_buf(),
            sha256: format!("{:x}", Sha256::digest(raw)),
        })
    }
}

fn system_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    let name = stem.strip_suffix("_unified").unwrap_or(&*stem);
    (!name.is_empty()).then(|| name.to_string())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    Snapshot::from_slice(path, &raw)
}

/// Snapshot files under the configured directory, sorted by path.
pub fn discover_snapshots(config: &SnapshotsConfig) -> Result<Vec<PathBuf>> {
    let root = &config.dir;
    if !root.exists() {
        bail!("Snapshot directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Snapshots that loaded, plus the files that did not.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub snapshots: Vec<Snapshot>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Discover and load all snapshots, optionally restricted to `only` systems.
///
/// A file that fails to load is reported in [`LoadOutcome::failed`] and
/// skipped. A system appearing in two files keeps the first.
pub fn load_all(config: &SnapshotsConfig, only: &[String]) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    for path in discover_snapshots(config)? {
        let snapshot = match load_snapshot(&path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "skipping snapshot");
                outcome.failed.push((path, format!("{:#}", e)));
                continue;
            }
        };
        if !only.is_empty() && !only.iter().any(|s| s == &snapshot.system_name) {
            continue;
        }
        if outcome
            .snapshots
            .iter()
            .any(|s| s.system_name == snapshot.system_name)
        {
            tracing::warn!(
                system = %snapshot.system_name,
                path = %path.display(),
                "duplicate snapshot for system, keeping the first"
            );
            continue;
        }
        outcome.snapshots.push(snapshot);
    }
    Ok(outcome)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infradoc_core::classify::{OsType, Virtualization};
    use serde_json::json;

    fn config(dir: &Path) -> SnapshotsConfig {
        SnapshotsConfig {
            dir: dir.to_path_buf(),
            include_globs: vec!["**/*_unified.json".into()],
            exclude_globs: vec!["archive/**".into()],
            follow_symlinks: false,
        }
    }

    #[test]
    fn wrapped_snapshot_and_stem_fallback() {
        let raw = serde_json::to_vec(&json!({"data": {"sections": {"docker": {}}}})).unwrap();
        let snap = Snapshot::from_slice(Path::new("/tmp/nas01_unified.json"), &raw).unwrap();
        assert_eq!(snap.system_name, "nas01");
        assert!(snap.section("docker").is_some());
        assert_eq!(snap.sha256.len(), 64);
    }

    #[test]
    fn rejects_non_object_sections() {
        let raw = br#"{"system_name": "a", "sections": []}"#;
        assert!(Snapshot::from_slice(Path::new("a.json"), raw).is_err());
    }

    #[test]
    fn capabilities_prefer_probes() {
        let raw = serde_json::to_vec(&json!({
            "system_name": "pve1",
            "sections": {
                "probes": {
                    "pveversion": {"success": true, "output": "pve-manager/8.1"},
                    "detect_virt": {"success": true, "output": "none"}
                },
                "capabilities": {"os_type": "ubuntu", "virtualization": "vm"}
            }
        }))
        .unwrap();
        let caps = Snapshot::from_slice(Path::new("x.json"), &raw)
            .unwrap()
            .capabilities();
        assert_eq!(caps.os_type, OsType::Proxmox);
        assert_eq!(caps.virtualization, Virtualization::Physical);
    }

    #[test]
    fn discovery_filters_sorts_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("archive")).unwrap();
        std::fs::write(root.join("b_unified.json"), r#"{"system_name":"b"}"#).unwrap();
        std::fs::write(root.join("a_unified.json"), r#"{"sections":{}}"#).unwrap();
        std::fs::write(root.join("broken_unified.json"), "{not json").unwrap();
        std::fs::write(root.join("notes.txt"), "ignored").unwrap();
        std::fs::write(root.join("archive/old_unified.json"), "{}").unwrap();

        let files = discover_snapshots(&config(root)).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a_unified.json", "b_unified.json", "broken_unified.json"]);

        let outcome = load_all(&config(root), &[]).unwrap();
        let systems: Vec<&str> = outcome.snapshots.iter().map(|s| s.system_name.as_str()).collect();
        assert_eq!(systems, vec!["a", "b"]);
        assert_eq!(outcome.failed.len(), 1);

        let only = load_all(&config(root), &["b".to_string()]).unwrap();
        assert_eq!(only.snapshots.len(), 1);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_snapshots(&config(&dir.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
