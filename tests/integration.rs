use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn infradoc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("infradoc");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let snapshots_dir = root.join("snapshots");
    fs::create_dir_all(&snapshots_dir).unwrap();

    let pve = serde_json::json!({
        "system_name": "pve1",
        "collected_at": "2026-10-01T08:00:00Z",
        "sections": {
            "system_overview": {"hostname": "pve1", "kernel": "6.8.12-pve"},
            "hardware": {
                "cpu": {"model_name": "Intel Xeon E-2236", "physical_cores": 6},
                "memory": {"total_gb": 64}
            },
            "docker": {"containers": [
                {"name": "nginx", "image": "nginx:1.25", "status": "running", "networks": ["web_network"]},
                {"name": "whoami", "image": "traefik/whoami", "status": "running", "networks": ["web_network"]}
            ]},
            "proxmox": {
                "vms": [{"vmid": 101, "name": "homeassistant", "status": "running",
                         "configuration": {"cores": 2, "memory": 4096}}],
                "lxc_containers": []
            },
            "config_files": {"files": [
                {"path": "/etc/nginx/nginx.conf", "size": 2048, "service": "nginx"}
            ]}
        }
    });
    fs::write(
        snapshots_dir.join("pve1_unified.json"),
        serde_json::to_vec_pretty(&pve).unwrap(),
    )
    .unwrap();

    let config_content = format!(
        r#"[snapshots]
dir = "{root}/snapshots"

[store]
path = "{root}/data/infradoc_store.json"

[clustering]
allow_multi_host_services = true
"#,
        root = root.display()
    );

    let config_path = config_dir.join("infradoc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_infradoc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = infradoc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run infradoc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_process_then_stats() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_infradoc(&config, &["process"]);
    assert!(ok, "process failed: {}", stderr);
    assert!(stdout.contains("systems: pve1"));
    assert!(stdout.ends_with("ok\n"));

    let (stdout, stderr, ok) = run_infradoc(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("pve1"));
    assert!(stdout.contains("config_file"));
    assert!(stdout.contains("vm"));
}

#[test]
fn test_get_json() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_infradoc(&config, &["process"]);
    assert!(ok, "process failed: {}", stderr);

    let (stdout, stderr, ok) = run_infradoc(&config, &["get", "container_pve1_nginx", "--json"]);
    assert!(ok, "get failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["document"]["type"], "container");
    let outgoing = value["outgoing"].as_array().unwrap();
    assert!(outgoing.iter().any(|r| r["type"] == "HOSTED_BY"));
    assert!(outgoing.iter().any(|r| r["type"] == "PART_OF"));
    assert!(outgoing.iter().any(|r| r["type"] == "CONFIGURED_BY"));
    let incoming = value["incoming"].as_array().unwrap();
    assert!(incoming.iter().any(|r| r["type"] == "CONFIGURES"));
}

#[test]
fn test_get_missing_document_fails() {
    let (_tmp, config) = setup_test_env();
    run_infradoc(&config, &["process"]);
    let (_, stderr, ok) = run_infradoc(&config, &["get", "container_pve1_nope"]);
    assert!(!ok);
    assert!(stderr.contains("document not found"));
}

#[test]
fn test_validate_after_process() {
    let (_tmp, config) = setup_test_env();
    run_infradoc(&config, &["process"]);

    let (stdout, stderr, ok) = run_infradoc(&config, &["validate"]);
    assert!(ok, "validate failed: {}\n{}", stdout, stderr);
    assert!(stdout.contains("errors: 0"));
}

#[test]
fn test_validate_reports_broken_store() {
    let (tmp, config) = setup_test_env();
    let store = tmp.path().join("data/infradoc_store.json");
    fs::create_dir_all(store.parent().unwrap()).unwrap();
    fs::write(
        &store,
        r#"{"documents": [], "relationships": [
            {"id": "a_hosted_by_b", "type": "HOSTED_BY", "source_id": "a", "source_type": "container",
             "target_id": "b", "target_type": "server", "metadata": {"created_at": "2026-10-01T00:00:00Z"}}
        ]}"#,
    )
    .unwrap();

    let (stdout, _, ok) = run_infradoc(&config, &["validate"]);
    assert!(!ok);
    assert!(stdout.contains("missing inverse"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_infradoc(&config, &["process", "--dry-run"]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("store (not written): 0 removed, 0 preserved"));
    assert!(!tmp.path().join("data/infradoc_store.json").exists());
}

#[test]
fn test_sources_lists_snapshots_and_builders() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_infradoc(&config, &["sources"]);
    assert!(ok, "sources failed: {}", stderr);
    assert!(stdout.contains("pve1"));
    assert!(stdout.contains("docker"));
    assert!(stdout.contains("proxmox"));
}
