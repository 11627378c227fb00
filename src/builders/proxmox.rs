//! Proxmox guests: QEMU VMs and LXC containers of one node.
//!
//! Guest `configuration` values come straight from `qm config` / `pct
//! config`, so option strings such as `net0` and `rootfs` are
//! comma-separated `key=value` lists.

use anyhow::{bail, Context, Result};
use infradoc_core::models::{entity_id, kind, EntityDocument, Relationship, OWNER_FIELD};
use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
use serde_json::{json, Value};

use super::{format_amount, number, str_at, BuildContext, BuildOutput, SectionBuilder};

pub const SECTION: &str = "proxmox";

pub struct ProxmoxBuilder;

impl SectionBuilder for ProxmoxBuilder {
    fn section(&self) -> &str {
        SECTION
    }

    fn description(&self) -> &str {
        "Proxmox VMs and LXC containers"
    }

    fn build(&self, ctx: &BuildContext<'_>, data: &Value) -> Result<BuildOutput> {
        if !data.is_object() {
            bail!("'proxmox' section must be an object");
        }
        let mut output = BuildOutput::default();
        for (key, guest_kind) in [("vms", GuestKind::Vm), ("lxc_containers", GuestKind::Lxc)] {
            let Some(guests) = data.get(key).and_then(Value::as_array) else {
                continue;
            };
            for (i, guest) in guests.iter().enumerate() {
                let label = str_at(guest, &["name"])
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}[{}]", key, i));
                output.isolate(ctx, SECTION, &label, || guest_document(ctx, guest_kind, guest));
            }
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuestKind {
    Vm,
    Lxc,
}

impl GuestKind {
    fn doc_type(self) -> &'static str {
        match self {
            Self::Vm => kind::VM,
            Self::Lxc => kind::LXC,
        }
    }
}

/// Value of `key` in a `a=1,b=2` option string.
pub fn option_value<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options.split(',').find_map(|part| {
        let (k, v) = part.split_once('=')?;
        (k.trim() == key).then(|| v.trim()).filter(|v| !v.is_empty())
    })
}

/// Enabled flags of a `features` string, e.g. `nesting=1,keyctl=1`.
pub fn enabled_features(options: &str) -> Vec<String> {
    options
        .split(',')
        .filter_map(|part| part.split_once('='))
        .filter(|(_, v)| v.trim() == "1")
        .map(|(k, _)| k.trim().to_string())
        .collect()
}

fn vmid_of(guest: &Value) -> Option<String> {
    match guest.get("vmid")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// First `netN` option string of the guest.
fn primary_nic(config: &Value) -> Option<&str> {
    let map = config.as_object()?;
    (0..10).find_map(|i| map.get(&format!("net{}", i)).and_then(Value::as_str))
}

fn guest_document(
    ctx: &BuildContext<'_>,
    guest_kind: GuestKind,
    guest: &Value,
) -> Result<(EntityDocument, Vec<Relationship>)> {
    let vmid = vmid_of(guest).context("guest has no vmid")?;
    let empty = json!({});
    let config = guest.get("configuration").filter(|c| c.is_object()).unwrap_or(&empty);

    let default_name = match guest_kind {
        GuestKind::Vm => format!("vm-{}", vmid),
        GuestKind::Lxc => format!("lxc-{}", vmid),
    };
    let name = str_at(guest, &["name"]).map(str::to_string).unwrap_or(default_name);
    let status = str_at(guest, &["status"]).unwrap_or("unknown");
    let cores = number(config.get("cores")).unwrap_or(1.0);
    let memory_mb = number(config.get("memory")).unwrap_or(512.0);
    let memory_gb = (memory_mb / 1024.0 * 10.0).round() / 10.0;
    let os_type = str_at(config, &["ostype"]).unwrap_or("unknown");
    let onboot = match config.get("onboot") {
        Some(Value::String(s)) => s.trim() == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    };

    let nic = primary_nic(config);
    let vlan = nic.and_then(|n| option_value(n, "tag"));
    let ip = nic.and_then(|n| option_value(n, "ip"));
    let storage = str_at(config, &["rootfs"]).and_then(|r| option_value(r, "size"));
    let features = str_at(config, &["features"])
        .map(enabled_features)
        .unwrap_or_default();
    let hostname = str_at(config, &["hostname"]).unwrap_or(&name);

    let what = match guest_kind {
        GuestKind::Vm => format!("a virtual machine (VM {})", vmid),
        GuestKind::Lxc => format!("an LXC container (LXC {})", vmid),
    };
    let mut parts = vec![format!(
        "{} is {} running on {} with {} CPU cores and {}GB memory.",
        name,
        what,
        ctx.system,
        format_amount(cores),
        format_amount(memory_gb)
    )];
    if guest_kind == GuestKind::Lxc {
        parts.push(format!("Hostname: {}.", hostname));
    }
    parts.push(format!("OS type: {}.", os_type));
    parts.push(format!("Current status: {}.", status));
    match (guest_kind, ip, vlan) {
        (GuestKind::Lxc, Some(ip), Some(vlan)) => {
            parts.push(format!("IP address: {} on VLAN {}.", ip, vlan))
        }
        (GuestKind::Lxc, Some(ip), None) => parts.push(format!("IP address: {}.", ip)),
        (_, _, Some(vlan)) => parts.push(format!("Connected to VLAN {}.", vlan)),
        _ => {}
    }
    if let Some(size) = storage {
        parts.push(format!("Storage allocation: {}.", size));
    }
    if onboot {
        parts.push("Configured to start automatically on boot.".to_string());
    }
    if !features.is_empty() {
        parts.push(format!("Features: {}.", features.join(", ")));
    }

    let doc_type = guest_kind.doc_type();
    let id = entity_id(doc_type, ctx.system, &vmid);
    let title = match guest_kind {
        GuestKind::Vm => format!("VM: {} on {}", name, ctx.system),
        GuestKind::Lxc => format!("LXC: {} on {}", name, ctx.system),
    };

    let mut doc = EntityDocument::new(&id, doc_type, title, parts.join(" "));
    doc.set_meta(OWNER_FIELD, ctx.system);
    doc.set_meta("hosted_by", ctx.system);
    doc.set_meta("vmid", vmid.as_str());
    doc.set_meta("name", name.as_str());
    doc.set_meta("status", status);
    doc.set_meta("cpu_cores", cores);
    doc.set_meta("memory_mb", memory_mb);
    doc.set_meta("memory_gb", memory_gb);
    doc.set_meta("os_type", os_type);
    doc.set_meta("boot_on_start", onboot);
    if guest_kind == GuestKind::Lxc {
        doc.set_meta("hostname", hostname);
        doc.set_meta("virtualization_features", json!(features));
    }
    for (key, value) in [("network_vlan", vlan), ("ip_address", ip), ("storage_allocation", storage)] {
        if let Some(v) = value {
            doc.set_meta(key, v);
        }
    }

    doc.add_tags([doc_type, "proxmox", "virtualization"]);
    match status {
        "running" => doc.add_tags(["active"]),
        "stopped" => doc.add_tags(["inactive"]),
        _ => {}
    }
    if let Some(vlan) = vlan {
        doc.add_tags([format!("vlan-{}", vlan)]);
    }
    doc.add_tags(features.iter().cloned());

    let rels = create_bidirectional(
        EntityRef::new(&id, doc_type),
        ctx.host_ref(),
        RelationshipType::HostedBy,
        None,
    );
    Ok((doc, rels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::snapshot;
    use infradoc_core::cluster::ClusterRules;

    fn build(data: Value) -> BuildOutput {
        let snap = snapshot("pve1", json!({ "proxmox": data }));
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        ProxmoxBuilder.build(&ctx, snap.section("proxmox").unwrap()).unwrap()
    }

    #[test]
    fn option_strings() {
        let net0 = "name=eth0,bridge=vmbr0,ip=192.168.20.5/24,tag=20";
        assert_eq!(option_value(net0, "ip"), Some("192.168.20.5/24"));
        assert_eq!(option_value(net0, "tag"), Some("20"));
        assert_eq!(option_value(net0, "gw"), None);
        assert_eq!(option_value("local-lvm:vm-101-disk-0,size=8G", "size"), Some("8G"));
        assert_eq!(enabled_features("nesting=1,keyctl=0,fuse=1"), vec!["nesting", "fuse"]);
    }

    #[test]
    fn vm_document() {
        let out = build(json!({
            "vms": [{
                "vmid": 101,
                "name": "homeassistant",
                "status": "running",
                "configuration": {
                    "cores": "2",
                    "memory": "4096",
                    "ostype": "l26",
                    "onboot": "1",
                    "net0": "virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0,tag=30"
                }
            }]
        }));
        let doc = &out.documents[0];
        assert_eq!(doc.id, "vm_pve1_101");
        assert_eq!(doc.doc_type, "vm");
        assert_eq!(
            doc.content,
            "homeassistant is a virtual machine (VM 101) running on pve1 with 2 CPU cores and 4GB memory. \
             OS type: l26. Current status: running. Connected to VLAN 30. \
             Configured to start automatically on boot."
        );
        assert!(doc.tags.contains("vlan-30"));
        assert!(doc.tags.contains("active"));
        assert_eq!(out.relationships[0].rel_type, RelationshipType::HostedBy);
        assert_eq!(out.relationships[0].target_id, "server_pve1");
    }

    #[test]
    fn lxc_document_with_defaults() {
        let out = build(json!({
            "lxc_containers": [
                {
                    "vmid": "200",
                    "name": "pihole",
                    "status": "stopped",
                    "configuration": {
                        "memory": 1536,
                        "hostname": "dns",
                        "net0": "name=eth0,bridge=vmbr0,ip=10.0.0.53/24",
                        "rootfs": "local-lvm:vm-200-disk-0,size=4G",
                        "features": "nesting=1"
                    }
                },
                {"name": "no-id"}
            ]
        }));
        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.failures.len(), 1);
        let doc = &out.documents[0];
        assert_eq!(doc.id, "lxc_pve1_200");
        assert!(doc.content.contains("with 1 CPU cores and 1.5GB memory."));
        assert!(doc.content.contains("Hostname: dns."));
        assert!(doc.content.contains("IP address: 10.0.0.53/24."));
        assert!(doc.content.contains("Storage allocation: 4G."));
        assert!(doc.content.contains("Features: nesting."));
        assert!(doc.tags.contains("inactive"));
        assert_eq!(doc.metadata["boot_on_start"], json!(false));
    }
}
