//! Host document: one per system, the anchor every other entity hangs off.

use infradoc_core::classify::{OsType, Virtualization};
use infradoc_core::models::{EntityDocument, OWNER_FIELD};
use serde_json::{json, Value};

use super::{str_at, BuildContext};

/// Section with `hostname`, `kernel`, `architecture` and `os_release`.
pub const OVERVIEW_SECTION: &str = "system_overview";

struct Overview<'a> {
    hostname: Option<&'a str>,
    kernel: Option<&'a str>,
    architecture: Option<&'a str>,
    pretty_name: Option<&'a str>,
    uptime: Option<&'a str>,
}

impl<'a> Overview<'a> {
    fn read(section: Option<&'a Value>) -> Self {
        let get = |keys: &[&str]| section.and_then(|s| str_at(s, keys));
        Self {
            hostname: get(&["hostname"]),
            kernel: get(&["kernel"]),
            architecture: get(&["architecture"]),
            pretty_name: get(&["os_release", "PRETTY_NAME"]),
            uptime: get(&["uptime"]),
        }
    }
}

fn os_label(os_type: OsType) -> &'static str {
    match os_type {
        OsType::Unraid => "Unraid",
        OsType::Proxmox => "Proxmox VE",
        OsType::Ubuntu => "Ubuntu",
        OsType::Debian => "Debian",
        OsType::Linux => "Linux",
        OsType::Unknown => "an unidentified operating system",
    }
}

pub fn build_host(ctx: &BuildContext<'_>) -> EntityDocument {
    let caps = ctx.capabilities;
    let overview = Overview::read(ctx.snapshot.section(OVERVIEW_SECTION));

    let class = match caps.virtualization {
        Virtualization::Physical => "physical server",
        Virtualization::Vm => "virtual machine",
        Virtualization::Container => "system container",
    };
    let os = overview.pretty_name.unwrap_or_else(|| os_label(caps.os_type));

    let mut parts = vec![format!("{} is a {} running {}.", ctx.system, class, os)];
    if let Some(hostname) = overview.hostname.filter(|h| *h != ctx.system) {
        parts.push(format!("Hostname: {}.", hostname));
    }
    match (overview.kernel, overview.architecture) {
        (Some(k), Some(a)) => parts.push(format!("Kernel {} on {}.", k, a)),
        (Some(k), None) => parts.push(format!("Kernel {}.", k)),
        (None, Some(a)) => parts.push(format!("Architecture: {}.", a)),
        (None, None) => {}
    }
    let features = caps.features();
    if !features.is_empty() {
        parts.push(format!("Capabilities: {}.", features.join(", ")));
    }
    if caps.has_docker_compose_files() {
        parts.push(format!(
            "Docker Compose files found in: {}.",
            caps.docker_compose_locations.join(", ")
        ));
    }
    if let Some(uptime) = overview.uptime {
        parts.push(format!("Uptime: {}.", uptime));
    }

    let title = if caps.is_physical() {
        format!("{} server", ctx.system)
    } else {
        format!("{} {}", ctx.system, class)
    };

    let mut doc = EntityDocument::new(&ctx.host_id, ctx.host_kind, title, parts.join(" "));
    doc.set_meta(OWNER_FIELD, ctx.system);
    doc.set_meta("os_type", caps.os_type.as_str());
    doc.set_meta("virtualization", caps.virtualization.as_str());
    doc.set_meta("virtualization_evidence", caps.virtualization_evidence.as_str());
    doc.set_meta("is_physical", caps.is_physical());
    doc.set_meta("has_docker", caps.has_docker);
    doc.set_meta("has_lxc", caps.has_lxc);
    doc.set_meta("has_kvm", caps.has_kvm);
    doc.set_meta("has_zfs", caps.has_zfs);
    doc.set_meta("has_btrfs", caps.has_btrfs);
    doc.set_meta("has_lvm", caps.has_lvm);
    doc.set_meta("docker_compose_locations", json!(caps.docker_compose_locations));
    for (key, value) in [
        ("hostname", overview.hostname),
        ("kernel", overview.kernel),
        ("architecture", overview.architecture),
        ("os_name", overview.pretty_name),
    ] {
        if let Some(value) = value {
            doc.set_meta(key, value);
        }
    }
    if let Some(collected_at) = &ctx.snapshot.collected_at {
        doc.set_meta("collected_at", collected_at.as_str());
    }

    doc.add_tags([ctx.host_kind, caps.os_type.as_str(), caps.virtualization.as_str()]);
    doc.add_tags(features);
    doc
}
