//! Host capability classification from pre-collected probe results.
//!
//! The classifier never executes anything. It receives the raw output of
//! probes that were run out-of-band (see [`probe`] for the names) and turns
//! them into a [`Capabilities`] value.
//!
//! Platform identity is tested most-specific first: Unraid, Proxmox, Ubuntu,
//! Debian, then generic Linux. Virtualization class consults
//! `systemd-detect-virt` first, then container markers, then DMI strings,
//! and defaults to [`Virtualization::Physical`] when nothing is conclusive.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Probe names understood by [`classify`].
pub mod probe {
    pub const UNRAID_VERSION: &str = "unraid_version";
    pub const PVEVERSION: &str = "pveversion";
    pub const OS_RELEASE: &str = "os_release";
    pub const UNAME: &str = "uname";
    pub const DOCKER_VERSION: &str = "docker_version";
    pub const DOCKER_INFO: &str = "docker_info";
    pub const LXC_LS: &str = "lxc_ls";
    pub const LSMOD: &str = "lsmod";
    pub const DETECT_VIRT: &str = "detect_virt";
    pub const DOCKERENV: &str = "dockerenv";
    pub const PROC1_ENVIRON: &str = "proc1_environ";
    pub const DMI_PRODUCT_NAME: &str = "dmi_product_name";
    pub const DMI_SYS_VENDOR: &str = "dmi_sys_vendor";
    pub const ZPOOL: &str = "zpool";
    pub const BTRFS: &str = "btrfs";
    pub const VGS: &str = "vgs";
    pub const COMPOSE_FILES: &str = "compose_files";
}

const CONTAINER_VIRT: &[&str] = &["lxc", "lxc-libvirt", "docker", "podman", "container"];
/// Hypervisor names matched as substrings of DMI product and vendor strings.
const VM_DMI: &[&str] = &[
    "vmware",
    "kvm",
    "qemu",
    "xen",
    "virtualbox",
    "hyperv",
    "parallels",
    "bochs",
];
/// Exact `systemd-detect-virt` outputs for a VM. `microsoft` and `oracle`
/// count here but not in DMI strings.
const VM_VIRT: &[&str] = &[
    "vmware",
    "kvm",
    "qemu",
    "xen",
    "virtualbox",
    "hyperv",
    "parallels",
    "bochs",
    "microsoft",
    "oracle",
];

/// Result of one out-of-band probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output: String,
}

impl ProbeResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }
}

/// Probe results keyed by probe name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeSet(pub BTreeMap<String, ProbeResult>);

impl ProbeSet {
    pub fn insert(&mut self, name: &str, result: ProbeResult) {
        self.0.insert(name.to_string(), result);
    }

    /// Builder-style insert of a successful probe.
    pub fn with(mut self, name: &str, output: &str) -> Self {
        self.insert(name, ProbeResult::ok(output));
        self
    }

    /// Output of a probe that ran successfully.
    pub fn output(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .filter(|r| r.success)
            .map(|r| r.output.as_str())
    }

    pub fn succeeded(&self, name: &str) -> bool {
        self.output(name).is_some()
    }

    fn non_empty(&self, name: &str) -> bool {
        self.output(name).is_some_and(|o| !o.trim().is_empty())
    }

    fn contains(&self, name: &str, needle: &str) -> bool {
        self.output(name).is_some_and(|o| o.contains(needle))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Unraid,
    Proxmox,
    Ubuntu,
    Debian,
    Linux,
    #[default]
    Unknown,
}

impl OsType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unraid => "unraid",
            Self::Proxmox => "proxmox",
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::Linux => "linux",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical, virtual machine or container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Virtualization {
    #[default]
    Physical,
    Vm,
    Container,
}

impl Virtualization {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Vm => "vm",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for Virtualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub os_type: OsType,
    pub virtualization: Virtualization,
    /// Which signal decided `virtualization`.
    pub virtualization_evidence: String,
    pub has_docker: bool,
    pub has_lxc: bool,
    pub has_kvm: bool,
    pub has_zfs: bool,
    pub has_btrfs: bool,
    pub has_lvm: bool,
    pub docker_compose_locations: Vec<String>,
}

impl Capabilities {
    pub fn is_physical(&self) -> bool {
        self.virtualization == Virtualization::Physical
    }

    pub fn has_docker_compose_files(&self) -> bool {
        !self.docker_compose_locations.is_empty()
    }

    /// Names of the detected capabilities, in a fixed order.
    pub fn features(&self) -> Vec<&'static str> {
        [
            (self.has_docker, "docker"),
            (self.has_lxc, "lxc"),
            (self.has_kvm, "kvm"),
            (self.has_zfs, "zfs"),
            (self.has_btrfs, "btrfs"),
            (self.has_lvm, "lvm"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }

    /// Read a pre-computed capabilities section.
    ///
    /// Accepts this crate's own shape as well as the flag style
    /// (`is_unraid`, `is_physical`, `is_vm`, `is_lxc`, ...). Unknown or
    /// malformed values fall back to the defaults.
    pub fn from_value(value: &Value) -> Self {
        let flag = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);

        let os_type = value
            .get("os_type")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| {
                if flag("is_unraid") {
                    OsType::Unraid
                } else if flag("is_proxmox") {
                    OsType::Proxmox
                } else if flag("is_ubuntu") {
                    OsType::Ubuntu
                } else if flag("is_debian") {
                    OsType::Debian
                } else {
                    OsType::Unknown
                }
            });

        let declared = value
            .get("virtualization")
            .cloned()
            .and_then(|v| serde_json::from_value::<Virtualization>(v).ok());
        let (virtualization, evidence) = match declared {
            Some(v) => (v, "declared".to_string()),
            None if flag("is_lxc") => (Virtualization::Container, "declared is_lxc".to_string()),
            None if flag("is_vm") => (Virtualization::Vm, "declared is_vm".to_string()),
            None => (Virtualization::Physical, "default".to_string()),
        };

        let docker_compose_locations = value
            .get("docker_compose_locations")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            os_type,
            virtualization,
            virtualization_evidence: value
                .get("virtualization_evidence")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(evidence),
            has_docker: flag("has_docker"),
            has_lxc: flag("has_lxc"),
            has_kvm: flag("has_kvm"),
            has_zfs: flag("has_zfs"),
            has_btrfs: flag("has_btrfs"),
            has_lvm: flag("has_lvm"),
            docker_compose_locations,
        }
    }
}

/// Classify a host from its probe results.
pub fn classify(probes: &ProbeSet) -> Capabilities {
    let (virtualization, evidence) = detect_virtualization(probes);

    let docker_compose_locations = probes
        .output(probe::COMPOSE_FILES)
        .map(|o| {
            o.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Capabilities {
        os_type: detect_os(probes),
        virtualization,
        virtualization_evidence: evidence,
        has_docker: probes.contains(probe::DOCKER_VERSION, "Docker version")
            && probes.succeeded(probe::DOCKER_INFO),
        has_lxc: probes.non_empty(probe::LXC_LS),
        has_kvm: probes.contains(probe::LSMOD, "kvm"),
        has_zfs: probes.non_empty(probe::ZPOOL),
        has_btrfs: probes.non_empty(probe::BTRFS),
        has_lvm: probes.non_empty(probe::VGS),
        docker_compose_locations,
    }
}

/// Platform identity, most specific first.
pub fn detect_os(probes: &ProbeSet) -> OsType {
    if probes.non_empty(probe::UNRAID_VERSION) {
        OsType::Unraid
    } else if probes.contains(probe::PVEVERSION, "pve-manager") {
        OsType::Proxmox
    } else if probes.contains(probe::OS_RELEASE, "Ubuntu") {
        OsType::Ubuntu
    } else if probes.contains(probe::OS_RELEASE, "Debian") {
        OsType::Debian
    } else if probes.contains(probe::UNAME, "Linux") {
        OsType::Linux
    } else {
        OsType::Unknown
    }
}

/// Physical/VM/container class plus the signal that decided it.
///
/// Never fails: with no conclusive signal the host is physical.
pub fn detect_virtualization(probes: &ProbeSet) -> (Virtualization, String) {
    if let Some(virt) = probes.output(probe::DETECT_VIRT) {
        let virt = virt.trim().to_lowercase();
        if CONTAINER_VIRT.contains(&virt.as_str()) {
            return (Virtualization::Container, format!("detect-virt: {}", virt));
        }
        if VM_VIRT.contains(&virt.as_str()) {
            return (Virtualization::Vm, format!("detect-virt: {}", virt));
        }
        if virt == "none" {
            return (Virtualization::Physical, "detect-virt: none".to_string());
        }
    }

    if probes.contains(probe::DOCKERENV, "docker") {
        return (Virtualization::Container, "/.dockerenv present".to_string());
    }
    if probes.contains(probe::PROC1_ENVIRON, "lxc") {
        return (Virtualization::Container, "container=lxc in /proc/1/environ".to_string());
    }

    for name in [probe::DMI_PRODUCT_NAME, probe::DMI_SYS_VENDOR] {
        let Some(output) = probes.output(name) else {
            continue;
        };
        let lowered = output.to_lowercase();
        if let Some(keyword) = VM_DMI.iter().find(|k| lowered.contains(*k)) {
            return (Virtualization::Vm, format!("{}: {}", name, keyword));
        }
    }

    (Virtualization::Physical, "default".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn os_detection_is_most_specific_first() {
        let probes = ProbeSet::default()
            .with(probe::UNAME, "Linux pve 6.8.4")
            .with(probe::OS_RELEASE, "NAME=\"Debian GNU/Linux\"")
            .with(probe::PVEVERSION, "pve-manager/8.1.4");
        assert_eq!(detect_os(&probes), OsType::Proxmox);

        let probes = probes.with(probe::UNRAID_VERSION, "version=\"6.12.6\"");
        assert_eq!(detect_os(&probes), OsType::Unraid);

        let probes = ProbeSet::default()
            .with(probe::UNAME, "Linux host")
            .with(probe::OS_RELEASE, "NAME=\"Ubuntu\"");
        assert_eq!(detect_os(&probes), OsType::Ubuntu);

        let probes = ProbeSet::default().with(probe::UNAME, "Linux host");
        assert_eq!(detect_os(&probes), OsType::Linux);
        assert_eq!(detect_os(&ProbeSet::default()), OsType::Unknown);
    }

    #[test]
    fn failed_probes_are_ignored() {
        let mut probes = ProbeSet::default();
        probes.insert(
            probe::PVEVERSION,
            ProbeResult {
                success: false,
                output: "pve-manager".into(),
            },
        );
        assert_eq!(detect_os(&probes), OsType::Unknown);
    }

    #[test]
    fn detect_virt_is_consulted_first() {
        let probes = ProbeSet::default()
            .with(probe::DETECT_VIRT, "kvm\n")
            .with(probe::DOCKERENV, "docker");
        assert_eq!(detect_virtualization(&probes).0, Virtualization::Vm);

        let probes = ProbeSet::default()
            .with(probe::DETECT_VIRT, "lxc")
            .with(probe::DMI_SYS_VENDOR, "QEMU");
        assert_eq!(detect_virtualization(&probes).0, Virtualization::Container);

        let probes = ProbeSet::default()
            .with(probe::DETECT_VIRT, "none")
            .with(probe::DMI_SYS_VENDOR, "QEMU");
        assert_eq!(detect_virtualization(&probes).0, Virtualization::Physical);
    }

    #[test]
    fn falls_back_to_markers_then_dmi() {
        let probes = ProbeSet::default()
            .with(probe::DETECT_VIRT, "weird-value")
            .with(probe::PROC1_ENVIRON, "lxc");
        assert_eq!(detect_virtualization(&probes).0, Virtualization::Container);

        let probes = ProbeSet::default()
            .with(probe::DOCKERENV, "none")
            .with(probe::DMI_PRODUCT_NAME, "VMware Virtual Platform");
        let (virt, evidence) = detect_virtualization(&probes);
        assert_eq!(virt, Virtualization::Vm);
        assert!(evidence.contains("vmware"));
    }

    #[test]
    fn inconclusive_defaults_to_physical() {
        let probes = ProbeSet::default()
            .with(probe::DOCKERENV, "none")
            .with(probe::DMI_PRODUCT_NAME, "PowerEdge R720")
            .with(probe::DMI_SYS_VENDOR, "Dell Inc.");
        assert_eq!(
            detect_virtualization(&probes),
            (Virtualization::Physical, "default".to_string())
        );
        assert!(classify(&ProbeSet::default()).is_physical());
    }

    #[test]
    fn hardware_vendors_in_dmi_are_not_hypervisors() {
        for vendor in ["Oracle Corporation", "Microsoft Corporation"] {
            let probes = ProbeSet::default().with(probe::DMI_SYS_VENDOR, vendor);
            assert_eq!(
                detect_virtualization(&probes),
                (Virtualization::Physical, "default".to_string()),
                "{}",
                vendor
            );
        }
        let probes = ProbeSet::default().with(probe::DETECT_VIRT, "oracle");
        assert_eq!(detect_virtualization(&probes).0, Virtualization::Vm);
        let probes = ProbeSet::default()
            .with(probe::DMI_PRODUCT_NAME, "VirtualBox")
            .with(probe::DMI_SYS_VENDOR, "innotek GmbH");
        assert_eq!(
            detect_virtualization(&probes),
            (Virtualization::Vm, "dmi_product_name: virtualbox".to_string())
        );
    }

    #[test]
    fn capability_flags() {
        let probes = ProbeSet::default()
            .with(probe::DOCKER_VERSION, "Docker version 24.0.7, build afdd53b")
            .with(probe::DOCKER_INFO, "Client:")
            .with(probe::LSMOD, "kvm_intel 372736 0\nkvm 1142784 1 kvm_intel")
            .with(probe::ZPOOL, "")
            .with(probe::VGS, "  pve   1   7   0 wz--n- <446.13g <16.00g")
            .with(probe::COMPOSE_FILES, "/opt/stack/docker-compose.yml\n\n/srv/app/compose.yaml\n");
        let caps = classify(&probes);
        assert!(caps.has_docker);
        assert!(caps.has_kvm);
        assert!(!caps.has_zfs);
        assert!(caps.has_lvm);
        assert!(!caps.has_lxc);
        assert_eq!(caps.features(), vec!["docker", "kvm", "lvm"]);
        assert_eq!(caps.docker_compose_locations.len(), 2);

        let no_daemon = ProbeSet::default().with(probe::DOCKER_VERSION, "Docker version 24.0.7");
        assert!(!classify(&no_daemon).has_docker);
    }

    #[test]
    fn declared_capabilities_accept_flag_style() {
        let caps = Capabilities::from_value(&json!({
            "is_proxmox": true,
            "is_physical": true,
            "has_kvm": true,
            "docker_compose_locations": ["/opt/a.yml", 3]
        }));
        assert_eq!(caps.os_type, OsType::Proxmox);
        assert_eq!(caps.virtualization, Virtualization::Physical);
        assert!(caps.has_kvm);
        assert_eq!(caps.docker_compose_locations, vec!["/opt/a.yml"]);

        let caps = Capabilities::from_value(&json!({"os_type": "ubuntu", "is_lxc": true}));
        assert_eq!(caps.os_type, OsType::Ubuntu);
        assert_eq!(caps.virtualization, Virtualization::Container);

        let caps = Capabilities::from_value(&json!({"virtualization": "vm", "os_type": 5}));
        assert_eq!(caps.virtualization, Virtualization::Vm);
        assert_eq!(caps.os_type, OsType::Unknown);
    }
}
