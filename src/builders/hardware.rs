//! Hardware summary: CPU, memory, storage and GPUs of one system.
//!
//! Physical hosts report a `hardware` section; guests report a
//! `hardware_allocation` section with the same shape plus
//! `cpu.allocated_vcpus`. When both are present only `hardware` is used.

use anyhow::{bail, Result};
use infradoc_core::models::{kind, system_entity_id, EntityDocument, Relationship, OWNER_FIELD};
use infradoc_core::relationship::{create_bidirectional, EntityRef, RelationshipType};
use serde_json::{json, Value};

use super::{format_amount, number, path, str_at, BuildContext, BuildOutput, SectionBuilder};

pub const SECTION: &str = "hardware";
pub const ALLOCATION_SECTION: &str = "hardware_allocation";

pub struct HardwareBuilder {
    section: &'static str,
}

impl HardwareBuilder {
    pub fn physical() -> Self {
        Self { section: SECTION }
    }

    pub fn allocation() -> Self {
        Self {
            section: ALLOCATION_SECTION,
        }
    }
}

impl SectionBuilder for HardwareBuilder {
    fn section(&self) -> &str {
        self.section
    }

    fn description(&self) -> &str {
        "CPU, memory, storage and GPU summary"
    }

    fn build(&self, ctx: &BuildContext<'_>, data: &Value) -> Result<BuildOutput> {
        if !data.is_object() {
            bail!("'{}' section must be an object", self.section);
        }
        let mut output = BuildOutput::default();
        if self.section == ALLOCATION_SECTION && ctx.snapshot.section(SECTION).is_some() {
            return Ok(output);
        }
        let id = system_entity_id(kind::HARDWARE, ctx.system);
        output.isolate(ctx, self.section, &id, || build_hardware(ctx, &id, data));
        Ok(output)
    }
}

#[derive(Debug, Default, PartialEq)]
struct HardwareSummary {
    cpu_model: Option<String>,
    cores: Option<f64>,
    threads: Option<f64>,
    allocated_vcpus: Option<f64>,
    memory_gb: Option<f64>,
    storage_sizes_gb: Vec<f64>,
    gpus: Vec<String>,
}

impl HardwareSummary {
    fn read(data: &Value) -> Self {
        let cpu = data.get("cpu");
        let cpu_num = |keys: &[&str]| {
            cpu.and_then(|c| keys.iter().find_map(|k| number(c.get(*k))))
        };

        let storage_devices = path(data, &["storage", "devices"])
            .or_else(|| data.get("storage_devices"))
            .and_then(Value::as_array);
        let storage_sizes_gb = storage_devices
            .map(|devs| devs.iter().filter_map(|d| number(d.get("size_gb"))).collect())
            .unwrap_or_default();

        let gpus = data
            .get("gpus")
            .and_then(Value::as_array)
            .map(|gpus| {
                gpus.iter()
                    .filter_map(|g| {
                        let name = [str_at(g, &["vendor"]), str_at(g, &["model"])]
                            .into_iter()
                            .flatten()
                            .collect::<Vec<_>>()
                            .join(" ");
                        (!name.is_empty()).then_some(name)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            cpu_model: cpu.and_then(|c| str_at(c, &["model_name"])).map(str::to_string),
            cores: cpu_num(&["cores", "physical_cores"]),
            threads: cpu_num(&["threads", "logical_cores"]),
            allocated_vcpus: cpu_num(&["allocated_vcpus"]),
            memory_gb: number(path(data, &["memory", "total_gb"])),
            storage_sizes_gb,
            gpus,
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn build_hardware(
    ctx: &BuildContext<'_>,
    id: &str,
    data: &Value,
) -> Result<(EntityDocument, Vec<Relationship>)> {
    let hw = HardwareSummary::read(data);
    if hw.is_empty() {
        bail!("no recognisable hardware fields");
    }
    let virtualized = hw.allocated_vcpus.is_some();

    let mut parts = Vec::new();
    parts.push(if virtualized {
        format!("{} has the following allocated resources.", ctx.system)
    } else {
        format!("{} hardware configuration.", ctx.system)
    });
    if let Some(vcpus) = hw.allocated_vcpus {
        parts.push(format!("Allocated {} vCPUs.", format_amount(vcpus)));
    }
    let mut cpu = Vec::new();
    if let Some(model) = &hw.cpu_model {
        cpu.push(model.clone());
    }
    if let Some(cores) = hw.cores {
        cpu.push(format!("{} cores", format_amount(cores)));
    }
    if let Some(threads) = hw.threads {
        cpu.push(format!("{} threads", format_amount(threads)));
    }
    if !cpu.is_empty() {
        parts.push(format!("CPU: {}.", cpu.join(", ")));
    }
    if let Some(mem) = hw.memory_gb {
        parts.push(format!("Memory: {}GB.", format_amount(mem)));
    }
    let total_storage: f64 = hw.storage_sizes_gb.iter().sum();
    if !hw.storage_sizes_gb.is_empty() {
        parts.push(format!(
            "Storage: {} device(s) totalling {}GB.",
            hw.storage_sizes_gb.len(),
            format_amount(total_storage)
        ));
    }
    if !hw.gpus.is_empty() {
        parts.push(format!("GPUs: {}.", hw.gpus.join(", ")));
    }

    let mut doc = EntityDocument::new(
        id,
        kind::HARDWARE,
        format!("{} hardware", ctx.system),
        parts.join(" "),
    );
    doc.set_meta(OWNER_FIELD, ctx.system);
    doc.set_meta("hosted_by", ctx.system);
    doc.set_meta("virtualized", virtualized);
    if let Some(model) = &hw.cpu_model {
        doc.set_meta("cpu_model", model.as_str());
    }
    for (key, value) in [
        ("cpu_cores", hw.cores),
        ("cpu_threads", hw.threads),
        ("allocated_vcpus", hw.allocated_vcpus),
        ("memory_gb", hw.memory_gb),
    ] {
        if let Some(v) = value {
            doc.set_meta(key, v);
        }
    }
    doc.set_meta("storage_device_count", hw.storage_sizes_gb.len());
    doc.set_meta("storage_total_gb", total_storage);
    doc.set_meta("gpu_count", hw.gpus.len());
    doc.set_meta("gpus", json!(hw.gpus));
    doc.details = Some(data.clone());

    doc.add_tags(["hardware"]);
    if !hw.gpus.is_empty() {
        doc.add_tags(["gpu"]);
    }
    if virtualized {
        doc.add_tags(["virtualized"]);
    }

    let rels = create_bidirectional(
        EntityRef::new(id, kind::HARDWARE),
        ctx.host_ref(),
        RelationshipType::PartOf,
        None,
    );
    Ok((doc, rels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::snapshot;
    use infradoc_core::cluster::ClusterRules;

    #[test]
    fn physical_hardware_summary() {
        let snap = snapshot(
            "nas01",
            json!({
                "hardware": {
                    "cpu": {"model_name": "AMD Ryzen 7 5700G", "physical_cores": 8, "logical_cores": "16"},
                    "memory": {"total_gb": 62.7},
                    "storage": {"devices": [{"size_gb": 4000}, {"size_gb": 4000}, {"size_gb": 500}]},
                    "gpus": [{"vendor": "NVIDIA", "model": "RTX 3060"}]
                }
            }),
        );
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = HardwareBuilder::physical()
            .build(&ctx, snap.section("hardware").unwrap())
            .unwrap();

        let doc = &out.documents[0];
        assert_eq!(doc.id, "hardware_nas01");
        assert!(doc.content.contains("CPU: AMD Ryzen 7 5700G, 8 cores, 16 threads."));
        assert!(doc.content.contains("Memory: 62.7GB."));
        assert!(doc.content.contains("3 device(s) totalling 8500GB"));
        assert!(doc.content.contains("GPUs: NVIDIA RTX 3060."));
        assert!(doc.tags.contains("gpu"));

        assert_eq!(out.relationships.len(), 2);
        assert_eq!(out.relationships[0].rel_type, RelationshipType::PartOf);
        assert_eq!(out.relationships[0].target_id, "server_nas01");
        assert_eq!(out.relationships[1].rel_type, RelationshipType::Contains);
    }

    #[test]
    fn allocation_defers_to_hardware_section() {
        let snap = snapshot(
            "vm1",
            json!({
                "hardware": {"memory": {"total_gb": 8}},
                "hardware_allocation": {"cpu": {"allocated_vcpus": 4}}
            }),
        );
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = HardwareBuilder::allocation()
            .build(&ctx, snap.section(ALLOCATION_SECTION).unwrap())
            .unwrap();
        assert!(out.documents.is_empty());
    }

    #[test]
    fn allocation_is_described_as_allocated() {
        let snap = snapshot(
            "vm1",
            json!({"hardware_allocation": {"cpu": {"allocated_vcpus": 4}, "memory": {"total_gb": 8}}}),
        );
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = HardwareBuilder::allocation()
            .build(&ctx, snap.section(ALLOCATION_SECTION).unwrap())
            .unwrap();
        let doc = &out.documents[0];
        assert!(doc.content.contains("Allocated 4 vCPUs."));
        assert_eq!(doc.metadata["virtualized"], json!(true));
    }

    #[test]
    fn empty_hardware_is_an_entity_failure() {
        let snap = snapshot("x", json!({"hardware": {"unrelated": true}}));
        let caps = snap.capabilities();
        let rules = ClusterRules::default();
        let ctx = BuildContext::new(&snap, &caps, &rules);
        let out = HardwareBuilder::physical()
            .build(&ctx, snap.section("hardware").unwrap())
            .unwrap();
        assert!(out.documents.is_empty());
        assert_eq!(out.failures.len(), 1);
    }
}
