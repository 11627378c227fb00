//! `infradoc sources`: what a `process` run would read.
//!
//! Lists every discovered snapshot file with the system it belongs to and
//! whether it loads, followed by the registered section builders.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::builders::BuilderRegistry;
use crate::config::Config;
use crate::snapshot::{discover_snapshots, load_snapshot};

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub path: PathBuf,
    pub system: Option<String>,
    pub sections: Vec<String>,
    pub error: Option<String>,
}

pub fn inspect_sources(config: &Config) -> Result<Vec<SourceStatus>> {
    let mut out = Vec::new();
    for path in discover_snapshots(&config.snapshots)? {
        let status = match load_snapshot(&path) {
            Ok(snapshot) => SourceStatus {
                system: Some(snapshot.system_name.clone()),
                sections: snapshot.sections.keys().cloned().collect(),
                error: None,
                path,
            },
            Err(e) => SourceStatus {
                system: None,
                sections: Vec::new(),
                error: Some(format!("{:#}", e)),
                path,
            },
        };
        out.push(status);
    }
    Ok(out)
}

pub fn list_sources(config: &Config) -> Result<()> {
    let sources = inspect_sources(config)?;

    println!("{:<20} {:<8} {:<6} PATH", "SYSTEM", "STATUS", "SECTS");
    for s in &sources {
        let status = if s.error.is_some() { "ERROR" } else { "OK" };
        println!(
            "{:<20} {:<8} {:<6} {}",
            s.system.as_deref().unwrap_or("-"),
            status,
            s.sections.len(),
            s.path.display()
        );
        if let Some(err) = &s.error {
            println!("    {}", err);
        }
    }
    if sources.is_empty() {
        println!("(no snapshots under {})", config.snapshots.dir.display());
    }

    println!();
    println!("{:<20} DESCRIPTION", "BUILDER");
    for builder in BuilderRegistry::builtin().list() {
        println!("{:<20} {}", builder.section(), builder.description());
    }

    Ok(())
}
