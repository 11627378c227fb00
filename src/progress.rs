//! Processing progress reporting.
//!
//! Reports what `infradoc process` is working on: which system is being
//! built and how far tagging has got. Progress goes to **stderr** so
//! stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Building documents for system `n` of `total`.
    Building { system: String, n: u64, total: u64 },
    /// `n` of `total` documents tagged.
    Tagging { n: u64, total: u64 },
    /// Writing the store.
    Merging { documents: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "process pve1  building  2 / 5 systems".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Building { system, n, total } => {
                format!("process {}  building  {} / {} systems\n", system, n, total)
            }
            ProgressEvent::Tagging { n, total } => format!(
                "process  tagging  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Merging { documents } => format!(
                "process  merging  {} documents\n",
                format_number(*documents)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Building { system, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "building",
                "system": system,
                "n": n,
                "total": total
            }),
            ProgressEvent::Tagging { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "tagging",
                "n": n,
                "total": total
            }),
            ProgressEvent::Merging { documents } => serde_json::json!({
                "event": "progress",
                "phase": "merging",
                "documents": documents
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
