//! Batch progress reporting.
//!
//! Reports observable progress during `cbt2git fetch`, `convert` and `scan`
//! so users see which archive is being worked on and how many are left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// Batch command the progress belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchPhase {
    Fetching,
    Converting,
    Scanning,
}

impl BatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchPhase::Fetching => "fetching",
            BatchPhase::Converting => "converting",
            BatchPhase::Scanning => "scanning",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Work list is being assembled (listing parsed, stage compared). Total unknown.
    Discovering { phase: BatchPhase },
    /// `n` archives done out of `total`; `archive` is the one just started or finished.
    Advancing {
        phase: BatchPhase,
        archive: String,
        n: u64,
        total: u64,
    },
}

/// Reports batch progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "converting  CBT249  12 / 1,024 archives".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { phase } => {
                format!("{}  discovering...\n", phase.as_str())
            }
            ProgressEvent::Advancing {
                phase,
                archive,
                n,
                total,
            } => format!(
                "{}  {}  {} / {} archives\n",
                phase.as_str(),
                archive,
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { phase } => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
                "state": "discovering"
            }),
            ProgressEvent::Advancing {
                phase,
                archive,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
                "archive": archive,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
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
