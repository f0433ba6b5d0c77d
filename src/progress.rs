//! Repository ingestion progress reporting.
//!
//! Reports what a full ingestion is doing (which directory is being
//! scanned, how many documents have been flushed) so long rebuilds are
//! observable. Progress goes to **stderr** so stdout remains parseable.

use std::io::Write;
use std::sync::Arc;

/// A single progress event for repository ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Listing a directory; `pending` directories are still queued.
    Scanning {
        repository: String,
        directory: String,
        pending: usize,
    },
    /// A batch was written to the index.
    Flushed {
        repository: String,
        written: u64,
        failed: u64,
        files_seen: u64,
    },
}

/// Receives ingestion progress. Called from the ingestion loop.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest demo  indexed  1,234 (seen 5,000)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Scanning {
                repository,
                directory,
                pending,
            } => {
                let dir = if directory.is_empty() { "/" } else { directory };
                format!(
                    "ingest {}  scanning {}  ({} queued)\n",
                    repository,
                    dir,
                    format_number(*pending as u64)
                )
            }
            IngestProgressEvent::Flushed {
                repository,
                written,
                failed,
                files_seen,
            } => format!(
                "ingest {}  indexed {}  failed {}  (seen {})\n",
                repository,
                format_number(*written),
                format_number(*failed),
                format_number(*files_seen)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Scanning {
                repository,
                directory,
                pending,
            } => serde_json::json!({
                "event": "progress",
                "repository": repository,
                "phase": "scanning",
                "directory": directory,
                "pending": pending
            }),
            IngestProgressEvent::Flushed {
                repository,
                written,
                failed,
                files_seen,
            } => serde_json::json!({
                "event": "progress",
                "repository": repository,
                "phase": "flushed",
                "written": written,
                "failed": failed,
                "files_seen": files_seen
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

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
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
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
