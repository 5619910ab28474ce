//! Ingest progress reporting.
//!
//! Progress goes to **stderr** so the run summary on stdout stays
//! parseable. Notifications are count-based: the coordinator reports every
//! `ingest.progress_every` rows read, and the loader every
//! `progress_every` records committed. They are a side effect only.

use std::io::Write;
use std::sync::Mutex;

use crate::models::Collection;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Rows read (tokenized and built) so far from `file`.
    Reading { file: String, rows: u64 },
    /// Records of `collection` committed so far out of `total`.
    Loading {
        file: String,
        collection: Collection,
        done: u64,
        total: u64,
    },
}

/// Receives progress events from the coordinator and loader.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr:
/// `ingest bookings_2024.csv  loading bookings  1,000 / 5,000`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Reading { file, rows } => {
                format!("ingest {}  reading  {} rows\n", file, format_number(*rows))
            }
            ProgressEvent::Loading {
                file,
                collection,
                done,
                total,
            } => format!(
                "ingest {}  loading {}  {} / {}\n",
                file,
                collection,
                format_number(*done),
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
            ProgressEvent::Reading { file, rows } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "reading",
                "rows": rows
            }),
            ProgressEvent::Loading {
                file,
                collection,
                done,
                total,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "loading",
                "collection": collection,
                "done": done,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory, in arrival order.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
