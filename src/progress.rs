//! Ingest progress reporting.
//!
//! Reports observable progress during a single document's ingest pipeline
//! so long-running parses/chunking emit liveness signals at least every 5
//! seconds. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts, same split the HTTP surface keeps between
//! structured `tracing` logs and direct command output.

use std::io::Write;

/// Step of the ingestion pipeline a progress event describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestPhase {
    Intake,
    ParserSelection,
    TextExtraction,
    Chunking,
    Embedding,
    ImageOcr,
    IndexWrite,
    RegistryCommit,
}

impl IngestPhase {
    fn as_str(&self) -> &'static str {
        match self {
            IngestPhase::Intake => "intake",
            IngestPhase::ParserSelection => "parser_selection",
            IngestPhase::TextExtraction => "text_extraction",
            IngestPhase::Chunking => "chunking",
            IngestPhase::Embedding => "embedding",
            IngestPhase::ImageOcr => "image_ocr",
            IngestPhase::IndexWrite => "index_write",
            IngestPhase::RegistryCommit => "registry_commit",
        }
    }
}

/// A single progress event for one document's ingest.
#[derive(Clone, Debug)]
pub struct IngestProgressEvent {
    pub document_id: String,
    pub phase: IngestPhase,
    pub n: u64,
    pub total: u64,
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest doc123  chunking  12 / 40".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = if event.total > 0 {
            format!(
                "ingest {}  {}  {} / {}\n",
                event.document_id,
                event.phase.as_str(),
                format_number(event.n),
                format_number(event.total)
            )
        } else {
            format!("ingest {}  {}\n", event.document_id, event.phase.as_str())
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "document_id": event.document_id,
            "phase": event.phase.as_str(),
            "n": event.n,
            "total": event.total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
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

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn no_progress_does_not_panic() {
        NoProgress.report(IngestProgressEvent {
            document_id: "doc1".to_string(),
            phase: IngestPhase::Chunking,
            n: 1,
            total: 2,
        });
    }
}
