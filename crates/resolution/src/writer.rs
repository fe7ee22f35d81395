//! Writes resolution entries as JSON lines.

use crate::types::{ResolutionEntry, RunHeader, UnitResult};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Buffers resolution entries and writes them to a JSON-lines file.
pub struct ResolutionWriter {
    entries: Vec<ResolutionEntry>,
    output_path: PathBuf,
}

impl ResolutionWriter {
    /// Create a new writer that will write to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            entries: Vec::new(),
            output_path,
        }
    }

    /// Buffer the header of a run.
    pub fn record_run(&mut self, header: RunHeader) {
        self.entries.push(ResolutionEntry::Run(header));
    }

    /// Buffer a single unit result.
    pub fn record(&mut self, result: UnitResult) {
        self.entries.push(ResolutionEntry::Unit(result));
    }

    /// Buffer multiple unit results.
    pub fn record_all(&mut self, results: Vec<UnitResult>) {
        self.entries
            .extend(results.into_iter().map(ResolutionEntry::Unit));
    }

    /// Number of buffered entries (headers included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write all buffered entries and return the output path.
    pub fn finish(self) -> anyhow::Result<PathBuf> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = std::fs::File::create(&self.output_path)?;
        let mut out = BufWriter::new(file);
        for entry in &self.entries {
            serde_json::to_writer(&mut out, entry)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        tracing::info!(
            entries = self.entries.len(),
            path = %self.output_path.display(),
            "Wrote resolution file"
        );

        Ok(self.output_path)
    }
}
