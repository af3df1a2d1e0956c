use crate::models::ExecutionRecord;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only JSONL sink for execution records.
///
/// The file is opened at construction and every append is flushed before
/// returning, so a reader (or a crash) part-way through a campaign sees
/// every completed record. The handle is released when the store drops,
/// on any exit path.
pub struct TranscriptStore {
    path: PathBuf,
    file: File,
}

impl TranscriptStore {
    /// Create a per-run transcript file under `output_dir`. The filename
    /// carries the UTC timestamp and process id so concurrent runs never
    /// clobber each other's records.
    pub fn create(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = output_dir.join(format!("results_{}_{}.jsonl", stamp, std::process::id()));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open transcript file: {}", path.display()))?;

        Ok(Self { path, file })
    }

    /// Path of the transcript file backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line and flush it to disk
    pub fn append(&mut self, record: &ExecutionRecord) -> Result<()> {
        let line =
            serde_json::to_string(record).context("Failed to serialize execution record")?;

        writeln!(self.file, "{}", line).with_context(|| {
            format!("Failed to write transcript record: {}", self.path.display())
        })?;
        self.file
            .flush()
            .with_context(|| format!("Failed to flush transcript file: {}", self.path.display()))?;

        Ok(())
    }
}

/// Read all records from one JSONL file. Blank lines and lines that do not
/// parse (including a partial trailing write from a crashed run) are skipped
/// with a warning; partial results beat none.
pub fn read_records(path: &Path) -> Result<Vec<ExecutionRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open transcript file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line
            .with_context(|| format!("Failed to read transcript file: {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExecutionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                file = %path.display(),
                line = index + 1,
                error = %e,
                "skipping unparseable transcript line"
            ),
        }
    }

    Ok(records)
}

/// Load every transcript from all `*.jsonl` files in a directory, in sorted
/// filename order. Best-effort: an unreadable directory or file is skipped
/// with a warning rather than aborting aggregation.
pub fn load_all_transcripts(results_dir: &Path) -> Vec<ExecutionRecord> {
    let entries = match std::fs::read_dir(results_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %results_dir.display(), error = %e, "cannot read results directory");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "jsonl"))
        .collect();
    files.sort();

    let mut transcripts = Vec::new();
    for path in files {
        match read_records(&path) {
            Ok(mut records) => transcripts.append(&mut records),
            Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable transcript file"),
        }
    }

    transcripts
}

/// Write the metrics document to a timestamped JSON file in `output_dir`
pub fn write_metrics_summary<T: Serialize>(metrics: &T, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create output directory: {}", output_dir.display())
    })?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = output_dir.join(format!("metrics_summary_{}.json", stamp));

    let json = serde_json::to_string_pretty(metrics).context("Failed to serialize metrics")?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write metrics summary: {}", path.display()))?;

    Ok(path)
}
