// checkpoint.rs - intermediate and final persistence of the record table
//
// A long batch writes the whole table to a checkpoint file every few records
// and to the result file at the end (or when cancelled). A later run can pick
// the checkpoint up again so rows that already have a fax number are skipped.

use crate::records::RecordTable;
use anyhow::{Context, Result};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Receives table snapshots from the batch driver.
pub trait RecordSink: Send {
    /// Intermediate snapshot after `processed` records. Failures are logged
    /// by the driver and do not stop the batch.
    fn checkpoint(&mut self, table: &RecordTable, processed: usize) -> Result<()>;

    /// Final write, once per run. `completed` is false when the run was cancelled.
    fn finish(&mut self, table: &RecordTable, completed: bool) -> Result<()>;
}

/// Write `table` to `path` via a temp file and rename, so an interrupted
/// write never leaves a truncated file behind.
pub fn write_table_atomic(table: &RecordTable, path: &Path, bom: bool) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    {
        let file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        let mut writer = BufWriter::new(file);
        table.write_csv(&mut writer, bom)?;
        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush table")?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Checkpoint and result locations for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub checkpoint: PathBuf,
    pub result: PathBuf,
}

impl OutputPaths {
    /// `<dir>/<stem><suffix>.csv` next to the input for both files.
    pub fn derive(input: &Path, checkpoint_suffix: &str, result_suffix: &str) -> Self {
        let dir = input.parent().unwrap_or_else(|| Path::new(""));
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "records".to_string());
        Self {
            checkpoint: dir.join(format!("{}{}.csv", stem, checkpoint_suffix)),
            result: dir.join(format!("{}{}.csv", stem, result_suffix)),
        }
    }
}

/// Writes snapshots as CSV files.
#[derive(Debug, Clone)]
pub struct CsvSink {
    paths: OutputPaths,
    bom: bool,
}

impl CsvSink {
    pub fn new(paths: OutputPaths, bom: bool) -> Self {
        Self { paths, bom }
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }
}

impl RecordSink for CsvSink {
    fn checkpoint(&mut self, table: &RecordTable, processed: usize) -> Result<()> {
        write_table_atomic(table, &self.paths.checkpoint, self.bom)?;
        debug!("Checkpoint after {} records written to {}", processed, self.paths.checkpoint.display());
        Ok(())
    }

    fn finish(&mut self, table: &RecordTable, completed: bool) -> Result<()> {
        write_table_atomic(table, &self.paths.result, self.bom)?;
        info!("Results written to {}", self.paths.result.display());

        // A cancelled run keeps its snapshot up to date for the next resume.
        if completed {
            if self.paths.checkpoint.exists() {
                fs::remove_file(&self.paths.checkpoint)?;
            }
        } else {
            write_table_atomic(table, &self.paths.checkpoint, self.bom)?;
        }
        Ok(())
    }
}

/// Keeps snapshots in memory. Useful for headless callers and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// `processed` count of every checkpoint, in order
    pub checkpoints: Vec<usize>,
    /// `completed` flag of every final write
    pub finishes: Vec<bool>,
    pub last: Option<RecordTable>,
}

impl RecordSink for MemorySink {
    fn checkpoint(&mut self, table: &RecordTable, processed: usize) -> Result<()> {
        self.checkpoints.push(processed);
        self.last = Some(table.clone());
        Ok(())
    }

    fn finish(&mut self, table: &RecordTable, completed: bool) -> Result<()> {
        self.finishes.push(completed);
        self.last = Some(table.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Continue from the checkpoint if there is one
    #[default]
    AutoResume,
    /// Ignore any existing checkpoint
    Fresh,
}

/// The table to process: the checkpoint when resuming from a compatible one,
/// the input otherwise. The flag says whether the checkpoint was used.
pub fn load_for_run(input: &Path, checkpoint: &Path, mode: ResumeMode) -> Result<(RecordTable, bool)> {
    let fresh = RecordTable::from_csv_path(input)?;
    if mode == ResumeMode::Fresh || !checkpoint.exists() {
        return Ok((fresh, false));
    }

    match RecordTable::from_csv_path(checkpoint) {
        Ok(saved) if saved.len() == fresh.len() => {
            info!("Resuming from checkpoint {}", checkpoint.display());
            Ok((saved, true))
        }
        Ok(saved) => {
            warn!(
                "Ignoring checkpoint {}: it has {} rows but the input has {}",
                checkpoint.display(),
                saved.len(),
                fresh.len()
            );
            Ok((fresh, false))
        }
        Err(e) => {
            warn!("Ignoring unreadable checkpoint {}: {:#}", checkpoint.display(), e);
            Ok((fresh, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record;
    use tempfile::TempDir;

    fn sample() -> RecordTable {
        RecordTable::new(vec![
            Record::new("A", Some("http://a.test/")).with_fax("03-1111-2222"),
            Record::new("B", None),
        ])
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::derive(Path::new("/data/clinics.csv"), "_temp", "_result");
        assert_eq!(paths.checkpoint, PathBuf::from("/data/clinics_temp.csv"));
        assert_eq!(paths.result, PathBuf::from("/data/clinics_result.csv"));

        let paths = OutputPaths::derive(Path::new("list.csv"), "_temp", "_result");
        assert_eq!(paths.result, PathBuf::from("list_result.csv"));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        write_table_atomic(&sample(), &path, true).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(crate::records::UTF8_BOM));
        assert_eq!(RecordTable::from_csv_bytes(&bytes).unwrap(), sample());
        assert!(!dir.path().join("out.csv.tmp").exists());
    }

    #[test]
    fn test_csv_sink_completion_removes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let paths = OutputPaths::derive(&dir.path().join("in.csv"), "_temp", "_result");
        let mut sink = CsvSink::new(paths.clone(), false);

        sink.checkpoint(&sample(), 10).unwrap();
        assert!(paths.checkpoint.exists());
        sink.finish(&sample(), true).unwrap();
        assert!(paths.result.exists());
        assert!(!paths.checkpoint.exists());
    }

    #[test]
    fn test_csv_sink_cancellation_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let paths = OutputPaths::derive(&dir.path().join("in.csv"), "_temp", "_result");
        let mut sink = CsvSink::new(paths.clone(), false);

        sink.finish(&sample(), false).unwrap();
        assert!(paths.result.exists());
        assert!(paths.checkpoint.exists());
    }

    #[test]
    fn test_resume_uses_matching_checkpoint() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.csv");
        let checkpoint = dir.path().join("in_temp.csv");
        let mut blank = sample();
        blank.records_mut()[0].fax = None;
        write_table_atomic(&blank, &input, false).unwrap();
        write_table_atomic(&sample(), &checkpoint, false).unwrap();

        let (table, resumed) = load_for_run(&input, &checkpoint, ResumeMode::AutoResume).unwrap();
        assert!(resumed);
        assert!(table.records()[0].has_fax());

        let (table, resumed) = load_for_run(&input, &checkpoint, ResumeMode::Fresh).unwrap();
        assert!(!resumed);
        assert!(!table.records()[0].has_fax());
    }

    #[test]
    fn test_resume_ignores_mismatched_checkpoint() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.csv");
        let checkpoint = dir.path().join("in_temp.csv");
        write_table_atomic(&sample(), &input, false).unwrap();
        write_table_atomic(&RecordTable::new(vec![Record::new("Only", None)]), &checkpoint, false).unwrap();

        let (table, resumed) = load_for_run(&input, &checkpoint, ResumeMode::AutoResume).unwrap();
        assert!(!resumed);
        assert_eq!(table.len(), 2);
    }
}
