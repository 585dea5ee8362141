use crate::batch::BatchOutcome;
use crate::events::BatchEvent;
use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,   // Errors, progress bar and final summary
    Summary = 1,  // Lookup progress, results and retry waits (default)
    Detailed = 2, // Warnings such as cancellation
    Debug = 3,    // Record start markers too
}

impl VerbosityLevel {
    /// Lowest verbosity at which `event` is printed.
    pub fn for_event(event: &BatchEvent) -> Self {
        match event {
            BatchEvent::Progress { .. } => VerbosityLevel::Debug,
            BatchEvent::Log { .. } | BatchEvent::Completed { .. } => VerbosityLevel::Summary,
            BatchEvent::Cancelled { .. } => VerbosityLevel::Detailed,
            BatchEvent::Failed { .. } => VerbosityLevel::Silent,
        }
    }

    fn label(self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "ERROR",
            VerbosityLevel::Summary => "INFO",
            VerbosityLevel::Detailed => "WARN",
            VerbosityLevel::Debug => "DEBUG",
        }
    }

    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }
}

/// Terminal presentation of a batch run.
///
/// Lines are written through the progress bar when one is active so they
/// do not tear it.
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Option<ProgressBar>,
    log_buffer: Vec<String>,
    log_file_path: Option<PathBuf>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: None,
            log_buffer: Vec::new(),
            log_file_path: None,
        }
    }

    /// Also keep every line so it can be written out by [`RunLogger::export_logs`].
    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: PathBuf) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    pub fn info(&mut self, message: &str) {
        self.emit(VerbosityLevel::Summary, "INFO", message);
    }

    /// Whether lines at `min` reach the terminal.
    pub fn shows(&self, min: VerbosityLevel) -> bool {
        self.verbosity >= min
    }

    fn emit(&mut self, min: VerbosityLevel, level: &str, message: &str) {
        let line = format!("[{}] {}: {}", Local::now().format("%H:%M:%S"), level, message);
        if self.log_file_path.is_some() {
            self.log_buffer.push(line.clone());
        }
        if !self.shows(min) {
            return;
        }
        match &self.progress_bar {
            Some(pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }

    /// Progress bar over `total` records. Only drawn on a terminal.
    pub fn start_progress(&mut self, total: usize) {
        if !io::stderr().is_terminal() {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        self.progress_bar = Some(pb);
    }

    pub fn finish_progress(&mut self) {
        if let Some(pb) = self.progress_bar.take() {
            pb.finish_and_clear();
        }
    }

    /// Render one batch event.
    pub fn handle(&mut self, event: &BatchEvent) {
        let message = match event {
            BatchEvent::Progress { name, index, total } => {
                if let Some(pb) = &self.progress_bar {
                    pb.set_position(index.saturating_sub(1) as u64);
                    pb.set_message(name.clone());
                }
                format!("[{}/{}] {}", index, total, name)
            }
            BatchEvent::Log { message } => message.clone(),
            BatchEvent::Completed {
                success_count,
                error_count,
                skipped_count,
            } => {
                if let Some(pb) = &self.progress_bar {
                    pb.set_position(pb.length().unwrap_or(0));
                }
                self.finish_progress();
                format!(
                    "Completed: {} found, {} errors, {} skipped",
                    success_count, error_count, skipped_count
                )
            }
            BatchEvent::Cancelled { processed } => {
                self.finish_progress();
                format!("Cancelled after {} records", processed)
            }
            BatchEvent::Failed { reason } => {
                self.finish_progress();
                reason.clone()
            }
        };
        let level = VerbosityLevel::for_event(event);
        self.emit(level, level.label(), &message);
    }

    /// Summary block on stdout, printed at every verbosity.
    pub fn print_final_summary(&self, outcome: &BatchOutcome, result_path: &Path) {
        println!("\n=== FAX LOOKUP SUMMARY ===");
        println!("Duration: {:.2}s", outcome.duration_secs());
        println!("Records: {}", outcome.total);
        println!("Processed: {}", outcome.processed);
        println!("Found: {}", outcome.success_count);
        println!("Errors: {}", outcome.error_count);
        println!("Skipped (already had a fax number): {}", outcome.skipped_count);
        println!("Results: {}", result_path.display());
        println!("==========================\n");
        if outcome.cancelled {
            println!("Run cancelled. Start it again to resume from the checkpoint.");
        }
    }

    pub fn export_logs(&self) -> Result<()> {
        let Some(path) = &self.log_file_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        for line in &self.log_buffer {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(())
    }

    pub fn log_count(&self) -> usize {
        self.log_buffer.len()
    }
}
