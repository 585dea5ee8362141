use crate::checkpoint::ResumeMode;
use crate::config::AppConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "faxfinder")]
#[command(about = "Finds fax numbers for organizations by searching for and scanning their web pages")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Create default configuration file at ./config/faxfinder.toml
    #[arg(long, global = true)]
    pub init: bool,

    /// Configuration file (defaults to ./config/faxfinder.toml, then built-in defaults)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose logging (use -v for warnings, -vv for debug output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fill in the FAX番号 column of a CSV file
    Run {
        /// CSV file whose first column is the organization name
        input: PathBuf,

        /// Result file (defaults to <input>_result.csv)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Checkpoint file (defaults to <input>_temp.csv)
        #[arg(long, value_name = "FILE")]
        checkpoint: Option<PathBuf>,

        /// Start fresh, ignore any existing checkpoint (by default a run
        /// continues from its checkpoint)
        #[arg(long)]
        fresh: bool,

        /// Write a JSON summary of the run
        #[arg(long, value_name = "FILE")]
        summary: Option<PathBuf>,

        /// Export execution logs to a file
        #[arg(long, value_name = "FILE")]
        log_file: Option<PathBuf>,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Look up the fax number of a single organization
    Lookup {
        /// Organization name
        name: String,

        /// Page to extract from instead of searching
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Extract a fax number from one HTML page
    Extract {
        /// Local HTML file
        #[arg(long, value_name = "FILE", conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,

        /// Page URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Scan extracted document text for (DDD-DDD-DDDD) numbers
    Scan {
        /// Text file, pages separated by form feeds
        input: PathBuf,

        /// CSV output (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

impl Commands {
    pub fn resume_mode(&self) -> ResumeMode {
        match self {
            Commands::Run { fresh: true, .. } => ResumeMode::Fresh,
            _ => ResumeMode::AutoResume,
        }
    }
}

/// Flags that override the `[retry]` and `[batch]` configuration.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    /// Maximum retries per request (overrides config)
    #[arg(long, value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Base retry delay in seconds (overrides config)
    #[arg(long, value_name = "SECS")]
    pub base_delay: Option<u64>,

    /// Pause between records in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    pub pause_ms: Option<u64>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(base_delay) = self.base_delay {
            config.retry.base_delay_secs = base_delay;
        }
        if let Some(pause_ms) = self.pause_ms {
            config.batch.record_pause_ms = pause_ms;
        }
    }
}
