// Command-line interface definitions

use clap::Parser;
use std::time::Duration;

use crate::aggregate::{DedupStrategy, SortStrategy};

/// Sort orders selectable from the command line or a config file
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Natural,
    TimestampAsc,
    TimestampDesc,
    ContentAsc,
    ContentDesc,
}

impl From<SortKey> for SortStrategy {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Natural => SortStrategy::Natural,
            SortKey::TimestampAsc => SortStrategy::TimestampAsc,
            SortKey::TimestampDesc => SortStrategy::TimestampDesc,
            SortKey::ContentAsc => SortStrategy::ContentAsc,
            SortKey::ContentDesc => SortStrategy::ContentDesc,
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value.trim())
}

#[derive(Parser, Debug, Default)]
#[command(name = "chunkmill")]
#[command(about = "Split a directory of text, CSV and JSON files into chunks and process them in parallel")]
#[command(
    long_about = "Split a directory of text, CSV and JSON files into chunks and process them in parallel\n\nEvery non-blank line becomes a record. Records from all chunks are merged,\ndeduplicated and sorted before the run summary is printed.\n\nCOMMON EXAMPLES:\n  chunkmill logs/ out/ -t 8 -c 500\n  chunkmill data/ --dedup content --sort timestamp-desc --emit > records.jsonl\n  chunkmill data/ --transform upper,add-line-number --timeout 30s"
)]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Directory to read input files from [default: input]
    pub input_dir: Option<String>,

    /// Directory for results, created if missing [default: output]
    pub output_dir: Option<String>,

    /// Only process files whose name matches this regex [default: (?i)^.*\.(txt|csv|json)$]
    #[arg(long = "pattern", help_heading = "Input Options")]
    pub pattern: Option<String>,

    /// Succeed with an empty summary when no input files are found
    #[arg(long = "allow-empty", help_heading = "Input Options")]
    pub allow_empty: bool,

    /// Lines per chunk [default: 1000]
    #[arg(short = 'c', long = "chunk-size", help_heading = "Processing Options")]
    pub chunk_size: Option<usize>,

    /// Comma-separated line transforms applied in order: identity, upper, lower, trim, add-line-number
    #[arg(long = "transform", value_delimiter = ',', help_heading = "Processing Options")]
    pub transforms: Vec<String>,

    /// Maximum wait for each chunk's result, e.g. 30s or 5m [default: 5m]
    #[arg(long = "timeout", value_parser = parse_duration, help_heading = "Processing Options")]
    pub timeout: Option<Duration>,

    /// Keep duplicate records
    #[arg(long = "no-dedup", help_heading = "Output Options")]
    pub no_dedup: bool,

    /// Which fields identify a duplicate [default: id]
    #[arg(long = "dedup", value_enum, help_heading = "Output Options")]
    pub dedup: Option<DedupStrategy>,

    /// Keep records in merge order
    #[arg(long = "no-sort", help_heading = "Output Options")]
    pub no_sort: bool,

    /// Final record order [default: natural]
    #[arg(long = "sort", value_enum, help_heading = "Output Options")]
    pub sort: Option<SortKey>,

    /// Print final records to stdout as JSON lines (summary moves to stderr)
    #[arg(long = "emit", help_heading = "Output Options")]
    pub emit: bool,

    /// Core worker threads, 0 for one per CPU [default: 4]
    #[arg(short = 't', long = "threads", help_heading = "Performance Options")]
    pub threads: Option<usize>,

    /// Upper bound on worker threads [default: 2 x threads]
    #[arg(long = "max-threads", help_heading = "Performance Options")]
    pub max_threads: Option<usize>,

    /// Pending chunks allowed before the submitter runs work itself [default: 100]
    #[arg(long = "queue-capacity", help_heading = "Performance Options")]
    pub queue_capacity: Option<usize>,

    /// Idle time before an overflow worker exits [default: 60s]
    #[arg(long = "keep-alive", value_parser = parse_duration, help_heading = "Performance Options")]
    pub keep_alive: Option<Duration>,

    /// How long shutdown waits for in-flight work [default: 60s]
    #[arg(long = "shutdown-grace", value_parser = parse_duration, help_heading = "Performance Options")]
    pub shutdown_grace: Option<Duration>,

    /// Use this config file instead of the discovered ones
    #[arg(long = "config-file", help_heading = "Configuration Options")]
    pub config_file: Option<String>,

    /// Ignore all config files
    #[arg(long = "ignore-config", help_heading = "Configuration Options")]
    pub ignore_config: bool,

    /// Print config file locations and effective settings, then exit
    #[arg(long = "show-config", help_heading = "Configuration Options")]
    pub show_config: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
