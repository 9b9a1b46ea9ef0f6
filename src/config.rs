use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use regex::Regex;
use std::fmt;
use std::time::Duration;

use crate::aggregate::{DedupStrategy, SortStrategy};
use crate::cli::{parse_duration, Cli, SortKey};
use crate::config_file::ConfigFile;
use crate::parallel::DEFAULT_COLLECT_TIMEOUT;

pub const DEFAULT_FILE_PATTERN: &str = r"(?i)^.*\.(txt|csv|json)$";

/// Worker pool sizing and lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub core_threads: usize,
    pub max_threads: usize,
    pub queue_capacity: usize,
    /// Idle time after which a thread above the core count exits
    pub keep_alive: Duration,
    /// How long shutdown waits for queued and running work
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::with_core_threads(4)
    }
}

impl PoolConfig {
    pub fn with_core_threads(core_threads: usize) -> Self {
        Self {
            core_threads,
            max_threads: core_threads.saturating_mul(2),
            queue_capacity: 100,
            keep_alive: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(60),
        }
    }

    /// Clamp into a usable shape: at least one core thread, max >= core,
    /// room for at least one queued task
    pub fn normalized(mut self) -> Self {
        self.core_threads = self.core_threads.max(1);
        self.max_threads = self.max_threads.max(self.core_threads);
        self.queue_capacity = self.queue_capacity.max(1);
        self
    }
}

/// Main configuration, grouped like the command line
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub input: InputConfig,
    pub processing: ProcessingConfig,
    pub output: OutputConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone)]
pub struct InputConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub file_pattern: String,
    /// An input directory without usable files is an error
    pub require_input: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub chunk_size: usize,
    /// Transform names applied in order; empty means the default chain
    pub transforms: Vec<String>,
    pub collect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub remove_duplicates: bool,
    pub dedup_strategy: DedupStrategy,
    pub sort_output: bool,
    pub sort_key: SortKey,
    pub emit: bool,
}

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// 0 means one per CPU
    pub threads: usize,
    /// Defaults to twice the effective thread count
    pub max_threads: Option<usize>,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            input: InputConfig {
                input_dir: "input".to_string(),
                output_dir: "output".to_string(),
                file_pattern: DEFAULT_FILE_PATTERN.to_string(),
                require_input: true,
            },
            processing: ProcessingConfig {
                chunk_size: 1000,
                transforms: Vec::new(),
                collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            },
            output: OutputConfig {
                remove_duplicates: true,
                dedup_strategy: DedupStrategy::Id,
                sort_output: true,
                sort_key: SortKey::Natural,
                emit: false,
            },
            performance: PerformanceConfig {
                threads: pool.core_threads,
                max_threads: None,
                queue_capacity: pool.queue_capacity,
                keep_alive: pool.keep_alive,
                shutdown_grace: pool.shutdown_grace,
            },
        }
    }
}

impl ProcessorConfig {
    /// Defaults, overlaid by the config file (if any), overlaid by the CLI
    pub fn from_cli(cli: &Cli, file: Option<&ConfigFile>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(file) = file {
            config.apply_file(file)?;
        }
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: &ConfigFile) -> Result<()> {
        for (key, value) in &file.pipeline {
            self.apply_setting(key, value)
                .with_context(|| format!("Invalid config value {} = {}", key, value))?;
        }
        Ok(())
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "input_dir" => self.input.input_dir = value.to_string(),
            "output_dir" => self.input.output_dir = value.to_string(),
            "pattern" => self.input.file_pattern = value.to_string(),
            "allow_empty" => self.input.require_input = !parse_bool(value)?,
            "chunk_size" => self.processing.chunk_size = value.parse()?,
            "transform" => {
                self.processing.transforms = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "timeout" => self.processing.collect_timeout = parse_duration(value)?,
            "dedup" => match value {
                "none" | "off" => self.output.remove_duplicates = false,
                _ => {
                    self.output.remove_duplicates = true;
                    self.output.dedup_strategy =
                        DedupStrategy::from_str(value, true).map_err(|e| anyhow!(e))?;
                }
            },
            "sort" => match value {
                "none" | "off" => self.output.sort_output = false,
                _ => {
                    self.output.sort_output = true;
                    self.output.sort_key = SortKey::from_str(value, true).map_err(|e| anyhow!(e))?;
                }
            },
            "threads" => self.performance.threads = value.parse()?,
            "max_threads" => self.performance.max_threads = Some(value.parse()?),
            "queue_capacity" => self.performance.queue_capacity = value.parse()?,
            "keep_alive" => self.performance.keep_alive = parse_duration(value)?,
            "shutdown_grace" => self.performance.shutdown_grace = parse_duration(value)?,
            other => return Err(anyhow!("unknown setting '{}'", other)),
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.input_dir {
            self.input.input_dir = dir.clone();
        }
        if let Some(dir) = &cli.output_dir {
            self.input.output_dir = dir.clone();
        }
        if let Some(pattern) = &cli.pattern {
            self.input.file_pattern = pattern.clone();
        }
        if cli.allow_empty {
            self.input.require_input = false;
        }
        if let Some(size) = cli.chunk_size {
            self.processing.chunk_size = size;
        }
        if !cli.transforms.is_empty() {
            self.processing.transforms = cli.transforms.clone();
        }
        if let Some(timeout) = cli.timeout {
            self.processing.collect_timeout = timeout;
        }
        if let Some(strategy) = cli.dedup {
            self.output.remove_duplicates = true;
            self.output.dedup_strategy = strategy;
        }
        if cli.no_dedup {
            self.output.remove_duplicates = false;
        }
        if let Some(key) = cli.sort {
            self.output.sort_output = true;
            self.output.sort_key = key;
        }
        if cli.no_sort {
            self.output.sort_output = false;
        }
        self.output.emit = cli.emit;
        if let Some(threads) = cli.threads {
            self.performance.threads = threads;
        }
        if let Some(max) = cli.max_threads {
            self.performance.max_threads = Some(max);
        }
        if let Some(capacity) = cli.queue_capacity {
            self.performance.queue_capacity = capacity;
        }
        if let Some(keep_alive) = cli.keep_alive {
            self.performance.keep_alive = keep_alive;
        }
        if let Some(grace) = cli.shutdown_grace {
            self.performance.shutdown_grace = grace;
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.chunk_size == 0 {
            return Err(anyhow!("chunk size must be at least 1"));
        }
        if self.performance.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be at least 1"));
        }
        if self.processing.collect_timeout.is_zero() {
            return Err(anyhow!("timeout must be greater than zero"));
        }
        self.file_regex()?;
        Ok(())
    }

    pub fn file_regex(&self) -> Result<Regex> {
        Regex::new(&self.input.file_pattern)
            .with_context(|| format!("Invalid file pattern: {}", self.input.file_pattern))
    }

    pub fn effective_threads(&self) -> usize {
        if self.performance.threads == 0 {
            num_cpus::get()
        } else {
            self.performance.threads
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        let core_threads = self.effective_threads();
        PoolConfig {
            core_threads,
            max_threads: self
                .performance
                .max_threads
                .unwrap_or_else(|| core_threads.saturating_mul(2)),
            queue_capacity: self.performance.queue_capacity,
            keep_alive: self.performance.keep_alive,
            shutdown_grace: self.performance.shutdown_grace,
        }
        .normalized()
    }

    pub fn dedup(&self) -> Option<DedupStrategy> {
        self.output
            .remove_duplicates
            .then_some(self.output.dedup_strategy)
    }

    pub fn sort(&self) -> Option<SortStrategy> {
        self.output
            .sort_output
            .then(|| SortStrategy::from(self.output.sort_key))
    }
}

impl fmt::Display for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool_config();
        writeln!(f, "input_dir = {}", self.input.input_dir)?;
        writeln!(f, "output_dir = {}", self.input.output_dir)?;
        writeln!(f, "pattern = {}", self.input.file_pattern)?;
        writeln!(f, "allow_empty = {}", !self.input.require_input)?;
        writeln!(f, "chunk_size = {}", self.processing.chunk_size)?;
        if self.processing.transforms.is_empty() {
            writeln!(f, "transform = trim,add-line-number")?;
        } else {
            writeln!(f, "transform = {}", self.processing.transforms.join(","))?;
        }
        writeln!(
            f,
            "timeout = {}",
            humantime::format_duration(self.processing.collect_timeout)
        )?;
        match self.dedup() {
            Some(strategy) => writeln!(f, "dedup = {}", value_name(strategy))?,
            None => writeln!(f, "dedup = none")?,
        }
        if self.output.sort_output {
            writeln!(f, "sort = {}", value_name(self.output.sort_key))?;
        } else {
            writeln!(f, "sort = none")?;
        }
        writeln!(f, "threads = {}", pool.core_threads)?;
        writeln!(f, "max_threads = {}", pool.max_threads)?;
        writeln!(f, "queue_capacity = {}", pool.queue_capacity)?;
        writeln!(f, "keep_alive = {}", humantime::format_duration(pool.keep_alive))?;
        write!(
            f,
            "shutdown_grace = {}",
            humantime::format_duration(pool.shutdown_grace)
        )
    }
}

fn value_name<T: ValueEnum>(value: T) -> String {
    value
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_default()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn file(entries: &[(&str, &str)]) -> ConfigFile {
        ConfigFile {
            pipeline: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["chunkmill"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.processing.chunk_size, 1000);
        assert_eq!(config.effective_threads(), 4);
        assert_eq!(config.input.input_dir, "input");
        assert_eq!(config.input.output_dir, "output");
        assert_eq!(config.processing.collect_timeout, Duration::from_secs(300));
        assert_eq!(config.dedup(), Some(DedupStrategy::Id));
        assert!(matches!(config.sort(), Some(SortStrategy::Natural)));
        assert!(config.input.require_input);

        let pool = config.pool_config();
        assert_eq!(pool.core_threads, 4);
        assert_eq!(pool.max_threads, 8);
        assert_eq!(pool.queue_capacity, 100);
        assert_eq!(pool.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_default_pattern_matches_supported_extensions() {
        let re = ProcessorConfig::default().file_regex().unwrap();
        assert!(re.is_match("a.txt"));
        assert!(re.is_match("B.CSV"));
        assert!(re.is_match("data.json"));
        assert!(!re.is_match("notes.md"));
        assert!(!re.is_match("archive.txt.gz"));
    }

    #[test]
    fn test_zero_threads_means_cpu_count() {
        let config = ProcessorConfig::from_cli(&cli(&["-t", "0"]), None).unwrap();
        assert_eq!(config.effective_threads(), num_cpus::get());
        assert_eq!(config.pool_config().max_threads, 2 * num_cpus::get());
    }

    #[test]
    fn test_cli_overrides_file() {
        let f = file(&[("threads", "2"), ("chunk_size", "50"), ("sort", "content-desc")]);
        let config = ProcessorConfig::from_cli(&cli(&["-t", "6"]), Some(&f)).unwrap();
        assert_eq!(config.effective_threads(), 6);
        assert_eq!(config.processing.chunk_size, 50);
        assert_eq!(config.output.sort_key, SortKey::ContentDesc);
    }

    #[test]
    fn test_file_can_disable_post_processing() {
        let f = file(&[("dedup", "none"), ("sort", "off"), ("allow_empty", "yes")]);
        let config = ProcessorConfig::from_cli(&cli(&[]), Some(&f)).unwrap();
        assert_eq!(config.dedup(), None);
        assert!(config.sort().is_none());
        assert!(!config.input.require_input);
    }

    #[test]
    fn test_no_flags_win_over_strategy_flags() {
        let config =
            ProcessorConfig::from_cli(&cli(&["--dedup", "content", "--no-dedup", "--no-sort"]), None)
                .unwrap();
        assert_eq!(config.dedup(), None);
        assert!(config.sort().is_none());
    }

    #[test]
    fn test_invalid_file_values_are_reported() {
        let f = file(&[("threads", "many")]);
        let err = ProcessorConfig::from_cli(&cli(&[]), Some(&f)).unwrap_err();
        assert!(format!("{:#}", err).contains("threads = many"));

        let f = file(&[("timeout", "forever")]);
        assert!(ProcessorConfig::from_cli(&cli(&[]), Some(&f)).is_err());

        let f = file(&[("dedup", "fuzzy")]);
        assert!(ProcessorConfig::from_cli(&cli(&[]), Some(&f)).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(ProcessorConfig::from_cli(&cli(&["-c", "0"]), None).is_err());
        assert!(ProcessorConfig::from_cli(&cli(&["--queue-capacity", "0"]), None).is_err());
        assert!(ProcessorConfig::from_cli(&cli(&["--pattern", "("]), None).is_err());
        assert!(ProcessorConfig::from_cli(&cli(&["--timeout", "0s"]), None).is_err());
    }

    #[test]
    fn test_pool_config_normalization() {
        let pool = PoolConfig {
            core_threads: 0,
            max_threads: 0,
            queue_capacity: 0,
            ..PoolConfig::default()
        }
        .normalized();
        assert_eq!(pool.core_threads, 1);
        assert_eq!(pool.max_threads, 1);
        assert_eq!(pool.queue_capacity, 1);

        let config = ProcessorConfig::from_cli(&cli(&["-t", "4", "--max-threads", "2"]), None).unwrap();
        assert_eq!(config.pool_config().max_threads, 4);
    }

    #[test]
    fn test_display_lists_effective_values() {
        let config = ProcessorConfig::from_cli(&cli(&["--no-dedup", "--sort", "timestamp-asc"]), None).unwrap();
        let shown = config.to_string();
        assert!(shown.contains("dedup = none"));
        assert!(shown.contains("sort = timestamp-asc"));
        assert!(shown.contains("timeout = 5m"));
        assert!(shown.contains("transform = trim,add-line-number"));
    }
}
