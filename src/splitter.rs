//! Input discovery and line-count chunking

use regex::Regex;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::config::ProcessorConfig;
use crate::error::PipelineError;
use crate::record::Chunk;
use crate::stats::ProcessingStats;

static CHUNK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_chunk_id() -> String {
    format!("chunk-{}", CHUNK_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Partition `lines` into chunks of at most `chunk_size` lines with
/// contiguous 1-based ranges; the last chunk holds the remainder.
pub fn split_lines(source_file: &str, lines: Vec<String>, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(lines.len().div_ceil(chunk_size));
    let mut start_line = 1;
    let mut lines = lines.into_iter().peekable();

    while lines.peek().is_some() {
        let batch: Vec<String> = lines.by_ref().take(chunk_size).collect();
        let len = batch.len();
        chunks.push(Chunk::new(next_chunk_id(), source_file, batch, start_line));
        start_line += len;
    }

    chunks
}

#[derive(Debug, Clone)]
pub struct FileSplitter {
    chunk_size: usize,
    pattern: Regex,
    require_input: bool,
}

impl FileSplitter {
    pub fn new(chunk_size: usize, pattern: Regex) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pattern,
            require_input: true,
        }
    }

    pub fn from_config(config: &ProcessorConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config.processing.chunk_size, config.file_regex()?)
            .require_input(config.input.require_input))
    }

    /// When false, a directory without usable files yields no chunks instead of an error
    pub fn require_input(mut self, require: bool) -> Self {
        self.require_input = require;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Regular, readable, non-empty files whose name matches the pattern
    pub fn is_valid_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if !self.pattern.is_match(name) {
            return false;
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(file = name, error = %e, "file validation failed");
                return false;
            }
        };
        if !metadata.is_file() {
            debug!(file = name, "skipping non-regular file");
            return false;
        }
        if metadata.len() == 0 {
            warn!(file = name, "skipping empty file");
            return false;
        }
        if let Err(e) = File::open(path) {
            warn!(file = name, error = %e, "skipping unreadable file");
            return false;
        }
        true
    }

    /// Matching files in `dir`, sorted by name
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        if !dir.is_dir() {
            return Err(PipelineError::InputDirectory(dir.to_path_buf()));
        }

        let entries = fs::read_dir(dir).map_err(|source| PipelineError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PipelineError::Read {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if self.is_valid_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Cheap structural check based on the file's first line.
    ///
    /// `.csv` must start with a non-blank line (a line without commas only
    /// warns); `.json` must start with `{` or `[`. Other files always pass.
    pub fn validate_format(&self, path: &Path) -> Result<(), PipelineError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let kind = match extension.as_deref() {
            Some("csv") => "CSV",
            Some("json") => "JSON",
            _ => return Ok(()),
        };

        let first_line = read_first_line(path)?;
        let trimmed = first_line.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidFormat {
                path: path.to_path_buf(),
                reason: format!("{} file starts with an empty line", kind),
            });
        }

        if kind == "CSV" {
            if !trimmed.contains(',') {
                warn!(
                    file = %path.display(),
                    "CSV file may not have proper comma separation"
                );
            }
        } else if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
            return Err(PipelineError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "JSON file should start with { or [".to_string(),
            });
        }

        Ok(())
    }

    /// Validate and read one file, then cut it into chunks
    pub fn split_file(&self, path: &Path) -> Result<Vec<Chunk>, PipelineError> {
        self.validate_format(path)?;

        let read_error = |source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(read_error)?;
        let lines = read_lines_lossy(BufReader::new(file)).map_err(read_error)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let chunks = split_lines(&name, lines, self.chunk_size);
        debug!(file = %name, chunks = chunks.len(), "split file");
        Ok(chunks)
    }

    /// Split every usable file in `dir`.
    ///
    /// Files failing format validation are skipped with a warning; I/O
    /// failures abort the run. Malformed UTF-8 is replaced, not rejected.
    pub fn split_directory(
        &self,
        dir: &Path,
        stats: &ProcessingStats,
    ) -> Result<Vec<Chunk>, PipelineError> {
        let files = self.list_files(dir)?;
        if files.is_empty() && self.require_input {
            return Err(PipelineError::NoValidFiles(dir.to_path_buf()));
        }

        let mut chunks = Vec::new();
        let mut split_any = false;
        for path in &files {
            match self.split_file(path) {
                Ok(file_chunks) => {
                    chunks.extend(file_chunks);
                    stats.add_file_processed();
                    split_any = true;
                }
                Err(err @ PipelineError::InvalidFormat { .. }) => {
                    warn!(error = %err, "skipping file");
                }
                Err(err) => return Err(err),
            }
        }

        if !split_any && self.require_input {
            return Err(PipelineError::NoValidFiles(dir.to_path_buf()));
        }

        info!(
            files = stats.files_processed(),
            chunks = chunks.len(),
            dir = %dir.display(),
            "split input directory"
        );
        Ok(chunks)
    }
}

/// Read every line, replacing invalid UTF-8 with U+FFFD and stripping
/// `\n` / `\r\n` terminators.
pub fn read_lines_lossy<R: BufRead>(mut reader: R) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(lines);
        }
        lines.push(decode_line(&buf));
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn read_first_line(path: &Path) -> Result<String, PipelineError> {
    let read_error = |source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_error)?;
    let mut buf = Vec::new();
    BufReader::new(file)
        .read_until(b'\n', &mut buf)
        .map_err(read_error)?;
    Ok(decode_line(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FILE_PATTERN;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn splitter(chunk_size: usize) -> FileSplitter {
        FileSplitter::new(chunk_size, Regex::new(DEFAULT_FILE_PATTERN).unwrap())
    }

    fn lines(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {}", i)).collect()
    }

    fn write_lines(dir: &Path, name: &str, n: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines(n).join("\n") + "\n").unwrap();
        path
    }

    #[test]
    fn test_split_ranges_are_contiguous() {
        let chunks = split_lines("a.txt", lines(2500), 1000);
        let ranges: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_line(), c.end_line())).collect();
        assert_eq!(ranges, vec![(1, 1000), (1001, 2000), (2001, 2500)]);
        assert_eq!(chunks[2].lines()[0], "line 2001");
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        assert!(split_lines("a.txt", Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_chunk_ids_are_unique() {
        let a = split_lines("a.txt", lines(30), 7);
        let b = split_lines("b.txt", lines(30), 7);
        let ids: HashSet<&str> = a.iter().chain(b.iter()).map(|c| c.id()).collect();
        assert_eq!(ids.len(), a.len() + b.len());
        assert!(a.iter().all(|c| c.id().starts_with("chunk-")));
    }

    #[test]
    fn test_list_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write_lines(dir.path(), "b.txt", 3);
        write_lines(dir.path(), "a.CSV", 3);
        write_lines(dir.path(), "notes.md", 3);
        fs::write(dir.path().join("empty.txt"), "").unwrap();
        fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let files = splitter(10).list_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.txt"]);
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let stats = ProcessingStats::new();
        assert!(matches!(
            splitter(10).split_directory(&missing, &stats),
            Err(PipelineError::InputDirectory(_))
        ));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let stats = ProcessingStats::new();
        assert!(matches!(
            splitter(10).split_directory(dir.path(), &stats),
            Err(PipelineError::NoValidFiles(_))
        ));

        let chunks = splitter(10)
            .require_input(false)
            .split_directory(dir.path(), &stats)
            .unwrap();
        assert!(chunks.is_empty());
        assert_eq!(stats.files_processed(), 0);
    }

    #[test]
    fn test_json_must_open_with_bracket() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        fs::write(&good, "[\n1\n]\n").unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "hello\n").unwrap();

        let s = splitter(10);
        assert!(s.validate_format(&good).is_ok());
        assert!(matches!(
            s.validate_format(&bad),
            Err(PipelineError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_csv_needs_non_blank_header() {
        let dir = TempDir::new().unwrap();
        let blank = dir.path().join("blank.csv");
        fs::write(&blank, "   \na,b\n").unwrap();
        let no_comma = dir.path().join("single.csv");
        fs::write(&no_comma, "header\nvalue\n").unwrap();

        let s = splitter(10);
        assert!(s.validate_format(&blank).is_err());
        assert!(s.validate_format(&no_comma).is_ok());
    }

    #[test]
    fn test_invalid_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_lines(dir.path(), "a.txt", 5);
        fs::write(dir.path().join("b.json"), "not json\n").unwrap();

        let stats = ProcessingStats::new();
        let chunks = splitter(2).split_directory(dir.path(), &stats).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(stats.files_processed(), 1);
        assert!(chunks.iter().all(|c| c.source_file() == "a.txt"));
    }

    #[test]
    fn test_only_invalid_files_means_no_valid_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.json"), "not json\n").unwrap();
        let stats = ProcessingStats::new();
        assert!(matches!(
            splitter(2).split_directory(dir.path(), &stats),
            Err(PipelineError::NoValidFiles(_))
        ));
    }

    #[test]
    fn test_split_file_handles_crlf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("win.txt");
        fs::write(&path, "one\r\ntwo\r\n").unwrap();
        let chunks = splitter(10).split_file(&path).unwrap();
        assert_eq!(chunks[0].lines(), &["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_read_lines_lossy_replaces_bad_bytes() {
        let input: &[u8] = b"caf\xe9\r\nok\nno newline";
        let lines = read_lines_lossy(input).unwrap();
        assert_eq!(lines, vec!["caf\u{fffd}", "ok", "no newline"]);
    }

    #[test]
    fn test_latin1_file_is_split_not_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("latin1.txt"), b"caf\xe9\nok\n").unwrap();
        write_lines(dir.path(), "plain.txt", 4);

        let stats = ProcessingStats::new();
        let chunks = splitter(10).split_directory(dir.path(), &stats).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(stats.files_processed(), 2);
        assert_eq!(chunks[0].lines()[0], "caf\u{fffd}");
    }

    proptest! {
        #[test]
        fn prop_partition_is_exhaustive(n in 0usize..300, chunk_size in 1usize..50) {
            let input = lines(n);
            let chunks = split_lines("p.txt", input.clone(), chunk_size);

            let rejoined: Vec<String> = chunks.iter().flat_map(|c| c.lines().to_vec()).collect();
            prop_assert_eq!(rejoined, input);

            let mut expected_start = 1;
            for chunk in &chunks {
                prop_assert!(chunk.len() >= 1 && chunk.len() <= chunk_size);
                prop_assert_eq!(chunk.start_line(), expected_start);
                expected_start = chunk.end_line() + 1;
            }
        }
    }
}
