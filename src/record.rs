//! Chunks of input lines and the records produced from them

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::xxh3_64;

/// A contiguous, immutable slice of one source file's lines
#[derive(Debug, Clone)]
pub struct Chunk {
    id: String,
    source_file: String,
    lines: Vec<String>,
    start_line: usize,
}

impl Chunk {
    /// Build a chunk whose first line is `start_line` (1-based).
    ///
    /// The end line is derived from the number of lines, so the range and the
    /// line count cannot disagree.
    pub fn new(
        id: impl Into<String>,
        source_file: impl Into<String>,
        lines: Vec<String>,
        start_line: usize,
    ) -> Self {
        Self {
            id: id.into(),
            source_file: source_file.into(),
            lines,
            start_line: start_line.max(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn start_line(&self) -> usize {
        self.start_line
    }

    /// Last line number covered, inclusive. Equal to `start_line - 1` for an empty chunk.
    pub fn end_line(&self) -> usize {
        self.start_line + self.lines.len() - 1
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Iterate lines paired with their 1-based line number in the source file
    pub fn numbered_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .map(move |(offset, line)| (self.start_line + offset, line.as_str()))
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chunk[{}] from {} [lines {}-{}]",
            self.id,
            self.source_file,
            self.start_line,
            self.end_line()
        )
    }
}

/// Deterministic record id: `<file>:<line>:<xxh3 of the raw line>`
pub fn record_id(source_file: &str, line_number: usize, raw_line: &str) -> String {
    format!(
        "{}:{}:{:016x}",
        source_file,
        line_number,
        xxh3_64(raw_line.as_bytes())
    )
}

/// One transformed output line.
///
/// Equality, hashing and ordering only look at `id`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRecord {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_timestamp(id, content, Utc::now())
    }

    pub fn with_timestamp(
        id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            created_at,
        }
    }
}

impl PartialEq for ProcessedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProcessedRecord {}

impl Hash for ProcessedRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ProcessedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProcessedRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}
