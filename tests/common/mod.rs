// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Run the chunkmill binary with `args`, returning (stdout, stderr, exit code)
pub fn run_chunkmill(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_chunkmill"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute chunkmill");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// An input directory plus a sibling output directory, both temporary
pub struct Workspace {
    root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir(root.path().join("input")).expect("Failed to create input dir");
        Self { root }
    }

    pub fn input(&self) -> PathBuf {
        self.root.path().join("input")
    }

    pub fn output(&self) -> PathBuf {
        self.root.path().join("output")
    }

    pub fn input_str(&self) -> String {
        self.input().display().to_string()
    }

    pub fn output_str(&self) -> String {
        self.output().display().to_string()
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Write `count` distinct lines named after the file
    pub fn write_lines(&self, name: &str, count: usize) -> PathBuf {
        let content: String = (1..=count)
            .map(|i| format!("{} record {}\n", name, i))
            .collect();
        self.write(name, &content)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.input().join(name);
        fs::write(&path, content).expect("Failed to write input file");
        path
    }
}

/// Pull the value of a "Label: value" line out of the run summary
pub fn summary_value<'a>(summary: &'a str, label: &str) -> Option<&'a str> {
    summary
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .and_then(|rest| rest.strip_prefix(": "))
        .map(str::trim)
}
