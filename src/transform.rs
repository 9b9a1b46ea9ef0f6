//! Line transformers applied by chunk workers
//!
//! A transformer maps `(line, line_number, source_file)` to a new line. They are
//! cheap to clone and compose by sequential application.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Arc;

type TransformFn = dyn Fn(&str, usize, &str) -> Result<String> + Send + Sync;

/// A named, composable line transformation
#[derive(Clone)]
pub struct LineTransform {
    name: String,
    func: Arc<TransformFn>,
}

impl fmt::Debug for LineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineTransform")
            .field("name", &self.name)
            .finish()
    }
}

impl LineTransform {
    /// Wrap a fallible closure. An `Err` drops only the line it was applied to.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str, usize, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, line: &str, line_number: usize, source_file: &str) -> Result<String> {
        (self.func)(line, line_number, source_file)
    }

    pub fn identity() -> Self {
        Self::new("identity", |line, _, _| Ok(line.to_string()))
    }

    pub fn uppercase() -> Self {
        Self::new("uppercase", |line, _, _| Ok(line.to_uppercase()))
    }

    pub fn lowercase() -> Self {
        Self::new("lowercase", |line, _, _| Ok(line.to_lowercase()))
    }

    pub fn trim() -> Self {
        Self::new("trim", |line, _, _| Ok(line.trim().to_string()))
    }

    /// Prefix the line with `[<file>:<line>] `
    pub fn add_line_number() -> Self {
        Self::new("add-line-number", |line, line_number, source_file| {
            Ok(format!("[{}:{}] {}", source_file, line_number, line))
        })
    }

    /// Apply `self`, then feed its output to `after`
    pub fn and_then(self, after: LineTransform) -> Self {
        let name = format!("{},{}", self.name, after.name);
        Self::new(name, move |line, line_number, source_file| {
            let first = self.apply(line, line_number, source_file)?;
            after.apply(&first, line_number, source_file)
        })
    }

    /// Apply `before`, then `self`
    pub fn compose(self, before: LineTransform) -> Self {
        before.and_then(self)
    }

    /// Look up a built-in transform by name
    pub fn by_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Self::identity()),
            "uppercase" | "upper" => Ok(Self::uppercase()),
            "lowercase" | "lower" => Ok(Self::lowercase()),
            "trim" => Ok(Self::trim()),
            "add-line-number" | "line-number" => Ok(Self::add_line_number()),
            other => Err(anyhow!(
                "Unknown transform '{}'. Available: identity, uppercase, lowercase, trim, add-line-number",
                other
            )),
        }
    }

    /// Chain built-ins in the given order; an empty list is the default chain
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut iter = names.iter();
        let Some(first) = iter.next() else {
            return Ok(Self::default());
        };
        let mut chain = Self::by_name(first.as_ref())?;
        for name in iter {
            chain = chain.and_then(Self::by_name(name.as_ref())?);
        }
        Ok(chain)
    }
}

impl Default for LineTransform {
    /// Trim, then prefix with the line number
    fn default() -> Self {
        Self::trim().and_then(Self::add_line_number())
    }
}
