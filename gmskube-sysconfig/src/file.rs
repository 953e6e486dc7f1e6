//! File-backed override repository.
//!
//! Reads a flat property file once at construction. Each non-comment line
//! holds `key=value` or `key: value`; lines starting with `#` or `!` are
//! comments.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use snafu::ResultExt;

use crate::error::{ReadFileSnafu, Result};
use crate::repository::ConfigRepository;

pub struct FileRepository {
    name: String,
    entries: BTreeMap<String, String>,
}

impl FileRepository {
    /// Load overrides from a property file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Ok(Self {
            name: path.display().to_string(),
            entries: parse_properties(&content),
        })
    }

    /// Build a repository from entries already in memory
    pub fn from_entries(name: impl Into<String>, entries: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ConfigRepository for FileRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    async fn export(&self) -> BTreeMap<String, String> {
        self.entries.clone()
    }
}

/// Parse property-file text into key/value pairs.
///
/// The separator is the first `=` or `:` on the line. A line with no
/// separator is a key with an empty value. Later duplicates win.
#[must_use]
pub fn parse_properties(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let (key, value) = match line.find(['=', ':']) {
            Some(idx) => (line[..idx].trim(), line[idx + 1..].trim()),
            None => (line, ""),
        };

        if !key.is_empty() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    entries
}
