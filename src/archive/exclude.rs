//! Exclusion rules for archive packing
//!
//! Hidden entries (base name starting with `.`) are always pruned together
//! with their subtree. Extra glob patterns can be layered on top, matched
//! against the path relative to the packed directory.

use std::ffi::OsStr;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

/// Exclusion rules for filtering archive entries
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    patterns: Vec<String>,
    glob_set: Option<GlobSet>,
}

impl ExcludeRules {
    /// Rules that only prune hidden entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add glob patterns on top of the hidden-entry rule.
    pub fn with_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, ExcludeError> {
        self.patterns.extend(
            patterns
                .iter()
                .map(|p| p.as_ref().trim().to_string())
                .filter(|p| !p.is_empty()),
        );

        if self.patterns.is_empty() {
            self.glob_set = None;
            return Ok(self);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.glob_set = Some(builder.build()?);
        Ok(self)
    }

    /// Configured glob patterns (excluding the implicit hidden-entry rule).
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check if an entry should be pruned.
    ///
    /// `rel_path` is relative to the packed root; its last component is the
    /// entry's base name.
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        if rel_path.file_name().is_some_and(is_hidden) {
            return true;
        }
        match &self.glob_set {
            Some(set) => set.is_match(rel_path),
            None => false,
        }
    }
}

/// A base name starting with `.` marks a hidden entry.
pub fn is_hidden(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}
