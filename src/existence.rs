//! One-shot existence cache for bulk queue rebuilds.
//!
//! Probing the filesystem three times per submission is slow on network
//! drives with thousands of entries, so a rebuild scans each output folder
//! once and answers membership from memory. The cache goes stale as soon as
//! the session writes new files; drop it when the rebuild is done.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Membership set of files found in a handful of directories.
#[derive(Debug, Default)]
pub struct ExistenceCache {
    files: HashSet<PathBuf>,
}

impl ExistenceCache {
    /// Scans each root (non-recursively) for files with one of `extensions`.
    ///
    /// Missing roots contribute nothing. Extensions are compared
    /// case-insensitively and given without the dot.
    ///
    /// # Examples
    /// ```
    /// use std::path::PathBuf;
    ///
    /// use community_render::existence::ExistenceCache;
    ///
    /// let cache = ExistenceCache::build(&[PathBuf::from("no/such/dir")], &["png"]);
    /// assert!(cache.is_empty());
    /// ```
    pub fn build(roots: &[PathBuf], extensions: &[&str]) -> Self {
        let mut files = HashSet::new();
        for root in roots {
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let matches = entry
                    .path()
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(&e)))
                    .unwrap_or(false);
                if matches {
                    files.insert(entry.into_path());
                }
            }
        }
        tracing::debug!(roots = roots.len(), files = files.len(), "Built existence cache");
        Self { files }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

/// Answers "does this file exist", from a cache during rebuilds and from disk
/// otherwise.
pub(crate) fn file_exists(cache: Option<&ExistenceCache>, path: &Path) -> bool {
    match cache {
        Some(cache) => cache.contains(path),
        None => path.is_file(),
    }
}
