//! Quality-control tag ledger.
//!
//! Each submission carries a bag of `name[:count]` tokens joined by `;`.
//! A name appears at most once; countable tags (such as [`tags::CRASHED`])
//! grow their count instead of repeating. The bag is mirrored to one text
//! file per submission, and automatic writes merge with whatever is already
//! on disk so a recorded diagnosis is never lost.
//!
//! # Examples
//! ```
//! use community_render::qc::QcTags;
//!
//! let mut bag = QcTags::parse("no_base_mesh_found;crashed:1");
//! assert!(bag.extend("crashed", true));
//! assert_eq!(bag.count("crashed"), 2);
//! assert!(!bag.extend("no_base_mesh_found", false));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::queue::Submission;

/// Tag names the pipeline writes itself.
pub mod tags {
    /// The process died while this submission was in flight.
    pub const CRASHED: &str = "crashed";
    /// The selector found nothing that looks like a subject.
    pub const NO_BASE_MESH: &str = "no_base_mesh_found";
    /// A newer form entry from the same submitter exists.
    pub const NOT_LATEST: &str = "not_latest_entry";
    /// The source scene could not be opened.
    pub const LOAD_FAILED: &str = "load_failed";
    /// Operator-set marker; any tag containing this text disqualifies a row.
    pub const SKIP: &str = "skip";

    /// Recomputed from the registry on every rebuild and never written to disk.
    pub const DERIVED: &[&str] = &[NOT_LATEST];

    pub fn is_derived(name: &str) -> bool {
        DERIVED.contains(&name)
    }
}

fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once(':') {
        Some((name, count)) => (name.trim(), Some(count.trim())),
        None => (token.trim(), None),
    }
}

/// An unordered bag of QC tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QcTags {
    tokens: Vec<String>,
}

impl QcTags {
    /// Parses semicolon-joined text, dropping empty tokens.
    pub fn parse(text: &str) -> Self {
        let mut bag = Self::default();
        for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, _) = split_token(token);
            if !bag.contains(name) {
                bag.tokens.push(token.to_string());
            }
        }
        bag
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Iterates over tag names without their counts.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|t| split_token(t).0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = split_token(name).0;
        self.tokens.iter().position(|t| split_token(t).0 == name)
    }

    /// Adds `tag`, or bumps its count when `incrementable`.
    ///
    /// Returns `false` when nothing changed: the tag exists and is not
    /// incrementable, or its stored count is malformed.
    pub fn extend(&mut self, tag: &str, incrementable: bool) -> bool {
        let name = split_token(tag).0;
        if name.is_empty() {
            return false;
        }
        let Some(idx) = self.position(name) else {
            let token = if incrementable {
                format!("{}:1", name)
            } else {
                name.to_string()
            };
            self.tokens.push(token);
            return true;
        };
        if !incrementable {
            return false;
        }
        let current = match split_token(&self.tokens[idx]).1 {
            None => 1,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) => n,
                Err(_) => {
                    tracing::warn!(token = %self.tokens[idx], "Malformed QC tag count, not incrementing");
                    return false;
                }
            },
        };
        self.tokens[idx] = format!("{}:{}", name, current + 1);
        true
    }

    /// Returns the count stored for `name`: 0 if absent or malformed, 1 for a
    /// bare tag.
    pub fn count(&self, name: &str) -> u32 {
        let Some(idx) = self.position(name) else {
            return 0;
        };
        match split_token(&self.tokens[idx]).1 {
            None => 1,
            Some(raw) => raw.parse().unwrap_or(0),
        }
    }

    /// Drops every tag whose name fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.tokens.retain(|t| keep(split_token(t).0));
    }

    /// Folds `other` into this bag. Tags only ever get added; for a tag in
    /// both, the larger count survives.
    pub fn merge(&mut self, other: &QcTags) {
        for token in &other.tokens {
            let (name, _) = split_token(token);
            match self.position(name) {
                None => self.tokens.push(token.clone()),
                Some(idx) => {
                    if other.count(name) > self.count(name) {
                        self.tokens[idx] = token.clone();
                    }
                }
            }
        }
    }

    /// True if any tag keeps a row out of automatic rendering.
    ///
    /// `crashed` alone is not blocking; the retry ceiling governs it.
    pub fn is_blocking(&self) -> bool {
        self.names().any(|n| n != tags::CRASHED)
    }

    /// True if an operator marked the row to be skipped.
    pub fn has_skip(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| t.to_lowercase().contains(tags::SKIP))
    }
}

impl fmt::Display for QcTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(";"))
    }
}

/// Every tag name seen this session, for filter pickers.
#[derive(Debug, Clone, Default)]
pub struct TagVocabulary {
    names: BTreeSet<String>,
}

impl TagVocabulary {
    /// Registers the names in `bag`.
    pub fn register_all(&mut self, bag: &QcTags) {
        for name in bag.names() {
            self.register(name);
        }
    }

    pub fn register(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

/// One text file per submission under the QC directory.
#[derive(Debug, Clone)]
pub struct QcStore {
    dir: PathBuf,
}

impl QcStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", identity))
    }

    /// Reads the stored bag; a missing or unreadable file yields an empty one.
    pub fn read(&self, identity: &str) -> QcTags {
        let path = self.path(identity);
        match std::fs::read_to_string(&path) {
            Ok(text) => QcTags::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QcTags::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read QC file");
                QcTags::default()
            }
        }
    }

    /// Writes `bag` merged with the file already on disk. Derived tags are
    /// left out; if nothing else remains the file is removed.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, identity: &str, bag: &QcTags) -> Result<()> {
        if bag.is_empty() {
            return Ok(());
        }
        let path = self.path(identity);
        let mut merged = self.read(identity);
        merged.merge(bag);
        merged.retain(|name| !tags::is_derived(name));
        if merged.is_empty() {
            return self.clear(identity);
        }
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, merged.to_string())?;
        tracing::debug!(path = %path.display(), tags = %merged, "Saved QC tags");
        Ok(())
    }

    /// Removes the stored file, if any.
    pub fn clear(&self, identity: &str) -> Result<()> {
        match std::fs::remove_file(self.path(identity)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Applies tags to submissions and keeps disk and vocabulary in step.
#[derive(Debug, Clone)]
pub struct QcLedger {
    store: QcStore,
    vocabulary: TagVocabulary,
}

impl QcLedger {
    pub fn new(store: QcStore) -> Self {
        Self {
            store,
            vocabulary: TagVocabulary::default(),
        }
    }

    pub fn store(&self) -> &QcStore {
        &self.store
    }

    pub fn vocabulary(&self) -> &TagVocabulary {
        &self.vocabulary
    }

    pub fn vocabulary_mut(&mut self) -> &mut TagVocabulary {
        &mut self.vocabulary
    }

    /// Applies `tag` to the row and persists the result.
    ///
    /// A failed write is logged; the in-memory bag still changes.
    pub fn extend(&mut self, row: &mut Submission, tag: &str, incrementable: bool) -> bool {
        let applied = row.qc.extend(tag, incrementable);
        if !applied {
            return false;
        }
        self.vocabulary.register(split_token(tag).0);
        if let Err(e) = self.store.save(&row.source_file, &row.qc) {
            tracing::warn!(submission = %row.source_file, error = %e, "Could not persist QC tag");
        }
        tracing::info!(submission = %row.source_file, tag, qc = %row.qc, "QC tag applied");
        true
    }

    pub fn count(&self, row: &Submission, name: &str) -> u32 {
        row.qc.count(name)
    }

    /// Applies a tag straight to the stored file, for rows not loaded yet.
    ///
    /// # Errors
    /// Returns an error if the QC file cannot be written.
    pub fn extend_stored(&mut self, identity: &str, tag: &str, incrementable: bool) -> Result<bool> {
        let mut bag = self.store.read(identity);
        if !bag.extend(tag, incrementable) {
            return Ok(false);
        }
        self.store.save(identity, &bag)?;
        self.vocabulary.register(split_token(tag).0);
        Ok(true)
    }

    /// Operator override: replaces the row's bag with `text` (empty clears it).
    ///
    /// # Errors
    /// Returns an error if the old file cannot be removed or the new one written.
    pub fn set(&mut self, row: &mut Submission, text: &str) -> Result<()> {
        self.store.clear(&row.source_file)?;
        row.qc = QcTags::parse(text);
        self.vocabulary.register_all(&row.qc);
        self.store.save(&row.source_file, &row.qc)?;
        tracing::info!(submission = %row.source_file, qc = %row.qc, "QC tags set by operator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_incrementable_is_idempotent() {
        let mut bag = QcTags::default();
        assert!(bag.extend("no_base_mesh_found", false));
        let after_first = bag.clone();
        assert!(!bag.extend("no_base_mesh_found", false));
        assert_eq!(bag, after_first);
    }

    #[test]
    fn test_incrementable_counts_calls() {
        let mut bag = QcTags::default();
        for _ in 0..5 {
            assert!(bag.extend("crashed", true));
        }
        assert_eq!(bag.count("crashed"), 5);
        assert_eq!(bag.to_string(), "crashed:5");
    }

    #[test]
    fn test_count_absent_and_malformed() {
        let bag = QcTags::parse("crashed:x;other");
        assert_eq!(bag.count("missing"), 0);
        assert_eq!(bag.count("crashed"), 0);
        assert_eq!(bag.count("other"), 1);
    }

    #[test]
    fn test_malformed_count_not_incremented() {
        let mut bag = QcTags::parse("crashed:x");
        assert!(!bag.extend("crashed", true));
        assert_eq!(bag.to_string(), "crashed:x");
    }

    #[test]
    fn test_prefix_comparison_ignores_count() {
        let mut bag = QcTags::parse("crashed:2");
        assert!(!bag.extend("crashed:7", false));
        assert!(bag.extend("crashed:7", true));
        assert_eq!(bag.count("crashed"), 3);
    }

    #[test]
    fn test_parse_drops_duplicates_and_blanks() {
        let bag = QcTags::parse(" a ;; b;a:3 ;");
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.to_string(), "a;b");
    }

    #[test]
    fn test_merge_keeps_larger_count() {
        let mut disk = QcTags::parse("crashed:1;manual");
        disk.merge(&QcTags::parse("crashed:2;no_base_mesh_found"));
        assert_eq!(disk.count("crashed"), 2);
        assert!(disk.contains("manual"));
        assert!(disk.contains("no_base_mesh_found"));
    }

    #[test]
    fn test_blocking_and_skip() {
        assert!(!QcTags::parse("crashed:3").is_blocking());
        assert!(QcTags::parse("crashed:1;no_base_mesh_found").is_blocking());
        assert!(QcTags::parse("Please SKIP this").has_skip());
        assert!(!QcTags::parse("crashed:1").has_skip());
    }

    #[test]
    fn test_store_merges_with_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = QcStore::new(dir.path().join("qc_errors"));
        store.save("a.glb", &QcTags::parse("manual note")).unwrap();
        store.save("a.glb", &QcTags::parse("crashed:1")).unwrap();
        let read = store.read("a.glb");
        assert!(read.contains("manual note"));
        assert_eq!(read.count("crashed"), 1);

        store.clear("a.glb").unwrap();
        assert!(store.read("a.glb").is_empty());
        // Clearing twice is fine.
        store.clear("a.glb").unwrap();
    }

    #[test]
    fn test_ledger_extend_stored_increments() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = QcLedger::new(QcStore::new(dir.path()));
        assert!(ledger.extend_stored("a.glb", tags::CRASHED, true).unwrap());
        assert!(ledger.extend_stored("a.glb", tags::CRASHED, true).unwrap());
        assert_eq!(ledger.store().read("a.glb").count(tags::CRASHED), 2);
        assert!(ledger.vocabulary().iter().any(|n| n == tags::CRASHED));
    }

    #[test]
    fn test_derived_tags_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = QcLedger::new(QcStore::new(dir.path()));
        let mut row = Submission::new("old.glb");
        row.qc.extend(tags::NOT_LATEST, false);

        assert!(ledger.extend(&mut row, tags::NO_BASE_MESH, false));

        assert!(row.qc.contains(tags::NOT_LATEST));
        let stored = std::fs::read_to_string(ledger.store().path("old.glb")).unwrap();
        assert_eq!(stored, tags::NO_BASE_MESH);
    }

    #[test]
    fn test_save_of_only_derived_tags_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = QcStore::new(dir.path());
        store.save("a.glb", &QcTags::parse(tags::NOT_LATEST)).unwrap();
        assert!(!store.path("a.glb").exists());
    }

    #[test]
    fn test_extend_stored_keeps_earlier_diagnosis() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = QcLedger::new(QcStore::new(dir.path()));
        ledger.store().save("a.glb", &QcTags::parse("manual note;crashed:1")).unwrap();

        assert!(ledger.extend_stored("a.glb", tags::CRASHED, true).unwrap());

        let stored = ledger.store().read("a.glb");
        assert!(stored.contains("manual note"));
        assert_eq!(stored.count(tags::CRASHED), 2);
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_ledger_set_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = QcLedger::new(QcStore::new(dir.path()));
        let mut row = Submission::new("a.glb");
        ledger.extend(&mut row, tags::NO_BASE_MESH, false);
        ledger.set(&mut row, "reviewed;skip").unwrap();
        assert!(!row.qc.contains(tags::NO_BASE_MESH));
        let stored = ledger.store().read("a.glb");
        assert_eq!(stored.to_string(), "reviewed;skip");

        ledger.set(&mut row, "").unwrap();
        assert!(row.qc.is_empty());
        assert!(!ledger.store().path("a.glb").exists());
    }
}
