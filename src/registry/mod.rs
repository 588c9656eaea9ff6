//! Form registry: who submitted which file.
//!
//! The registry is a TSV export of the submission form. Each row names a
//! source file plus the author's name and country; optional columns give an
//! email (used to spot resubmissions) and a URL (used to derive an external
//! id). Lookups try an exact key, then the key with duplicate-copy suffixes
//! removed, then a similarity strategy above a threshold.
//!
//! # Examples
//! ```
//! use community_render::registry::Registry;
//!
//! let tsv = "blend_filename\tfull_name\tcountry\nsample.glb\tJane Doe\tUS\n";
//! let registry = Registry::parse(tsv, 0.95).unwrap();
//! let record = registry.resolve("sample.glb").unwrap().record();
//! assert_eq!(record.user_name, "Jane Doe");
//! ```

pub mod matching;
pub mod tsv;

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{PipelineError, Result};
use matching::{MatchStrategy, SequenceRatio};

const FILENAME_COLUMNS: &[&str] = &["blend_filename", "filename", "source_filename"];
const NAME_COLUMN: &str = "full_name";
const COUNTRY_COLUMN: &str = "country";
const EMAIL_COLUMN: &str = "email";
const URL_COLUMN: &str = "blend_url";

/// One submission as recorded by the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub source_file: String,
    pub user_name: String,
    pub country: String,
    pub email: Option<String>,
    pub external_id: Option<String>,
    /// False when the same email submitted again later.
    pub latest: bool,
    /// Zero-based data row index in the file.
    pub row: usize,
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Exact(&'a RegistryRecord),
    /// Matched after removing a duplicate-copy suffix such as ` (1)`.
    Normalized(&'a RegistryRecord),
    Fuzzy { record: &'a RegistryRecord, score: f64 },
}

impl<'a> Resolution<'a> {
    pub fn record(&self) -> &'a RegistryRecord {
        match self {
            Resolution::Exact(r) | Resolution::Normalized(r) => r,
            Resolution::Fuzzy { record, .. } => record,
        }
    }
}

/// Parsed registry keyed by source filename.
pub struct Registry {
    records: HashMap<String, RegistryRecord>,
    external_ids: HashMap<String, String>,
    strategy: Box<dyn MatchStrategy>,
    threshold: f64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("records", &self.records.len())
            .field("strategy", &self.strategy.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Registry {
    /// A registry with no rows; every lookup misses.
    pub fn empty() -> Self {
        Self {
            records: HashMap::new(),
            external_ids: HashMap::new(),
            strategy: Box::new(SequenceRatio),
            threshold: 1.0,
        }
    }

    /// Loads the registry file. A missing file yields an empty registry.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] when required columns are absent and
    /// an IO error when the file exists but cannot be read.
    pub fn load(path: &Path, threshold: f64) -> Result<Self> {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "Registry file not found, no form data");
            return Ok(Self::empty());
        }
        let text = std::fs::read_to_string(path)?;
        let registry = Self::parse(&text, threshold)?;
        tracing::info!(path = %path.display(), records = registry.len(), "Loaded registry");
        Ok(registry)
    }

    /// Parses registry text.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] when the header lacks a filename,
    /// `full_name` or `country` column.
    pub fn parse(text: &str, threshold: f64) -> Result<Self> {
        let mut rows = tsv::parse_rows(text).into_iter();
        let header: Vec<String> = rows
            .next()
            .ok_or_else(|| PipelineError::Config("registry has no header row".into()))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let column = |name: &str| header.iter().position(|h| h == name);

        let filename_col = FILENAME_COLUMNS
            .iter()
            .find_map(|c| column(*c))
            .ok_or_else(|| PipelineError::Config("blend_filename not in registry header".into()))?;
        let (name_col, country_col) = match (column(NAME_COLUMN), column(COUNTRY_COLUMN)) {
            (Some(n), Some(c)) => (n, c),
            _ => {
                return Err(PipelineError::Config(
                    "full_name/country not in registry header".into(),
                ))
            }
        };
        let email_col = column(EMAIL_COLUMN);
        let url_col = column(URL_COLUMN);

        let field = |row: &[String], idx: usize| row.get(idx).map(|s| s.trim().to_string());
        let optional = |row: &[String], idx: Option<usize>| {
            idx.and_then(|i| field(row, i)).filter(|s| !s.is_empty())
        };

        let mut records: HashMap<String, RegistryRecord> = HashMap::new();
        let mut latest_by_email: HashMap<String, String> = HashMap::new();

        // Rows are assumed to be in submission order.
        for (idx, row) in rows.enumerate() {
            let Some(source_file) = field(&row, filename_col).filter(|s| !s.is_empty()) else {
                tracing::debug!(row = idx, "Registry row without filename, skipped");
                continue;
            };
            let email = optional(&row, email_col).map(|e| e.to_lowercase());
            if let Some(email) = &email {
                latest_by_email.insert(email.clone(), source_file.clone());
            }
            let record = RegistryRecord {
                user_name: field(&row, name_col).unwrap_or_default(),
                country: field(&row, country_col).unwrap_or_default(),
                external_id: optional(&row, url_col).and_then(|u| external_id_from_url(&u)),
                email,
                latest: true,
                row: idx,
                source_file: source_file.clone(),
            };
            if records.insert(source_file.clone(), record).is_some() {
                tracing::debug!(source_file = %source_file, row = idx, "Duplicate filename in registry, later row wins");
            }
        }

        for record in records.values_mut() {
            if let Some(email) = &record.email {
                if latest_by_email.get(email) != Some(&record.source_file) {
                    record.latest = false;
                }
            }
        }

        let external_ids = records
            .values()
            .filter_map(|r| r.external_id.clone().map(|id| (id, r.source_file.clone())))
            .collect();

        Ok(Self {
            records,
            external_ids,
            strategy: Box::new(SequenceRatio),
            threshold,
        })
    }

    /// Replaces the similarity strategy used as the last lookup step.
    pub fn with_strategy(mut self, strategy: Box<dyn MatchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, source_file: &str) -> Option<&RegistryRecord> {
        self.records.get(source_file)
    }

    /// Looks up a submission by filename or external id.
    pub fn resolve(&self, identity: &str) -> Option<Resolution<'_>> {
        if let Some(record) = self.records.get(identity) {
            return Some(Resolution::Exact(record));
        }
        if let Some(record) = self
            .external_ids
            .get(identity)
            .and_then(|file| self.records.get(file))
        {
            return Some(Resolution::Exact(record));
        }

        let normalized = strip_copy_suffix(identity);
        if normalized != identity {
            if let Some(record) = self.records.get(&normalized) {
                tracing::debug!(identity, normalized = %normalized, "Registry match after suffix normalization");
                return Some(Resolution::Normalized(record));
            }
        }

        if self.records.is_empty() {
            return None;
        }
        let mut keys: Vec<&String> = self.records.keys().collect();
        keys.sort();
        let mut best: Option<(&String, f64)> = None;
        for key in keys {
            let score = self.strategy.similarity(identity, key);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((key, score));
            }
        }
        let (key, score) = best?;
        if score < self.threshold {
            return None;
        }
        tracing::info!(
            identity,
            matched = %key,
            score,
            strategy = self.strategy.name(),
            "Fuzzy registry match"
        );
        self.records
            .get(key)
            .map(|record| Resolution::Fuzzy { record, score })
    }
}

fn copy_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(?P<stem>.*?)(?:\s*\(\d+\)|\s+-\s+copy)+(?P<ext>\.[^.]+)?$")
            .expect("copy suffix pattern is valid")
    })
}

/// Removes duplicate-copy markers such as ` (1)` or ` - Copy` before the extension.
///
/// # Examples
/// ```
/// use community_render::registry::strip_copy_suffix;
///
/// assert_eq!(strip_copy_suffix("donut (1).glb"), "donut.glb");
/// assert_eq!(strip_copy_suffix("donut - Copy (2).glb"), "donut.glb");
/// assert_eq!(strip_copy_suffix("donut.glb"), "donut.glb");
/// ```
pub fn strip_copy_suffix(file_name: &str) -> String {
    match copy_suffix_pattern().captures(file_name) {
        Some(caps) => format!(
            "{}{}",
            caps.name("stem").map_or("", |m| m.as_str()),
            caps.name("ext").map_or("", |m| m.as_str())
        ),
        None => file_name.to_string(),
    }
}

/// Pulls an id out of a share URL: the `id=` query value, else the last path
/// segment.
///
/// # Examples
/// ```
/// use community_render::registry::external_id_from_url;
///
/// assert_eq!(
///     external_id_from_url("https://drive.example.com/open?id=1AbC"),
///     Some("1AbC".to_string())
/// );
/// assert_eq!(
///     external_id_from_url("https://files.example.com/d/xyz/"),
///     Some("xyz".to_string())
/// );
/// ```
pub fn external_id_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    if let Some((_, query)) = url.split_once('?') {
        for pair in query.split('&') {
            if let Some(id) = pair.strip_prefix("id=") {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    // First segment is the host.
    segments.next()?;
    segments.last().map(str::to_string)
}
