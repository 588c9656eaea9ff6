//! The ordered submission queue.
//!
//! A queue is rebuilt wholesale from the source folder, the registry and
//! the QC files on every rescan. Rows carry a [`QueueStatus`]; the render
//! loop walks the queue with a cursor via
//! [`SubmissionQueue::advance_to_next_renderable`].
//!
//! # Examples
//! ```
//! use community_render::queue::{QueueStatus, Submission, SubmissionQueue};
//!
//! let mut queue = SubmissionQueue::from_rows(vec![
//!     Submission::new("a.glb"),
//!     Submission::new("b.glb"),
//! ]);
//! queue.queue_all();
//! assert_eq!(queue.advance_to_next_renderable(2), Some(0));
//! assert_eq!(queue.get(1).unwrap().status, QueueStatus::Ready);
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rand::Rng;
use walkdir::WalkDir;

use crate::config::{render_stem, ProjectConfig, ProjectPaths};
use crate::error::{PipelineError, Result};
use crate::existence::{file_exists, ExistenceCache};
use crate::qc::{tags, QcLedger, QcTags};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueStatus {
    #[default]
    NotQueued,
    Ready,
    Done,
    Skip,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueStatus::NotQueued => "not_queued",
            QueueStatus::Ready => "ready",
            QueueStatus::Done => "done",
            QueueStatus::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// One source file and everything tracked about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// File name without extension.
    pub label: String,
    /// File name in the source folder; the submission's identity.
    pub source_file: String,
    pub user_name: String,
    pub country: String,
    pub external_id: Option<String>,
    pub qc: QcTags,
    pub status: QueueStatus,
    pub render_exists: bool,
    pub has_form_match: bool,
    /// False when the submitter sent a newer entry.
    pub latest: bool,
}

impl Submission {
    pub fn new(source_file: impl Into<String>) -> Self {
        let source_file = source_file.into();
        Self {
            label: render_stem(&source_file),
            source_file,
            user_name: String::new(),
            country: String::new(),
            external_id: None,
            qc: QcTags::default(),
            status: QueueStatus::NotQueued,
            render_exists: false,
            has_form_match: false,
            latest: true,
        }
    }

    /// Base name of the render files for this row.
    pub fn render_base(&self, use_external_id: bool) -> String {
        match (&self.external_id, use_external_id) {
            (Some(id), true) if !id.is_empty() => id.clone(),
            _ => render_stem(&self.source_file),
        }
    }

    pub fn full_render_path(&self, paths: &ProjectPaths, config: &ProjectConfig) -> PathBuf {
        paths
            .full_render_dir()
            .join(format!("{}.png", self.render_base(config.use_external_id)))
    }

    pub fn small_render_path(&self, paths: &ProjectPaths, config: &ProjectConfig) -> PathBuf {
        paths
            .small_render_dir()
            .join(format!("{}.png", self.render_base(config.use_external_id)))
    }

    /// Both render files present, from `cache` when given, else from disk.
    pub fn check_render_exists(
        &self,
        paths: &ProjectPaths,
        config: &ProjectConfig,
        cache: Option<&ExistenceCache>,
    ) -> bool {
        file_exists(cache, &self.full_render_path(paths, config))
            && file_exists(cache, &self.small_render_path(paths, config))
    }
}

/// Which rows a rebuild keeps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueueFilter {
    #[default]
    All,
    /// Rows without both render files.
    MissingOnly,
    /// Rows with any QC tag.
    AnyQc,
    /// Rows carrying this QC tag name.
    Tag(String),
}

impl QueueFilter {
    pub fn keeps(&self, row: &Submission) -> bool {
        match self {
            QueueFilter::All => true,
            QueueFilter::MissingOnly => !row.render_exists,
            QueueFilter::AnyQc => !row.qc.is_empty(),
            QueueFilter::Tag(name) => row.qc.contains(name),
        }
    }
}

impl FromStr for QueueFilter {
    type Err = String;

    /// Parses `all`, `missing`, `qc` or `tag:<name>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(QueueFilter::All),
            "missing" => Ok(QueueFilter::MissingOnly),
            "qc" => Ok(QueueFilter::AnyQc),
            _ => match s.strip_prefix("tag:") {
                Some(name) if !name.is_empty() => Ok(QueueFilter::Tag(name.to_string())),
                _ => Err(format!("unknown filter '{s}', expected all, missing, qc or tag:<name>")),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub source_files: usize,
    pub non_source_files: usize,
    pub rendered: usize,
    pub qc_flagged: usize,
    pub no_form_match: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionQueue {
    rows: Vec<Submission>,
    cursor: usize,
    non_source_files: usize,
}

impl SubmissionQueue {
    pub fn from_rows(rows: Vec<Submission>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Scans the source folder and builds a fresh queue.
    ///
    /// Files are sorted by name. Registry data, stored QC tags and render
    /// existence are merged in from a one-off [`ExistenceCache`]; rows from
    /// superseded form entries gain an in-memory `not_latest_entry` tag.
    ///
    /// # Errors
    /// [`PipelineError::Config`] if the source folder does not exist.
    pub fn rebuild(
        paths: &ProjectPaths,
        config: &ProjectConfig,
        registry: &Registry,
        ledger: &mut QcLedger,
        filter: &QueueFilter,
    ) -> Result<Self> {
        if !paths.source_folder.is_dir() {
            return Err(PipelineError::Config(format!(
                "source folder does not exist: {}",
                paths.source_folder.display()
            )));
        }

        let mut sources = Vec::new();
        let mut non_source_files = 0;
        for entry in WalkDir::new(&paths.source_folder)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if config.is_source_file(&name) {
                sources.push(name);
            } else {
                non_source_files += 1;
            }
        }
        sources.sort();

        let mut cache = ExistenceCache::build(
            &[paths.full_render_dir(), paths.small_render_dir(), paths.qc_dir()],
            &["png", "txt"],
        );
        ledger.vocabulary_mut().clear();

        let mut rows = Vec::with_capacity(sources.len());
        for source_file in sources {
            let mut row = Submission::new(source_file);

            match registry.resolve(&row.source_file) {
                Some(found) => {
                    let record = found.record();
                    row.user_name = record.user_name.clone();
                    row.country = record.country.clone();
                    row.external_id = record.external_id.clone();
                    row.latest = record.latest;
                    row.has_form_match = true;
                }
                None => tracing::debug!(submission = %row.source_file, "No form entry"),
            }

            if cache.contains(&ledger.store().path(&row.source_file)) {
                row.qc = ledger.store().read(&row.source_file);
                row.qc.retain(|name| !tags::is_derived(name));
            }
            if !row.latest {
                row.qc.extend(tags::NOT_LATEST, false);
            }
            ledger.vocabulary_mut().register_all(&row.qc);
            row.render_exists = row.check_render_exists(paths, config, Some(&cache));

            if filter.keeps(&row) {
                rows.push(row);
            }
        }
        cache.clear();

        let queue = Self {
            rows,
            cursor: 0,
            non_source_files,
        };
        let stats = queue.stats();
        tracing::info!(
            rows = queue.len(),
            filter = ?filter,
            source_files = stats.source_files,
            non_source_files = stats.non_source_files,
            rendered = stats.rendered,
            qc_flagged = stats.qc_flagged,
            no_form_match = stats.no_form_match,
            "Rebuilt submission queue"
        );
        Ok(queue)
    }

    pub fn rows(&self) -> &[Submission] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Submission> {
        self.rows.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Submission> {
        self.rows.get_mut(index)
    }

    pub fn position(&self, source_file: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.source_file == source_file)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor, clamped into range. Returns the clamped index.
    pub fn set_cursor(&mut self, index: usize) -> usize {
        self.cursor = self.clamp(index);
        self.cursor
    }

    pub fn clamp(&self, index: usize) -> usize {
        index.min(self.rows.len().saturating_sub(1))
    }

    /// Marks rows without a render or blocking QC tag ready, the rest skip.
    ///
    /// A `crashed` tag alone does not block; the crash ceiling handles it.
    pub fn queue_all(&mut self) {
        for row in &mut self.rows {
            row.status = if row.render_exists || row.qc.is_blocking() {
                QueueStatus::Skip
            } else {
                QueueStatus::Ready
            };
        }
        self.cursor = 0;
    }

    /// Marks only `index` ready and points the cursor at it.
    pub fn queue_only(&mut self, index: usize) {
        let index = self.clamp(index);
        for (i, row) in self.rows.iter_mut().enumerate() {
            row.status = if i == index {
                QueueStatus::Ready
            } else {
                QueueStatus::NotQueued
            };
        }
        self.cursor = index;
    }

    /// Finds the next ready row from the cursor (inclusive) and moves the
    /// cursor there. Ready rows disqualified on the way are marked skip.
    pub fn advance_to_next_renderable(&mut self, crash_limit: u32) -> Option<usize> {
        for i in self.cursor..self.rows.len() {
            let row = &mut self.rows[i];
            if row.status != QueueStatus::Ready {
                continue;
            }
            let reason = if row.qc.count(tags::CRASHED) > crash_limit {
                Some("crash ceiling reached")
            } else if row.qc.contains(tags::NOT_LATEST) {
                Some("superseded form entry")
            } else if row.qc.has_skip() {
                Some("skip tag")
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    tracing::info!(submission = %row.source_file, reason, "Skipping submission");
                    row.status = QueueStatus::Skip;
                }
                None => {
                    self.cursor = i;
                    return Some(i);
                }
            }
        }
        self.cursor = self.rows.len();
        None
    }

    pub fn next_index(&self, from: usize) -> Option<usize> {
        match self.rows.len() {
            0 => None,
            n => Some((from + 1) % n),
        }
    }

    pub fn previous_index(&self, from: usize) -> Option<usize> {
        match self.rows.len() {
            0 => None,
            n => Some((from % n + n - 1) % n),
        }
    }

    pub fn random_index<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.rows.is_empty() {
            None
        } else {
            Some(rng.gen_range(0..self.rows.len()))
        }
    }

    pub fn count_status(&self, status: QueueStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            source_files: self.rows.len(),
            non_source_files: self.non_source_files,
            rendered: self.rows.iter().filter(|r| r.render_exists).count(),
            qc_flagged: self.rows.iter().filter(|r| !r.qc.is_empty()).count(),
            no_form_match: self.rows.iter().filter(|r| !r.has_form_match).count(),
        }
    }
}
