//! Session state: the one place every pipeline mutation goes through.
//!
//! A [`Session`] owns the project configuration, the registry, the queue,
//! the QC ledger, the working scene and the host. Opening a session first
//! recovers from a crash marker left by a previous process, then rebuilds
//! the queue.

use std::io::ErrorKind;
use std::path::Path;

use rand::Rng;

use crate::config::{ProjectConfig, ProjectPaths};
use crate::crash::CrashMarker;
use crate::error::{PipelineError, Result};
use crate::host::SceneHost;
use crate::normalize::{self, NormalizeReport};
use crate::qc::{tags, QcLedger, QcStore};
use crate::queue::{QueueFilter, QueueStats, QueueStatus, Submission, SubmissionQueue};
use crate::registry::Registry;
use crate::workspace::Workspace;

/// Result of making a row active.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub index: usize,
    /// `None` when normalization is disabled by `load_original`.
    pub report: Option<NormalizeReport>,
}

impl Activation {
    /// True if normalization raised a QC tag for this row.
    pub fn flagged(&self) -> bool {
        self.report.as_ref().is_some_and(|r| !r.tags.is_empty())
    }
}

pub struct Session<H: SceneHost> {
    config: ProjectConfig,
    paths: ProjectPaths,
    host: H,
    registry: Registry,
    ledger: QcLedger,
    queue: SubmissionQueue,
    workspace: Workspace,
    crash: CrashMarker,
    filter: QueueFilter,
    active: Option<usize>,
}

impl<H: SceneHost> Session<H> {
    /// Loads the registry, recovers from a previous crash and builds the queue.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] for a malformed registry or a
    /// missing source folder, and IO errors from crash recovery.
    pub fn open(paths: ProjectPaths, config: ProjectConfig, host: H, filter: QueueFilter) -> Result<Self> {
        let registry = Registry::load(&paths.registry(&config), config.fuzzy_threshold)?;
        let mut session = Self {
            ledger: QcLedger::new(QcStore::new(paths.qc_dir())),
            crash: CrashMarker::new(paths.crash_marker()),
            registry,
            config,
            paths,
            host,
            queue: SubmissionQueue::default(),
            workspace: Workspace::new(),
            filter: QueueFilter::All,
            active: None,
        };
        session.recover_crash()?;
        session.rebuild(filter)?;
        Ok(session)
    }

    /// Tags the submission named by a leftover crash marker and clears it.
    ///
    /// # Errors
    /// Returns an error if the marker or the QC file cannot be accessed.
    pub fn recover_crash(&mut self) -> Result<Option<String>> {
        let Some(identity) = self.crash.peek()? else {
            return Ok(None);
        };
        tracing::warn!(submission = %identity, "Previous run crashed while processing submission");
        self.ledger.extend_stored(&identity, tags::CRASHED, true)?;
        self.crash.disarm()?;
        Ok(Some(identity))
    }

    /// Replaces the queue with a fresh scan. On error the old queue stays.
    ///
    /// # Errors
    /// [`PipelineError::Config`] if the source folder does not exist.
    pub fn rebuild(&mut self, filter: QueueFilter) -> Result<()> {
        let queue = SubmissionQueue::rebuild(
            &self.paths,
            &self.config,
            &self.registry,
            &mut self.ledger,
            &filter,
        )?;
        self.queue = queue;
        self.filter = filter;
        self.active = None;
        Ok(())
    }

    /// Re-reads the registry and rescans, keeping the cursor on the same file
    /// when it is still listed.
    ///
    /// # Errors
    /// Same as [`Session::open`].
    pub fn reload(&mut self) -> Result<()> {
        let current = self
            .queue
            .get(self.queue.cursor())
            .map(|r| r.source_file.clone());
        let cursor = self.queue.cursor();
        self.registry = Registry::load(&self.paths.registry(&self.config), self.config.fuzzy_threshold)?;
        self.rebuild(self.filter.clone())?;
        let index = current
            .and_then(|name| self.queue.position(&name))
            .unwrap_or(cursor);
        self.queue.set_cursor(index);
        Ok(())
    }

    /// Loads and normalizes the row at `index` (clamped).
    ///
    /// Load failures tag the row `load_failed`; normalization tags are
    /// applied through the ledger. Render existence is re-checked on disk.
    ///
    /// # Errors
    /// [`PipelineError::EmptyQueue`], [`PipelineError::NotFound`],
    /// [`PipelineError::LoadFailure`] or [`PipelineError::Structural`].
    pub fn set_active(&mut self, index: usize) -> Result<Activation> {
        if self.queue.is_empty() {
            return Err(PipelineError::EmptyQueue);
        }
        let index = self.queue.set_cursor(index);
        self.active = Some(index);
        let (source_file, label) = {
            let row = self.row(index)?;
            (row.source_file.clone(), row.label.clone())
        };
        tracing::info!(index, submission = %source_file, "Activating submission");

        let path = self.paths.source_file(&source_file);
        if let Err(e) = self.workspace.load(&mut self.host, &path, &label) {
            if let PipelineError::LoadFailure { .. } = e {
                let row = self.queue.get_mut(index).ok_or(PipelineError::EmptyQueue)?;
                self.ledger.extend(row, tags::LOAD_FAILED, false);
            }
            tracing::warn!(submission = %source_file, error = %e, "Could not load submission");
            return Err(e);
        }

        let report = if self.config.load_original {
            None
        } else {
            let fallback = self.paths.fallback_texture(&self.config);
            Some(normalize::normalize(&mut self.workspace, &self.config, &fallback)?)
        };

        let row = self.queue.get_mut(index).ok_or(PipelineError::EmptyQueue)?;
        if let Some(report) = &report {
            for tag in &report.tags {
                self.ledger.extend(row, tag, false);
            }
        }
        row.render_exists = row.check_render_exists(&self.paths, &self.config, None);

        Ok(Activation { index, report })
    }

    pub fn open_next(&mut self) -> Result<Activation> {
        let from = self.active.unwrap_or(self.queue.cursor());
        let index = self.queue.next_index(from).ok_or(PipelineError::EmptyQueue)?;
        self.set_active(index)
    }

    pub fn open_previous(&mut self) -> Result<Activation> {
        let from = self.active.unwrap_or(self.queue.cursor());
        let index = self.queue.previous_index(from).ok_or(PipelineError::EmptyQueue)?;
        self.set_active(index)
    }

    pub fn open_random(&mut self) -> Result<Activation> {
        self.open_random_with(&mut rand::thread_rng())
    }

    pub fn open_random_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Activation> {
        let index = self.queue.random_index(rng).ok_or(PipelineError::EmptyQueue)?;
        self.set_active(index)
    }

    /// Removes both render files of a row and re-checks existence.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be removed.
    pub fn delete_render(&mut self, index: usize) -> Result<()> {
        let row = self.row(index)?;
        let files = [
            row.full_render_path(&self.paths, &self.config),
            row.small_render_path(&self.paths, &self.config),
        ];
        for file in &files {
            remove_if_present(file)?;
        }
        let row = self.queue.get_mut(index).ok_or(PipelineError::EmptyQueue)?;
        row.render_exists = row.check_render_exists(&self.paths, &self.config, None);
        tracing::info!(submission = %row.source_file, "Deleted renders");
        Ok(())
    }

    /// Replaces a row's QC tags with `text`; empty text clears them.
    ///
    /// # Errors
    /// Returns an error if the QC file cannot be rewritten.
    pub fn set_qc(&mut self, index: usize, text: &str) -> Result<()> {
        let row = self.queue.get_mut(index).ok_or(PipelineError::EmptyQueue)?;
        self.ledger.set(row, text)
    }

    /// Applies a QC tag to a row through the ledger.
    pub fn tag(&mut self, index: usize, tag: &str, incrementable: bool) -> bool {
        match self.queue.get_mut(index) {
            Some(row) => self.ledger.extend(row, tag, incrementable),
            None => false,
        }
    }

    pub fn set_status(&mut self, index: usize, status: QueueStatus) {
        if let Some(row) = self.queue.get_mut(index) {
            tracing::debug!(submission = %row.source_file, %status, "Status changed");
            row.status = status;
        }
    }

    /// Re-checks the disk for a row's render files.
    pub fn refresh_render_exists(&mut self, index: usize) -> bool {
        match self.queue.get_mut(index) {
            Some(row) => {
                row.render_exists = row.check_render_exists(&self.paths, &self.config, None);
                row.render_exists
            }
            None => false,
        }
    }

    pub fn row(&self, index: usize) -> Result<&Submission> {
        self.queue.get(index).ok_or(PipelineError::EmptyQueue)
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut SubmissionQueue {
        &mut self.queue
    }

    pub fn ledger(&self) -> &QcLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn crash_marker(&self) -> &CrashMarker {
        &self.crash
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Borrows the host and the workspace together for rendering.
    pub fn host_and_workspace(&mut self) -> (&mut H, &Workspace) {
        (&mut self.host, &self.workspace)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
