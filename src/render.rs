//! Two-pass rendering of queued submissions.
//!
//! Each submission goes `ready -> thumbnail -> full -> done`. The crash
//! marker is armed before the submission is loaded and disarmed once the
//! full pass completes, so a process that dies mid-item leaves the
//! submission's identity behind for the next start-up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};
use crate::host::{Caption, Resolution, SceneHost};
use crate::queue::{QueueStatus, Submission};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Render one row, even if normalization flagged it.
    Single,
    /// Render every ready row until the queue is exhausted or stopped.
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Both passes ran; `exists` is the on-disk check afterwards.
    Rendered { index: usize, exists: bool },
    Skipped { index: usize, reason: String },
    QueueEmpty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rendered: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, outcome: &RenderOutcome) {
        match outcome {
            RenderOutcome::Rendered { .. } => self.rendered += 1,
            RenderOutcome::Skipped { .. } => self.skipped += 1,
            RenderOutcome::QueueEmpty => {}
        }
    }
}

/// Formats a duration as `HH:MM:SS`.
///
/// ```
/// use std::time::Duration;
///
/// use community_render::render::format_hms;
///
/// assert_eq!(format_hms(Duration::from_secs(3725)), "01:02:05");
/// ```
pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// What a cooperative timer should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Rearm(Duration),
    Finished,
}

pub struct RenderOrchestrator {
    running: Arc<AtomicBool>,
    /// Set for the thumbnail pass; swallows the next completion.
    mid_render: bool,
}

impl Default for RenderOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderOrchestrator {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            mid_render: false,
        }
    }

    /// Shared flag; storing `false` stops a batch before its next item.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Renders the next ready row of the queue.
    ///
    /// Per-item failures mark the row `skip` and clear the crash marker;
    /// they are reported as [`RenderOutcome::Skipped`], not as errors.
    ///
    /// # Errors
    /// Returns an error if the crash marker or the QC files cannot be written.
    pub fn render_one<H: SceneHost>(&mut self, session: &mut Session<H>, interactive: bool) -> Result<RenderOutcome> {
        let crash_limit = session.config().crash_retry_limit;
        let Some(index) = session.queue_mut().advance_to_next_renderable(crash_limit) else {
            return Ok(RenderOutcome::QueueEmpty);
        };
        self.render_row(session, index, interactive)
    }

    fn render_row<H: SceneHost>(
        &mut self,
        session: &mut Session<H>,
        index: usize,
        interactive: bool,
    ) -> Result<RenderOutcome> {
        let identity = session.row(index)?.source_file.clone();
        session.crash_marker().arm(&identity)?;

        if let Err(e) = session.set_active(index) {
            return self.skip_on_error(session, index, e);
        }
        if !interactive && session.row(index)?.qc.is_blocking() {
            let reason = format!("flagged during normalization: {}", session.row(index)?.qc);
            return self.skip(session, index, reason);
        }

        let row = session.row(index)?.clone();
        if let Err(e) = self.render_passes(session, index, &row) {
            return self.skip_on_error(session, index, e);
        }
        let exists = session.row(index)?.render_exists;
        Ok(RenderOutcome::Rendered { index, exists })
    }

    fn render_passes<H: SceneHost>(
        &mut self,
        session: &mut Session<H>,
        index: usize,
        row: &Submission,
    ) -> Result<()> {
        let small = row.small_render_path(session.paths(), session.config());
        let full = row.full_render_path(session.paths(), session.config());
        let thumbnail = Resolution::square(session.config().thumbnail_pixels);
        let caption = session.config().use_text.then(|| Caption {
            author: row.user_name.clone(),
            country: if session.config().uppercase_country {
                row.country.to_uppercase()
            } else {
                row.country.clone()
            },
        });

        let (host, workspace) = session.host_and_workspace();
        let saved = host.resolution();
        host.set_resolution(thumbnail);
        host.set_caption(None);
        self.mid_render = true;
        let result = host.render(&workspace.render_view(), &small);
        host.set_resolution(saved);
        if let Err(e) = result {
            self.mid_render = false;
            return Err(e.into());
        }
        tracing::debug!(path = %small.display(), "Thumbnail written");
        self.on_render_complete(session, index)?;

        let (host, workspace) = session.host_and_workspace();
        host.set_caption(caption);
        host.render(&workspace.render_view(), &full)?;
        tracing::debug!(path = %full.display(), "Full render written");
        self.on_render_complete(session, index)?;
        Ok(())
    }

    /// Completion handler for one render pass. Returns false when the
    /// thumbnail guard swallowed it.
    fn on_render_complete<H: SceneHost>(&mut self, session: &mut Session<H>, index: usize) -> Result<bool> {
        if std::mem::take(&mut self.mid_render) {
            return Ok(false);
        }
        session.set_status(index, QueueStatus::Done);
        let exists = session.refresh_render_exists(index);
        session.crash_marker().disarm()?;
        tracing::info!(index, render_exists = exists, "Submission rendered");
        Ok(true)
    }

    /// Per-item and structural errors skip the row; anything else aborts.
    fn skip_on_error<H: SceneHost>(
        &mut self,
        session: &mut Session<H>,
        index: usize,
        error: PipelineError,
    ) -> Result<RenderOutcome> {
        if error.is_per_item() || matches!(error, PipelineError::Structural(_)) {
            self.skip(session, index, error.to_string())
        } else {
            Err(error)
        }
    }

    fn skip<H: SceneHost>(&mut self, session: &mut Session<H>, index: usize, reason: String) -> Result<RenderOutcome> {
        tracing::warn!(index, reason = %reason, "Skipping submission");
        session.set_status(index, QueueStatus::Skip);
        session.crash_marker().disarm()?;
        Ok(RenderOutcome::Skipped { index, reason })
    }

    /// Runs the queue. `Single` renders at most one row interactively;
    /// `Batch` renders ready rows until exhausted or stopped.
    ///
    /// # Errors
    /// Propagates bookkeeping failures from [`RenderOrchestrator::render_one`].
    pub fn run_queue<H: SceneHost>(&mut self, session: &mut Session<H>, mode: RunMode) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        self.running.store(true, Ordering::SeqCst);

        let result = match mode {
            RunMode::Single => self.render_one(session, true).map(|outcome| summary.record(&outcome)),
            RunMode::Batch => self.run_batch(session, &mut summary),
        };
        self.stop();
        result?;

        summary.elapsed = started.elapsed();
        tracing::info!(
            rendered = summary.rendered,
            skipped = summary.skipped,
            elapsed = %format_hms(summary.elapsed),
            "Render run finished"
        );
        Ok(summary)
    }

    fn run_batch<H: SceneHost>(&mut self, session: &mut Session<H>, summary: &mut RunSummary) -> Result<()> {
        while self.is_running() {
            let outcome = self.render_one(session, false)?;
            if outcome == RenderOutcome::QueueEmpty {
                break;
            }
            summary.record(&outcome);
        }
        if !self.is_running() {
            tracing::info!("Batch stopped by operator");
        }
        Ok(())
    }

    /// Queues every eligible row and renders them all.
    ///
    /// # Errors
    /// Same as [`RenderOrchestrator::run_queue`].
    pub fn render_all<H: SceneHost>(&mut self, session: &mut Session<H>) -> Result<RunSummary> {
        session.queue_mut().queue_all();
        self.run_queue(session, RunMode::Batch)
    }

    /// Queues only the active row (or the cursor row) and renders it.
    ///
    /// The operator asked for this row, so QC tags, the crash ceiling and a
    /// superseded form entry do not stop it.
    ///
    /// # Errors
    /// Same as [`RenderOrchestrator::render_one`].
    pub fn render_current<H: SceneHost>(&mut self, session: &mut Session<H>) -> Result<RenderOutcome> {
        if session.queue().is_empty() {
            return Ok(RenderOutcome::QueueEmpty);
        }
        let index = session.active().unwrap_or(session.queue().cursor());
        let index = session.queue().clamp(index);
        session.queue_mut().queue_only(index);
        self.running.store(true, Ordering::SeqCst);
        let outcome = self.render_row(session, index, true);
        self.stop();
        outcome
    }
}

/// Drives a batch one item per tick for hosts that run their own event loop.
///
/// # Examples
/// ```no_run
/// use community_render::render::{RenderOrchestrator, RenderTimer, TimerAction};
/// # fn drive<H: community_render::host::SceneHost>(session: &mut community_render::session::Session<H>) -> community_render::error::Result<()> {
/// let mut orchestrator = RenderOrchestrator::new();
/// let mut timer = RenderTimer::start(&mut orchestrator, session);
/// while let TimerAction::Rearm(delay) = timer.tick(&mut orchestrator, session)? {
///     std::thread::sleep(delay);
/// }
/// println!("{} rendered", timer.summary().rendered);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RenderTimer {
    started: Instant,
    summary: RunSummary,
    finished: bool,
}

impl RenderTimer {
    /// Queues every eligible row and raises the running flag.
    pub fn start<H: SceneHost>(orchestrator: &mut RenderOrchestrator, session: &mut Session<H>) -> Self {
        session.queue_mut().queue_all();
        orchestrator.running.store(true, Ordering::SeqCst);
        Self {
            started: Instant::now(),
            summary: RunSummary::default(),
            finished: false,
        }
    }

    /// Renders one item, or finishes when stopped or exhausted.
    ///
    /// # Errors
    /// Propagates bookkeeping failures; the timer is finished afterwards.
    pub fn tick<H: SceneHost>(
        &mut self,
        orchestrator: &mut RenderOrchestrator,
        session: &mut Session<H>,
    ) -> Result<TimerAction> {
        if self.finished || !orchestrator.is_running() {
            return Ok(self.finish(orchestrator));
        }
        match orchestrator.render_one(session, false) {
            Ok(RenderOutcome::QueueEmpty) => Ok(self.finish(orchestrator)),
            Ok(outcome) => {
                self.summary.record(&outcome);
                Ok(TimerAction::Rearm(Duration::ZERO))
            }
            Err(e) => {
                self.finish(orchestrator);
                Err(e)
            }
        }
    }

    fn finish(&mut self, orchestrator: &RenderOrchestrator) -> TimerAction {
        if !self.finished {
            self.finished = true;
            orchestrator.stop();
            self.summary.elapsed = self.started.elapsed();
            tracing::info!(
                rendered = self.summary.rendered,
                skipped = self.summary.skipped,
                elapsed = %format_hms(self.summary.elapsed),
                "Timed render run finished"
            );
        }
        TimerAction::Finished
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }
}
