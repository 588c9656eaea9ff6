//! Error taxonomy for the submission pipeline.
//!
//! Only [`PipelineError::Config`] and [`PipelineError::Structural`] are meant
//! to stop work: the first aborts a queue rebuild, the second the current
//! item. Everything recoverable per item ends up as a QC tag instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Could not load a scene from {}: {reason}", path.display())]
    LoadFailure { path: PathBuf, reason: String },

    #[error("Structural inconsistency: {0}")]
    Structural(String),

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Render failed: {0}")]
    Render(#[from] HostError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// True for errors that only disqualify one submission.
    ///
    /// # Examples
    /// ```
    /// use std::path::PathBuf;
    ///
    /// use community_render::error::PipelineError;
    ///
    /// assert!(PipelineError::NotFound(PathBuf::from("a.glb")).is_per_item());
    /// assert!(!PipelineError::Config("missing column".into()).is_per_item());
    /// ```
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_) | PipelineError::LoadFailure { .. } | PipelineError::Render(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
