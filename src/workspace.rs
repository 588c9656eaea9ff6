//! The working session: one placeholder, at most one resident scene.
//!
//! Every submission is shown through the same placeholder. Loading a new
//! submission detaches the previous scene before the new one is attached, so
//! two scenes are never resident at once. All normalization edits happen on
//! the in-memory copy and vanish on the next load.

use std::path::Path;

use glam::Mat4;

use crate::error::{PipelineError, Result};
use crate::existence::file_exists;
use crate::host::{HostError, RenderView, SceneHost};
use crate::scene::{ObjectId, Scene, Transform};

/// Persistent object that instances the resident scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub name: String,
    pub transform: Transform,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self {
            name: "submission".to_string(),
            transform: Transform::IDENTITY,
        }
    }
}

#[derive(Debug, Default)]
pub struct Workspace {
    placeholder: Placeholder,
    resident: Option<Scene>,
    subject: Option<ObjectId>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder(&self) -> &Placeholder {
        &self.placeholder
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.resident.as_ref()
    }

    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.resident.as_mut()
    }

    /// Borrows the resident scene and the placeholder together.
    pub fn parts_mut(&mut self) -> Option<(&mut Scene, &mut Placeholder)> {
        self.resident
            .as_mut()
            .map(|scene| (scene, &mut self.placeholder))
    }

    /// Subject chosen for the current submission, if normalization found one.
    pub fn subject(&self) -> Option<ObjectId> {
        self.subject
    }

    pub fn set_subject(&mut self, subject: Option<ObjectId>) {
        self.subject = subject;
    }

    /// Brings `path` in as the resident scene behind the placeholder.
    ///
    /// The previous scene is dropped first, so a missing file or a failed
    /// load leaves the placeholder empty rather than showing stale content.
    ///
    /// # Errors
    /// [`PipelineError::NotFound`] if `path` does not exist,
    /// [`PipelineError::LoadFailure`] if the host extracts no scene.
    pub fn load<H: SceneHost + ?Sized>(&mut self, host: &mut H, path: &Path, label: &str) -> Result<()> {
        self.unload();

        if !file_exists(None, path) {
            return Err(PipelineError::NotFound(path.to_path_buf()));
        }

        let scene = host.open_scene(path).map_err(|e| {
            let reason = match e {
                HostError::Open { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            PipelineError::LoadFailure {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        tracing::info!(
            path = %path.display(),
            scene = %scene.name,
            objects = scene.object_count(),
            "Loaded submission scene"
        );
        self.placeholder = Placeholder {
            name: label.to_string(),
            transform: Transform::IDENTITY,
        };
        self.resident = Some(scene);
        Ok(())
    }

    /// Detaches the resident scene and resets the placeholder.
    pub fn unload(&mut self) {
        if let Some(old) = self.resident.take() {
            tracing::debug!(scene = %old.name, "Detached previous scene");
        }
        self.subject = None;
        self.placeholder.transform = Transform::IDENTITY;
    }

    pub fn render_view(&self) -> RenderView<'_> {
        RenderView {
            scene: self.resident.as_ref(),
            placeholder: self.placeholder_matrix(),
        }
    }

    pub fn placeholder_matrix(&self) -> Mat4 {
        self.placeholder.transform.matrix()
    }
}
