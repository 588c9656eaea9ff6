//! The narrow interface the pipeline needs from a 3D host.
//!
//! [`SceneHost`] covers the four capabilities the pipeline relies on: open a
//! scene file, report and change the output resolution, set the caption
//! overlay, and render the working session to an image file. [`RasterHost`]
//! implements it with the crate's software rasterizer.
//!
//! # Examples
//! ```
//! use community_render::host::{RasterHost, Resolution, SceneHost};
//!
//! let mut host = RasterHost::new(Resolution::new(64, 48));
//! host.set_resolution(Resolution::square(16));
//! assert_eq!(host.resolution(), Resolution::new(16, 16));
//! ```

use std::path::{Path, PathBuf};

use glam::Mat4;
use thiserror::Error;

use crate::formats::{self, LoadError};
use crate::renderer::{self, Camera};
use crate::scene::Scene;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Could not open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("Render output failed: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(edge: u32) -> Self {
        Self::new(edge, edge)
    }
}

impl From<[u32; 2]> for Resolution {
    fn from([width, height]: [u32; 2]) -> Self {
        Self::new(width, height)
    }
}

/// Author credit drawn over the full render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub author: String,
    pub country: String,
}

/// What to draw: the resident scene (if any) under the placeholder transform.
#[derive(Debug, Clone, Copy)]
pub struct RenderView<'a> {
    pub scene: Option<&'a Scene>,
    pub placeholder: Mat4,
}

pub trait SceneHost {
    /// Reads a scene file. The returned scene is owned by the caller.
    ///
    /// # Errors
    /// [`HostError::Open`] when nothing could be extracted from the file.
    fn open_scene(&mut self, path: &Path) -> Result<Scene, HostError>;

    fn resolution(&self) -> Resolution;

    fn set_resolution(&mut self, resolution: Resolution);

    /// `None` hides the caption overlay.
    fn set_caption(&mut self, caption: Option<Caption>);

    /// Renders the view at the current resolution and writes `output`.
    ///
    /// # Errors
    /// Returns an error if the image cannot be produced or written.
    fn render(&mut self, view: &RenderView<'_>, output: &Path) -> Result<(), HostError>;
}

/// Headless host built on the software rasterizer. Writes PNG files.
///
/// A caption, when set, is drawn as two bitmap lines (author, then country)
/// in the bottom-left corner.
#[derive(Debug, Clone)]
pub struct RasterHost {
    resolution: Resolution,
    caption: Option<Caption>,
    pub camera: Camera,
}

impl RasterHost {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            caption: None,
            camera: Camera::default(),
        }
    }

    pub fn caption(&self) -> Option<&Caption> {
        self.caption.as_ref()
    }
}

impl SceneHost for RasterHost {
    fn open_scene(&mut self, path: &Path) -> Result<Scene, HostError> {
        formats::load_scene_from_path(path).map_err(|source| HostError::Open {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    fn set_caption(&mut self, caption: Option<Caption>) {
        self.caption = caption;
    }

    fn render(&mut self, view: &RenderView<'_>, output: &Path) -> Result<(), HostError> {
        let Resolution { width, height } = self.resolution;
        let triangles = view
            .scene
            .map(|scene| renderer::collect_triangles(scene, view.placeholder))
            .unwrap_or_default();
        let mut pixels = renderer::rasterize(&triangles, &self.camera, width, height);

        if let Some(caption) = &self.caption {
            tracing::debug!(author = %caption.author, country = %caption.country, "Drawing caption");
            renderer::draw_caption(
                &mut pixels,
                width,
                height,
                &[caption.author.as_str(), caption.country.as_str()],
            );
        }

        let image = image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| HostError::Output(format!("bad frame size {}x{}", width, height)))?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save(output)?;
        tracing::debug!(path = %output.display(), width, height, triangles = triangles.len(), "Wrote render");
        Ok(())
    }
}
