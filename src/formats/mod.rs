//! Provides the format loader trait used to turn submission files into a
//! [`Scene`].
//!
//! Loaders produce a Z-up scene graph. Formats authored Y-up (glTF, OBJ)
//! convert on import with [`y_up_to_z_up`].
//!
//! # Examples
//! ```
//! use community_render::formats;
//!
//! let result = formats::load_scene(b"invalid", None);
//! assert!(result.is_err());
//! ```

pub mod gltf;
pub mod obj;
pub mod texture;

use std::path::Path;

use glam::Mat4;
use thiserror::Error;

use crate::scene::Scene;

/// The result type for format loading.
///
/// # Examples
/// ```
/// use community_render::formats::{LoadError, LoadResult};
///
/// let result: LoadResult = Err(LoadError::UnrecognizedFormat);
/// assert!(result.is_err());
/// ```
pub type LoadResult = Result<Scene, LoadError>;

/// Errors that can occur during format loading.
///
/// # Examples
/// ```
/// use community_render::formats::LoadError;
///
/// let err = LoadError::NoScene;
/// assert_eq!(format!("{}", err), "No scene found");
/// ```
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Unrecognized format")]
    UnrecognizedFormat,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No scene found")]
    NoScene,
}

/// A trait for format-specific scene loaders.
///
/// # Examples
/// ```
/// use community_render::formats::{self, FormatLoader};
///
/// let loader = formats::gltf::GltfLoader;
/// assert_eq!(loader.name(), "glTF");
/// assert!(loader.extensions().contains(&"glb"));
/// ```
pub trait FormatLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extensions this loader handles (lowercase, without dot).
    fn extensions(&self) -> &'static [&'static str];

    /// Quick check (magic bytes, leading structure) without a full parse.
    fn can_load(&self, data: &[u8], extension: Option<&str>) -> bool;

    /// Loads a scene from raw bytes. External resources are not resolved.
    ///
    /// # Errors
    /// Returns an error if the data cannot be parsed or holds no scene.
    fn load_from_bytes(&self, data: &[u8]) -> LoadResult;

    /// Loads a scene from a file path, resolving sibling resources.
    ///
    /// The default reads the file and names the scene after its stem.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    fn load_from_path(&self, path: &Path) -> LoadResult {
        let data = std::fs::read(path)?;
        let mut scene = self.load_from_bytes(&data)?;
        scene.name = scene_name(path);
        Ok(scene)
    }
}

/// Returns all registered format loaders.
pub fn get_loaders() -> Vec<Box<dyn FormatLoader>> {
    vec![Box::new(gltf::GltfLoader), Box::new(obj::ObjLoader)]
}

/// Finds a loader that can handle the given data and extension.
///
/// # Examples
/// ```
/// use community_render::formats;
///
/// let loader = formats::find_loader(b"glTF", Some("glb"));
/// assert!(loader.is_some());
/// ```
pub fn find_loader(data: &[u8], extension: Option<&str>) -> Option<Box<dyn FormatLoader>> {
    let mut loaders = get_loaders();

    if let Some(ext) = extension {
        let ext_lower = ext.to_lowercase();
        if let Some(idx) = loaders.iter().position(|loader| {
            loader.extensions().contains(&ext_lower.as_str())
                && loader.can_load(data, Some(&ext_lower))
        }) {
            return Some(loaders.swap_remove(idx));
        }
    }

    loaders.into_iter().find(|loader| loader.can_load(data, extension))
}

/// Loads a scene from bytes, auto-detecting the format.
///
/// # Errors
/// Returns an error if no loader recognizes the data or parsing fails.
pub fn load_scene(data: &[u8], extension: Option<&str>) -> LoadResult {
    find_loader(data, extension)
        .ok_or(LoadError::UnrecognizedFormat)?
        .load_from_bytes(data)
}

/// Loads a scene from a file path, auto-detecting the format.
///
/// # Errors
/// Returns an error if the file cannot be read or the format is unrecognized.
///
/// # Examples
/// ```
/// use std::path::Path;
///
/// use community_render::formats;
///
/// let result = formats::load_scene_from_path(Path::new("does_not_exist.gltf"));
/// assert!(result.is_err());
/// ```
pub fn load_scene_from_path(path: &Path) -> LoadResult {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase());

    let data = std::fs::read(path)?;
    let loader = find_loader(&data, extension.as_deref()).ok_or(LoadError::UnrecognizedFormat)?;
    tracing::debug!(path = %path.display(), loader = loader.name(), "Loading scene");
    loader.load_from_path(path)
}

/// Rotation taking a Y-up basis to Z-up: `(x, y, z) -> (x, -z, y)`.
pub fn y_up_to_z_up() -> Mat4 {
    Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2)
}

pub(crate) fn scene_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Scene")
        .to_string()
}
