//! Project configuration and the on-disk layout derived from it.
//!
//! A project lives in a *config folder* holding the registry, the QC files,
//! the render outputs and the crash marker. Submissions live in a separate
//! *source folder*. Heuristic constants are read from
//! `community_render.json` in the config folder; any field left out keeps its
//! default.
//!
//! # Examples
//! ```
//! use community_render::config::ProjectConfig;
//!
//! let config = ProjectConfig::default();
//! assert_eq!(config.min_polycount, 150);
//! assert_eq!(config.crash_retry_limit, 2);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the optional configuration file inside the config folder.
pub const CONFIG_FILE: &str = "community_render.json";

/// Returns the log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "community_render=info,warn"
}

/// How objects excluded by the clutter step are kept out of the render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanishMode {
    /// Flag the object so the renderer skips it.
    Filter,
    /// Move the object far along the X axis.
    Relocate,
}

/// Tunable settings for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// File name of the form registry inside the config folder.
    pub registry_file: String,
    /// Lowercase extensions (without dot) treated as submissions.
    pub source_extensions: Vec<String>,
    /// Width and height of the full-size render.
    pub resolution: [u32; 2],
    /// Edge length of the square thumbnail render.
    pub thumbnail_pixels: u32,
    /// Minimum polygon count for a subject candidate.
    pub min_polycount: usize,
    /// Meshes at or below this polygon count are "trivial" parents.
    pub trivial_polycount: usize,
    /// Planar size the subject is scaled to, in scene units.
    pub target_width: f32,
    /// Planar sizes below this are treated as degenerate (scale 1).
    pub size_epsilon: f32,
    /// Name fragments that mark an object as scenery, matched case-insensitively.
    pub name_denylist: Vec<String>,
    /// Fraction of the subject's planar size within which loose objects follow it.
    pub debris_radius: f32,
    pub banish_mode: BanishMode,
    /// Distance along X used by [`BanishMode::Relocate`].
    pub banish_offset: f32,
    /// Rebind unpacked (external) images to the fallback texture, not only missing ones.
    pub repair_unpacked_textures: bool,
    /// File name of the fallback texture inside the config folder.
    pub fallback_texture: String,
    /// Submissions with more `crashed` tags than this are skipped.
    pub crash_retry_limit: u32,
    /// Minimum similarity ratio for fuzzy registry matches.
    pub fuzzy_threshold: f64,
    /// Show author and country captions on the full render.
    pub use_text: bool,
    pub uppercase_country: bool,
    /// Name render outputs after the form's external id when available.
    pub use_external_id: bool,
    /// Skip normalization entirely and render scenes as authored.
    pub load_original: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            registry_file: "form_responses.tsv".to_string(),
            source_extensions: vec!["gltf".into(), "glb".into(), "obj".into()],
            resolution: [1920, 1080],
            thumbnail_pixels: 100,
            min_polycount: 150,
            trivial_polycount: 12,
            target_width: 1.0,
            size_epsilon: 1e-6,
            name_denylist: ["plate", "table", "floor", "cup", "mug", "ground"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debris_radius: 0.1,
            banish_mode: BanishMode::Filter,
            banish_offset: 1000.0,
            repair_unpacked_textures: true,
            fallback_texture: "default_texture.png".to_string(),
            crash_retry_limit: 2,
            fuzzy_threshold: 0.95,
            use_text: true,
            uppercase_country: true,
            use_external_id: false,
            load_original: false,
        }
    }
}

impl ProjectConfig {
    /// Reads `community_render.json` from the config folder, or returns the
    /// defaults when the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    ///
    /// # Examples
    /// ```
    /// use std::path::Path;
    ///
    /// use community_render::config::ProjectConfig;
    ///
    /// let config = ProjectConfig::load(Path::new("does/not/exist")).unwrap();
    /// assert_eq!(config, ProjectConfig::default());
    /// ```
    pub fn load(config_folder: &Path) -> Result<Self> {
        let path = config_folder.join(CONFIG_FILE);
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "No project config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let config = serde_json::from_str(&text)?;
        tracing::info!(path = %path.display(), "Loaded project config");
        Ok(config)
    }

    /// True if `name` contains any denylisted fragment (case-insensitive).
    ///
    /// # Examples
    /// ```
    /// use community_render::config::ProjectConfig;
    ///
    /// let config = ProjectConfig::default();
    /// assert!(config.is_denylisted("Dinner_Plate.001"));
    /// assert!(!config.is_denylisted("Donut"));
    /// ```
    pub fn is_denylisted(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.name_denylist
            .iter()
            .any(|term| !term.is_empty() && lower.contains(&term.to_lowercase()))
    }

    /// True if the file name carries one of the configured source extensions.
    pub fn is_source_file(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.source_extensions.iter().any(|s| *s == e)
            })
            .unwrap_or(false)
    }
}

/// Every on-disk location the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub config_folder: PathBuf,
    pub source_folder: PathBuf,
}

impl ProjectPaths {
    pub fn new(config_folder: impl Into<PathBuf>, source_folder: impl Into<PathBuf>) -> Self {
        Self {
            config_folder: config_folder.into(),
            source_folder: source_folder.into(),
        }
    }

    pub fn registry(&self, config: &ProjectConfig) -> PathBuf {
        self.config_folder.join(&config.registry_file)
    }

    pub fn source_file(&self, file_name: &str) -> PathBuf {
        self.source_folder.join(file_name)
    }

    pub fn qc_dir(&self) -> PathBuf {
        self.config_folder.join("qc_errors")
    }

    pub fn qc_file(&self, identity: &str) -> PathBuf {
        self.qc_dir().join(format!("{}.txt", identity))
    }

    pub fn full_render_dir(&self) -> PathBuf {
        self.config_folder.join("render_full")
    }

    pub fn small_render_dir(&self) -> PathBuf {
        self.config_folder.join("render_small")
    }

    pub fn crash_marker(&self) -> PathBuf {
        self.config_folder.join("crash_cache.txt")
    }

    /// File an external supervisor watches; removed once a headless batch finishes.
    pub fn restart_sentinel(&self) -> PathBuf {
        self.config_folder.join("restart_until_finished.txt")
    }

    pub fn fallback_texture(&self, config: &ProjectConfig) -> PathBuf {
        self.config_folder.join(&config.fallback_texture)
    }
}

/// Derives the render file stem for a submission.
///
/// Drops the extension, then any trailing dot left by names such as
/// `model..glb`, so the stem matches what the renderer writes.
///
/// # Examples
/// ```
/// use community_render::config::render_stem;
///
/// assert_eq!(render_stem("donut.glb"), "donut");
/// assert_eq!(render_stem("donut..glb"), "donut");
/// assert_eq!(render_stem("no_extension"), "no_extension");
/// ```
pub fn render_stem(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[..pos],
        _ => file_name,
    };
    stem.strip_suffix('.').unwrap_or(stem).to_string()
}
