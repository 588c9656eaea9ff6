//! Batch pipeline for community-submitted 3D scenes.
//!
//! Each project has a *config folder* (registry, QC files, renders, crash
//! marker) and a *source folder* of submitted scene files. A [`session::Session`]
//! merges the folder scan with the form registry into a queue; each row is
//! loaded, normalized around a single subject object and rendered twice (a
//! square thumbnail and a captioned full image) by a [`host::SceneHost`].
//! Problems never stop a batch: they become QC tags on the row.
//!
//! # Layout
//! ```text
//! <config>/form_responses.tsv     registry
//! <config>/qc_errors/<file>.txt   QC tags
//! <config>/render_small/<stem>.png
//! <config>/render_full/<stem>.png
//! <config>/crash_cache.txt        in-flight submission
//! ```
//!
//! # Examples
//! ```no_run
//! use community_render::config::{ProjectConfig, ProjectPaths};
//! use community_render::host::RasterHost;
//! use community_render::queue::QueueFilter;
//! use community_render::render::RenderOrchestrator;
//! use community_render::session::Session;
//!
//! # fn main() -> community_render::error::Result<()> {
//! let paths = ProjectPaths::new("project", "project/submissions");
//! let config = ProjectConfig::load(&paths.config_folder)?;
//! let host = RasterHost::new(config.resolution.into());
//! let mut session = Session::open(paths, config, host, QueueFilter::All)?;
//! let summary = RenderOrchestrator::new().render_all(&mut session)?;
//! println!("rendered {}", summary.rendered);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crash;
pub mod error;
pub mod existence;
pub mod formats;
pub mod host;
pub mod normalize;
pub mod qc;
pub mod queue;
pub mod registry;
pub mod render;
pub mod renderer;
pub mod scene;
pub mod session;
pub mod workspace;
