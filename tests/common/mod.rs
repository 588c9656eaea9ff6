//! Shared fixtures: a scratch project folder and a scripted scene host.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::Vec3;
use tempfile::TempDir;

use community_render::config::{ProjectConfig, ProjectPaths};
use community_render::host::{Caption, HostError, RenderView, Resolution, SceneHost};
use community_render::queue::QueueFilter;
use community_render::scene::{Material, MeshData, ObjectKind, Scene, SceneObject, Transform};
use community_render::session::Session;

pub const REGISTRY_HEADER: &str = "timestamp\temail\tfull_name\tcountry\tblend_filename\tblend_url\n";

/// A config folder with a `submissions` source folder inside it.
pub struct Project {
    pub dir: TempDir,
    pub paths: ProjectPaths,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path(), dir.path().join("submissions"));
        std::fs::create_dir_all(&paths.source_folder).unwrap();
        Self { dir, paths }
    }

    /// Writes a source file whose text tells [`ScriptedHost`] what to build.
    pub fn submit(&self, name: &str, script: &str) -> PathBuf {
        let path = self.paths.source_file(name);
        std::fs::write(&path, script).unwrap();
        path
    }

    pub fn registry(&self, rows: &[&str]) {
        let mut text = REGISTRY_HEADER.to_string();
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        std::fs::write(self.paths.registry(&ProjectConfig::default()), text).unwrap();
    }

    pub fn arm_crash_marker(&self, identity: &str) {
        std::fs::write(self.paths.crash_marker(), identity).unwrap();
    }

    pub fn write_qc(&self, identity: &str, text: &str) {
        std::fs::create_dir_all(self.paths.qc_dir()).unwrap();
        std::fs::write(self.paths.qc_file(identity), text).unwrap();
    }

    pub fn read_qc(&self, identity: &str) -> Option<String> {
        std::fs::read_to_string(self.paths.qc_file(identity)).ok()
    }

    pub fn open(&self, host: ScriptedHost) -> Session<ScriptedHost> {
        self.open_with(ProjectConfig::default(), host)
    }

    pub fn open_with(&self, config: ProjectConfig, host: ScriptedHost) -> Session<ScriptedHost> {
        Session::open(self.paths.clone(), config, host, QueueFilter::All).unwrap()
    }
}

/// One call to [`SceneHost::render`].
#[derive(Debug, Clone)]
pub struct RenderCall {
    pub output: PathBuf,
    pub resolution: Resolution,
    pub caption: Option<Caption>,
    /// Crash marker contents at the time of the call.
    pub marker: Option<String>,
    pub had_scene: bool,
}

/// Builds scenes from the text of the source file and records renders.
///
/// Scripts: `subject` (a 200-polygon mesh next to a denylisted floor),
/// `empty` (a camera only), `broken` (open fails).
pub struct ScriptedHost {
    pub resolution: Resolution,
    pub caption: Option<Caption>,
    pub calls: Vec<RenderCall>,
    pub marker_path: Option<PathBuf>,
    pub fail_full: bool,
    /// Cleared after the first full render.
    pub stop_after_first: Option<Arc<AtomicBool>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            resolution: Resolution::new(640, 480),
            caption: None,
            calls: Vec::new(),
            marker_path: None,
            fail_full: false,
            stop_after_first: None,
        }
    }

    pub fn watching(project: &Project) -> Self {
        Self {
            marker_path: Some(project.paths.crash_marker()),
            ..Self::new()
        }
    }
}

pub fn subject_scene(name: &str) -> Scene {
    let mut scene = Scene::new(name);
    let root = scene.root();
    let material = scene.add_material(Material::new("paint"));

    // 2 x 1 footprint, 0.5 tall, away from the origin.
    let a = Vec3::new(0.0, 0.0, 0.0);
    let b = Vec3::new(2.0, 0.0, 0.0);
    let c = Vec3::new(2.0, 1.0, 0.5);
    let d = Vec3::new(0.0, 1.0, 0.5);
    let mesh = MeshData {
        triangles: vec![[a, b, c], [a, c, d]],
        polygon_count: 200,
        ..MeshData::default()
    };
    let mut body = SceneObject::new("Body", ObjectKind::Mesh).with_mesh(mesh);
    body.material_slots.push(Some(material));
    body.transform = Transform::from_translation(Vec3::new(5.0, 5.0, 0.0));
    scene.add_object(body, root);

    let floor = MeshData {
        triangles: vec![[Vec3::new(-10.0, -10.0, 0.0), Vec3::new(10.0, -10.0, 0.0), Vec3::new(10.0, 10.0, 0.0)]],
        polygon_count: 1,
        ..MeshData::default()
    };
    scene.add_object(SceneObject::new("Floor", ObjectKind::Mesh).with_mesh(floor), root);
    scene
}

impl SceneHost for ScriptedHost {
    fn open_scene(&mut self, path: &Path) -> Result<Scene, HostError> {
        let script = std::fs::read_to_string(path)?;
        let name = path.file_stem().unwrap().to_string_lossy().to_string();
        match script.trim() {
            "broken" => Err(HostError::Output("no scene in file".into())),
            "empty" => {
                let mut scene = Scene::new(name);
                let root = scene.root();
                scene.add_object(SceneObject::new("Camera", ObjectKind::Camera), root);
                Ok(scene)
            }
            _ => Ok(subject_scene(&name)),
        }
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
        let full = output.parent().is_some_and(|p| p.ends_with("render_full"));
        self.calls.push(RenderCall {
            output: output.to_path_buf(),
            resolution: self.resolution,
            caption: self.caption.clone(),
            marker: self
                .marker_path
                .as_ref()
                .and_then(|p| std::fs::read_to_string(p).ok()),
            had_scene: view.scene.is_some(),
        });
        if full && self.fail_full {
            return Err(HostError::Output("render device lost".into()));
        }
        std::fs::create_dir_all(output.parent().unwrap())?;
        std::fs::write(output, b"png")?;
        if full {
            if let Some(flag) = self.stop_after_first.take() {
                flag.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}
