//! Provides a glTF/GLB scene loader.
//!
//! Supports binary GLB and JSON glTF with embedded (data URI, buffer view)
//! or external resources. Nodes become scene objects; authoring metadata
//! exported by the submission template travels in `extras`:
//!
//! * node extras: `hidden`, `kind`, `modifiers`, `particle_systems`,
//!   `collection`, `instance_collection`, `polygon_count`
//! * scene extras: `collections`, a list of
//!   `{name, parent, exclude, hide_viewport, hide_render}`
//!
//! # Examples
//! ```
//! use community_render::formats::{self, FormatLoader};
//!
//! let loader = formats::gltf::GltfLoader;
//! assert!(loader.can_load(b"glTF", None));
//! ```

use std::collections::HashMap;
use std::path::Path;

use glam::{Mat4, Quat, Vec2, Vec3};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::texture::{decode_data_uri, decode_image_bytes, load_texture_from_file};
use super::{scene_name, y_up_to_z_up, FormatLoader, LoadError, LoadResult};
use crate::scene::{
    Group, GroupId, Image, ImageId, ImageNode, Material, MaterialId, MeshData, ObjectId,
    ObjectKind, Scene, SceneObject, Transform,
};

pub struct GltfLoader;

impl FormatLoader for GltfLoader {
    fn name(&self) -> &'static str {
        "glTF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gltf", "glb"]
    }

    fn can_load(&self, data: &[u8], extension: Option<&str>) -> bool {
        if let Some(ext) = extension {
            let ext_lower = ext.to_lowercase();
            if ext_lower == "gltf" || ext_lower == "glb" {
                return true;
            }
        }

        if data.len() >= 4 && &data[0..4] == b"glTF" {
            return true;
        }

        if data.len() > 10 {
            let start = String::from_utf8_lossy(&data[..data.len().min(1000)]);
            if start.contains("\"asset\"")
                && (start.contains("\"scene\"") || start.contains("\"scenes\""))
            {
                return true;
            }
        }

        false
    }

    fn load_from_bytes(&self, data: &[u8]) -> LoadResult {
        load(data, None, "Scene".to_string())
    }

    fn load_from_path(&self, path: &Path) -> LoadResult {
        let data = std::fs::read(path)?;
        load(&data, path.parent(), scene_name(path))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeExtras {
    hidden: bool,
    kind: Option<String>,
    modifiers: Vec<String>,
    particle_systems: usize,
    collection: Option<String>,
    instance_collection: Option<String>,
    polygon_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SceneExtras {
    collections: Vec<CollectionExtras>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CollectionExtras {
    name: String,
    parent: Option<String>,
    exclude: bool,
    hide_viewport: bool,
    hide_render: bool,
}

fn parse_extras<T: Default + DeserializeOwned>(raw: Option<&str>, owner: &str) -> T {
    let Some(raw) = raw else {
        return T::default();
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(owner, error = %e, "Ignoring malformed glTF extras");
            T::default()
        }
    }
}

fn parse_kind(kind: &str) -> ObjectKind {
    match kind.to_ascii_lowercase().as_str() {
        "empty" => ObjectKind::Empty,
        "mesh" => ObjectKind::Mesh,
        "camera" => ObjectKind::Camera,
        "light" => ObjectKind::Light,
        "curve" => ObjectKind::Curve,
        "text" | "font" => ObjectKind::Text,
        _ => ObjectKind::Other,
    }
}

fn load(data: &[u8], base_dir: Option<&Path>, name: String) -> LoadResult {
    let gltf_data = gltf::Gltf::from_slice(data)
        .map_err(|e| LoadError::InvalidData(format!("Failed to parse glTF: {}", e)))?;
    let document = &gltf_data.document;

    let buffers: Vec<Vec<u8>> = document
        .buffers()
        .map(|buffer| match buffer.source() {
            gltf::buffer::Source::Bin => gltf_data.blob.clone().unwrap_or_default(),
            gltf::buffer::Source::Uri(uri) => decode_data_uri(uri)
                .or_else(|| base_dir.and_then(|dir| std::fs::read(dir.join(uri)).ok()))
                .unwrap_or_default(),
        })
        .collect();

    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or(LoadError::NoScene)?;
    let scene_count = document.scenes().count();
    if scene_count > 1 {
        tracing::debug!(scenes = scene_count, "Using first scene only");
    }

    let mut builder = Builder {
        scene: Scene::new(name),
        buffers: &buffers,
        collections: HashMap::new(),
        node_ids: HashMap::new(),
        instances: Vec::new(),
    };
    builder.add_images(document, base_dir);
    builder.add_materials(document);

    let extras: SceneExtras = parse_extras(
        gltf_scene.extras().as_ref().map(|raw| raw.get()),
        gltf_scene.name().unwrap_or("scene"),
    );
    builder.add_collections(&extras.collections);

    let y_up = y_up_to_z_up();
    for node in gltf_scene.nodes() {
        builder.add_node(&node, None, y_up);
    }

    for animation in document.animations() {
        for channel in animation.channels() {
            if let Some(&id) = builder.node_ids.get(&channel.target().node().index()) {
                builder.scene.object_mut(id).animated = true;
            }
        }
    }

    builder.resolve_instances();
    Ok(builder.scene)
}

struct Builder<'a> {
    scene: Scene,
    buffers: &'a [Vec<u8>],
    collections: HashMap<String, GroupId>,
    node_ids: HashMap<usize, ObjectId>,
    instances: Vec<(ObjectId, String)>,
}

impl Builder<'_> {
    /// Adds every document image so `ImageId(i)` matches glTF image `i`.
    fn add_images(&mut self, document: &gltf::Document, base_dir: Option<&Path>) {
        for image in document.images() {
            let name = image
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("image_{}", image.index()));
            let entry = match image.source() {
                gltf::image::Source::View { view, .. } => {
                    let pixels = self.buffers.get(view.buffer().index()).and_then(|buf| {
                        let start = view.offset();
                        let end = start + view.length();
                        buf.get(start..end).and_then(decode_image_bytes)
                    });
                    Image {
                        name,
                        uri: None,
                        packed: true,
                        pixels,
                    }
                }
                gltf::image::Source::Uri { uri, .. } => match decode_data_uri(uri) {
                    Some(bytes) => Image {
                        name,
                        uri: None,
                        packed: true,
                        pixels: decode_image_bytes(&bytes),
                    },
                    None => Image {
                        name,
                        uri: Some(uri.to_string()),
                        packed: false,
                        pixels: base_dir.and_then(|dir| load_texture_from_file(&dir.join(uri))),
                    },
                },
            };
            self.scene.add_image(entry);
        }
    }

    /// Adds every document material so `MaterialId(i)` matches glTF material `i`.
    fn add_materials(&mut self, document: &gltf::Document) {
        for material in document.materials() {
            let name = material
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("material_{}", material.index().unwrap_or(0)));
            let pbr = material.pbr_metallic_roughness();
            let factor = pbr.base_color_factor();
            let mut entry = Material::new(name);
            entry.base_color = [factor[0], factor[1], factor[2]];

            let mut bind = |label: &str, texture: Option<gltf::Texture>| {
                if let Some(texture) = texture {
                    entry.image_nodes.push(ImageNode {
                        name: label.to_string(),
                        image: Some(ImageId(texture.source().index())),
                    });
                }
            };
            bind("Base Color", pbr.base_color_texture().map(|i| i.texture()));
            bind(
                "Metallic Roughness",
                pbr.metallic_roughness_texture().map(|i| i.texture()),
            );
            bind("Normal", material.normal_texture().map(|i| i.texture()));
            bind("Occlusion", material.occlusion_texture().map(|i| i.texture()));
            bind("Emission", material.emissive_texture().map(|i| i.texture()));

            self.scene.add_material(entry);
        }
    }

    fn add_collections(&mut self, collections: &[CollectionExtras]) {
        for c in collections {
            let parent = c
                .parent
                .as_ref()
                .and_then(|p| self.collections.get(p).copied())
                .unwrap_or_else(|| self.scene.root());
            let mut group = Group::new(c.name.clone());
            group.exclude = c.exclude;
            group.hide_viewport = c.hide_viewport;
            group.hide_render = c.hide_render;
            let id = self.scene.add_group(group, parent);
            self.collections.insert(c.name.clone(), id);
        }
    }

    fn collection(&mut self, name: Option<&str>) -> GroupId {
        let Some(name) = name else {
            return self.scene.root();
        };
        if let Some(&id) = self.collections.get(name) {
            return id;
        }
        let root = self.scene.root();
        let id = self.scene.add_group(Group::new(name), root);
        self.collections.insert(name.to_string(), id);
        id
    }

    fn add_node(&mut self, node: &gltf::Node, parent: Option<ObjectId>, basis: Mat4) {
        let node_name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index()));
        let extras: NodeExtras = parse_extras(node.extras().as_ref().map(|raw| raw.get()), &node_name);

        let (t, r, s) = node.transform().decomposed();
        let local = Mat4::from_scale_rotation_translation(
            Vec3::from(s),
            Quat::from_array(r),
            Vec3::from(t),
        );

        let kind = match extras.kind.as_deref() {
            Some(kind) => parse_kind(kind),
            None if node.mesh().is_some() => ObjectKind::Mesh,
            None if node.camera().is_some() => ObjectKind::Camera,
            None => ObjectKind::Empty,
        };

        let mut object = SceneObject::new(node_name, kind);
        object.transform = Transform::from_matrix(basis * local);
        object.parent = parent;
        object.hidden = extras.hidden;
        object.modifiers = extras.modifiers;
        object.particle_systems = extras.particle_systems;

        if let Some(mesh) = node.mesh() {
            let (data, slots) = self.read_mesh(&mesh);
            object.material_slots = slots;
            let mut data = data;
            data.polygon_count = extras.polygon_count.unwrap_or(data.triangles.len());
            object = object.with_mesh(data);
        }

        let group = self.collection(extras.collection.as_deref());
        let id = self.scene.add_object(object, group);
        self.node_ids.insert(node.index(), id);
        if let Some(instance) = extras.instance_collection {
            self.instances.push((id, instance));
        }

        for child in node.children() {
            self.add_node(&child, Some(id), Mat4::IDENTITY);
        }
    }

    fn read_mesh(&self, mesh: &gltf::Mesh) -> (MeshData, Vec<Option<MaterialId>>) {
        let mut data = MeshData::default();
        let mut slots = Vec::new();

        for primitive in mesh.primitives() {
            let slot = slots.len();
            slots.push(primitive.material().index().map(MaterialId));
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                continue;
            }

            let reader = primitive.reader(|buffer| {
                self.buffers
                    .get(buffer.index())
                    .filter(|b| !b.is_empty())
                    .map(Vec::as_slice)
            });
            let positions: Vec<Vec3> = match reader.read_positions() {
                Some(iter) => iter.map(Vec3::from).collect(),
                None => continue,
            };
            let uvs: Vec<Vec2> = reader
                .read_tex_coords(0)
                .map(|iter| iter.into_f32().map(Vec2::from).collect())
                .unwrap_or_default();
            let indices: Vec<u32> = match reader.read_indices() {
                Some(iter) => iter.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };

            for tri in indices.chunks_exact(3) {
                let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
                if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
                    continue;
                }
                let uv = |i: usize| uvs.get(i).copied().unwrap_or(Vec2::ZERO);
                data.triangles
                    .push([positions[i0], positions[i1], positions[i2]]);
                data.uvs.push([uv(i0), uv(i1), uv(i2)]);
                data.slots.push(slot);
            }
        }

        (data, slots)
    }

    fn resolve_instances(&mut self) {
        for (id, name) in std::mem::take(&mut self.instances) {
            match self.collections.get(&name) {
                Some(&group) => self.scene.object_mut(id).instance_of = Some(group),
                None => tracing::warn!(collection = %name, "Instanced collection not found"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;

    use super::*;

    fn triangle_gltf() -> String {
        let mut bytes = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  "scene": 0,
  "scenes": [{{
    "nodes": [0, 1],
    "extras": {{"collections": [{{"name": "Props", "hide_render": true}}]}}
  }}],
  "nodes": [
    {{"name": "Tri", "mesh": 0, "translation": [0, 1, 0],
      "extras": {{"modifiers": ["nodes"], "particle_systems": 2}}}},
    {{"name": "Lamp", "extras": {{"kind": "light", "collection": "Props", "hidden": true}}}}
  ],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}}}]}}],
  "buffers": [{{"byteLength": 36, "uri": "data:application/octet-stream;base64,{encoded}"}}],
  "bufferViews": [{{"buffer": 0, "byteLength": 36}}],
  "accessors": [{{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0]}}]
}}"#
        )
    }

    #[test]
    fn test_extras_map_onto_scene() {
        let scene = GltfLoader
            .load_from_bytes(triangle_gltf().as_bytes())
            .unwrap();
        let tri = scene.find_object("Tri").unwrap();
        let lamp = scene.find_object("Lamp").unwrap();

        let object = scene.object(tri);
        assert_eq!(object.kind, ObjectKind::Mesh);
        assert!(object.has_procedural_modifier());
        assert_eq!(object.particle_systems, 2);
        assert_eq!(object.polygon_count(), 1);
        assert_eq!(object.material_slots, vec![None]);

        assert_eq!(scene.object(lamp).kind, ObjectKind::Light);
        assert!(scene.object(lamp).hidden);
        let props = scene.group(scene.root()).children[0];
        assert!(scene.group(props).hide_render);
        assert_eq!(scene.group(props).objects, vec![lamp]);
    }

    #[test]
    fn test_root_nodes_converted_to_z_up() {
        let scene = GltfLoader
            .load_from_bytes(triangle_gltf().as_bytes())
            .unwrap();
        let tri = scene.find_object("Tri").unwrap();
        let center = scene.world_bounds(tri).center();
        assert!((center - Vec3::new(0.5, 0.0, 1.5)).length() < 1e-4, "{center:?}");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            GltfLoader.load_from_bytes(b"{not json"),
            Err(LoadError::InvalidData(_))
        ));
    }
}
