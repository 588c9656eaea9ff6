//! Provides a Wavefront OBJ scene loader.
//!
//! Each `g` group becomes one mesh object (ungrouped faces go to an object
//! named after the file). Polygons are fan-triangulated and vertices are
//! converted from Y-up to Z-up. When loaded from a file path, companion
//! `.mtl` libraries supply materials whose diffuse maps become external
//! (unpacked) images.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, Cursor};
use std::path::Path;

use glam::{Vec2, Vec3};
use obj::raw::material::{parse_mtl, MtlColor};
use obj::raw::object::{Polygon, RawObj};
use obj::raw::parse_obj;

use super::texture::load_texture_from_file;
use super::{scene_name, FormatLoader, LoadError, LoadResult};
use crate::scene::{
    Image, ImageNode, Material, MaterialId, MeshData, ObjectKind, Scene, SceneObject,
};

pub struct ObjLoader;

impl FormatLoader for ObjLoader {
    fn name(&self) -> &'static str {
        "Wavefront OBJ"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["obj"]
    }

    fn can_load(&self, data: &[u8], extension: Option<&str>) -> bool {
        if let Some(ext) = extension {
            if ext.to_lowercase() == "obj" {
                return true;
            }
        }

        if let Ok(text) = std::str::from_utf8(data) {
            let mut has_vertex = false;
            let mut has_face = false;
            for line in text.lines().take(4000) {
                let trimmed = line.trim();
                has_vertex |= trimmed.starts_with("v ");
                has_face |= trimmed.starts_with("f ");
                if has_vertex && has_face {
                    return true;
                }
            }
        }

        false
    }

    fn load_from_bytes(&self, data: &[u8]) -> LoadResult {
        let raw = parse(data)?;
        let mut scene = Scene::new(raw.name.clone().unwrap_or_else(|| "Scene".to_string()));
        build_scene(&mut scene, &raw, &MaterialLibrary::default());
        Ok(scene)
    }

    fn load_from_path(&self, path: &Path) -> LoadResult {
        let data = std::fs::read(path)?;
        let raw = parse(&data)?;

        let obj_dir = path.parent().unwrap_or(Path::new("."));
        let library = MaterialLibrary::load(&raw.material_libraries, obj_dir);

        let mut scene = Scene::new(scene_name(path));
        build_scene(&mut scene, &raw, &library);
        Ok(scene)
    }
}

fn parse(data: &[u8]) -> Result<RawObj, LoadError> {
    parse_obj(BufReader::new(Cursor::new(data)))
        .map_err(|e| LoadError::InvalidData(format!("Failed to parse OBJ: {}", e)))
}

struct MtlEntry {
    color: [f32; 3],
    diffuse_map: Option<String>,
}

/// Materials from `.mtl` files, with map paths resolved against their file.
#[derive(Default)]
struct MaterialLibrary {
    entries: HashMap<String, MtlEntry>,
    dir: Option<std::path::PathBuf>,
}

impl MaterialLibrary {
    fn load(mtl_libs: &[String], obj_dir: &Path) -> Self {
        let mut entries = HashMap::new();

        for mtl_name in mtl_libs {
            let mtl_path = obj_dir.join(mtl_name);
            let mtl_data = match std::fs::read(&mtl_path) {
                Ok(d) => d,
                Err(e) => {
                    tracing::debug!(path = %mtl_path.display(), error = %e, "Material library missing");
                    continue;
                }
            };
            let raw_mtl = match parse_mtl(BufReader::new(Cursor::new(&mtl_data[..]))) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %mtl_path.display(), error = %e, "Unreadable material library");
                    continue;
                }
            };

            for (name, mat) in &raw_mtl.materials {
                let color = mat
                    .diffuse
                    .as_ref()
                    .map(mtl_color_to_rgb)
                    .unwrap_or([0.85, 0.85, 0.85]);
                let diffuse_map = mat.diffuse_map.as_ref().map(|map| map.file.clone());
                entries.insert(name.clone(), MtlEntry { color, diffuse_map });
            }
        }

        Self {
            entries,
            dir: Some(obj_dir.to_path_buf()),
        }
    }
}

fn mtl_color_to_rgb(color: &MtlColor) -> [f32; 3] {
    match color {
        MtlColor::Rgb(r, g, b) => [*r, *g, *b],
        MtlColor::Xyz(x, y, z) => [*x, *y, *z],
        MtlColor::Spectral(_, _) => [0.85, 0.85, 0.85],
    }
}

fn polygon_pos_at(polygon: &Polygon, i: usize) -> Option<usize> {
    match polygon {
        Polygon::P(indices) => indices.get(i).copied(),
        Polygon::PT(pairs) => pairs.get(i).map(|&(p, _)| p),
        Polygon::PN(pairs) => pairs.get(i).map(|&(p, _)| p),
        Polygon::PTN(triples) => triples.get(i).map(|&(p, _, _)| p),
    }
}

fn polygon_len(polygon: &Polygon) -> usize {
    match polygon {
        Polygon::P(indices) => indices.len(),
        Polygon::PT(pairs) => pairs.len(),
        Polygon::PN(pairs) => pairs.len(),
        Polygon::PTN(triples) => triples.len(),
    }
}

fn polygon_tex_at(polygon: &Polygon, i: usize) -> Option<usize> {
    match polygon {
        Polygon::P(_) | Polygon::PN(_) => None,
        Polygon::PT(pairs) => pairs.get(i).map(|&(_, t)| t),
        Polygon::PTN(triples) => triples.get(i).map(|&(_, t, _)| t),
    }
}

/// Maps polygon indices to the name of the range set containing them.
fn ranges_to_names(
    sets: &HashMap<String, obj::raw::object::Group>,
    count: usize,
) -> Vec<Option<String>> {
    let mut names = vec![None; count];
    // Sorted so overlapping sets resolve the same way on every run.
    let sorted: BTreeMap<_, _> = sets.iter().collect();
    for (name, group) in sorted {
        for range in &group.polygons {
            for slot in names.iter_mut().take(range.end).skip(range.start) {
                if slot.is_none() {
                    *slot = Some(name.clone());
                }
            }
        }
    }
    names
}

fn build_scene(scene: &mut Scene, raw: &RawObj, library: &MaterialLibrary) {
    let positions: Vec<Vec3> = raw
        .positions
        .iter()
        // Y-up to Z-up.
        .map(|p| Vec3::new(p.0, -p.2, p.1))
        .collect();
    let tex_coords: Vec<Vec2> = raw.tex_coords.iter().map(|t| Vec2::new(t.0, t.1)).collect();

    let polygon_group = ranges_to_names(&raw.groups, raw.polygons.len());
    let polygon_material = ranges_to_names(&raw.meshes, raw.polygons.len());
    let fallback_name = scene.name.clone();

    let mut materials: HashMap<String, MaterialId> = HashMap::new();
    // Object name -> (mesh, slot material names)
    let mut objects: Vec<(String, MeshData, Vec<String>)> = Vec::new();
    let mut object_index: HashMap<String, usize> = HashMap::new();

    for (poly_idx, polygon) in raw.polygons.iter().enumerate() {
        let n = polygon_len(polygon);
        if n < 3 {
            continue;
        }

        let object_name = polygon_group[poly_idx]
            .clone()
            .unwrap_or_else(|| fallback_name.clone());
        let idx = *object_index.entry(object_name.clone()).or_insert_with(|| {
            objects.push((object_name, MeshData::default(), Vec::new()));
            objects.len() - 1
        });
        let (_, mesh, slot_names) = &mut objects[idx];

        let slot = match &polygon_material[poly_idx] {
            Some(material) => match slot_names.iter().position(|m| m == material) {
                Some(s) => s,
                None => {
                    slot_names.push(material.clone());
                    slot_names.len() - 1
                }
            },
            None => usize::MAX,
        };

        let vertex = |i: usize| {
            polygon_pos_at(polygon, i)
                .and_then(|p| positions.get(p).copied())
                .map(|pos| {
                    let uv = polygon_tex_at(polygon, i)
                        .and_then(|t| tex_coords.get(t).copied())
                        .unwrap_or(Vec2::ZERO);
                    (pos, uv)
                })
        };

        let Some((v0, uv0)) = vertex(0) else {
            continue;
        };
        mesh.polygon_count += 1;
        for i in 1..n - 1 {
            let (Some((v1, uv1)), Some((v2, uv2))) = (vertex(i), vertex(i + 1)) else {
                continue;
            };
            mesh.triangles.push([v0, v1, v2]);
            mesh.uvs.push([uv0, uv1, uv2]);
            mesh.slots.push(slot);
        }
    }

    let root = scene.root();
    for (name, mesh, slot_names) in objects {
        let material_slots = slot_names
            .iter()
            .map(|m| Some(material_id(scene, &mut materials, library, m)))
            .collect();
        let mut object = SceneObject::new(name, ObjectKind::Mesh).with_mesh(mesh);
        object.material_slots = material_slots;
        scene.add_object(object, root);
    }
}

fn material_id(
    scene: &mut Scene,
    cache: &mut HashMap<String, MaterialId>,
    library: &MaterialLibrary,
    name: &str,
) -> MaterialId {
    if let Some(&id) = cache.get(name) {
        return id;
    }
    let mut material = Material::new(name);
    if let Some(entry) = library.entries.get(name) {
        material.base_color = entry.color;
        if let Some(map) = &entry.diffuse_map {
            let pixels = library
                .dir
                .as_ref()
                .and_then(|dir| load_texture_from_file(&dir.join(map)));
            let image = scene.add_image(Image {
                name: map.clone(),
                uri: Some(map.clone()),
                packed: false,
                pixels,
            });
            material.image_nodes.push(ImageNode {
                name: "Diffuse".to_string(),
                image: Some(image),
            });
        }
    }
    let id = scene.add_material(material);
    cache.insert(name.to_string(), id);
    id
}
