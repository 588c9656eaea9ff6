//! In-memory scene graph handed out by a [`SceneHost`](crate::host::SceneHost).
//!
//! A [`Scene`] is a flat arena of objects, groups (collections), materials and
//! images addressed by typed indices. Membership is expressed through groups:
//! an object is part of the scene while some linked group reachable from the
//! root lists it. Detaching an object or unlinking a group never frees
//! anything, so ids stay valid for the lifetime of the scene.
//!
//! # Examples
//! ```
//! use community_render::scene::{ObjectKind, Scene, SceneObject};
//!
//! let mut scene = Scene::new("sample");
//! let root = scene.root();
//! let cube = scene.add_object(SceneObject::new("Cube", ObjectKind::Mesh), root);
//! assert_eq!(scene.all_objects(), vec![cube]);
//!
//! scene.detach_object(cube);
//! assert!(scene.all_objects().is_empty());
//! ```

pub mod math;

use std::collections::HashSet;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};

pub use math::{Aabb, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Locator without geometry.
    Empty,
    Mesh,
    Camera,
    Light,
    Curve,
    Text,
    Other,
}

/// Modifier kinds that generate geometry at evaluation time.
const PROCEDURAL_MODIFIERS: &[&str] = &["nodes", "geometry_nodes", "array", "screw"];

/// Represents loaded texture data for sampling.
///
/// # Examples
/// ```
/// use community_render::scene::TextureData;
///
/// let tex = TextureData {
///     width: 1,
///     height: 1,
///     data: vec![255, 255, 255, 255],
/// };
/// assert_eq!(tex.sample(0.5, 0.5), [1.0, 1.0, 1.0, 1.0]);
/// ```
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// RGBA pixels, row-major.
    pub data: Vec<u8>,
}

impl TextureData {
    /// Samples the texture at UV coordinates, wrapping outside [0, 1).
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let u = u.fract();
        let v = v.fract();
        let u = if u < 0.0 { u + 1.0 } else { u };
        let v = if v < 0.0 { v + 1.0 } else { v };

        let x = ((u * self.width as f32) as u32).min(self.width.saturating_sub(1));
        let y = ((v * self.height as f32) as u32).min(self.height.saturating_sub(1));
        let idx = ((y * self.width + x) * 4) as usize;

        if idx + 3 < self.data.len() {
            [
                self.data[idx] as f32 / 255.0,
                self.data[idx + 1] as f32 / 255.0,
                self.data[idx + 2] as f32 / 255.0,
                self.data[idx + 3] as f32 / 255.0,
            ]
        } else {
            [1.0, 1.0, 1.0, 1.0]
        }
    }
}

/// Triangulated geometry in object space.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub triangles: Vec<[Vec3; 3]>,
    /// One UV triple per triangle; may be shorter than `triangles`.
    pub uvs: Vec<[Vec2; 3]>,
    /// Material slot index per triangle; may be shorter than `triangles`.
    pub slots: Vec<usize>,
    /// Face count as authored (quads count once).
    pub polygon_count: usize,
}

impl MeshData {
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.triangles.iter().flatten().copied())
    }
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub transform: Transform,
    pub parent: Option<ObjectId>,
    pub mesh: Option<MeshData>,
    /// Object-space bounds, cached from the mesh.
    pub bounds: Option<Aabb>,
    pub material_slots: Vec<Option<MaterialId>>,
    /// Modifier kinds, e.g. `"nodes"`, `"subsurf"`.
    pub modifiers: Vec<String>,
    pub particle_systems: usize,
    /// Hidden in the source file.
    pub hidden: bool,
    pub animated: bool,
    /// Group instanced by this object, if it is a collection instance.
    pub instance_of: Option<GroupId>,
    /// Excluded from rendering by the normalizer.
    pub banished: bool,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transform: Transform::IDENTITY,
            parent: None,
            mesh: None,
            bounds: None,
            material_slots: Vec::new(),
            modifiers: Vec::new(),
            particle_systems: 0,
            hidden: false,
            animated: false,
            instance_of: None,
            banished: false,
        }
    }

    /// Attaches geometry and caches its bounds.
    pub fn with_mesh(mut self, mesh: MeshData) -> Self {
        self.bounds = mesh.bounds();
        self.mesh = Some(mesh);
        self
    }

    pub fn polygon_count(&self) -> usize {
        self.mesh.as_ref().map_or(0, |m| m.polygon_count)
    }

    pub fn is_mesh(&self) -> bool {
        self.kind == ObjectKind::Mesh
    }

    pub fn has_procedural_modifier(&self) -> bool {
        self.modifiers.iter().any(|m| {
            PROCEDURAL_MODIFIERS
                .iter()
                .any(|p| m.eq_ignore_ascii_case(p))
        })
    }

    pub fn has_materials(&self) -> bool {
        self.material_slots.iter().any(Option::is_some)
    }
}

/// A collection of objects and nested groups.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub name: String,
    pub exclude: bool,
    pub hide_viewport: bool,
    pub hide_render: bool,
    pub children: Vec<GroupId>,
    pub objects: Vec<ObjectId>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Excluded or hidden in the source file.
    pub fn is_hidden(&self) -> bool {
        self.exclude || self.hide_viewport || self.hide_render
    }
}

/// An image-texture node inside a material.
#[derive(Debug, Clone, Default)]
pub struct ImageNode {
    pub name: String,
    pub image: Option<ImageId>,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 3],
    pub image_nodes: Vec<ImageNode>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: [0.8, 0.8, 0.8],
            image_nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Image {
    pub name: String,
    pub uri: Option<String>,
    /// Embedded in the source file rather than referenced externally.
    pub packed: bool,
    pub pixels: Option<Arc<TextureData>>,
}

#[derive(Debug, Clone)]
pub struct Scene {
    pub name: String,
    root: GroupId,
    objects: Vec<SceneObject>,
    groups: Vec<Group>,
    materials: Vec<Material>,
    images: Vec<Image>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: GroupId(0),
            groups: vec![Group::new(name.clone())],
            name,
            objects: Vec::new(),
            materials: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn root(&self) -> GroupId {
        self.root
    }

    pub fn add_object(&mut self, object: SceneObject, group: GroupId) -> ObjectId {
        let id = ObjectId(self.objects.len());
        self.objects.push(object);
        if let Some(g) = self.groups.get_mut(group.0) {
            g.objects.push(id);
        }
        id
    }

    pub fn add_group(&mut self, group: Group, parent: GroupId) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(group);
        if let Some(p) = self.groups.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn add_image(&mut self, image: Image) -> ImageId {
        self.images.push(image);
        ImageId(self.images.len() - 1)
    }

    pub fn object(&self, id: ObjectId) -> &SceneObject {
        &self.objects[id.0]
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut SceneObject {
        &mut self.objects[id.0]
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.0]
    }

    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn material_mut(&mut self, id: MaterialId) -> &mut Material {
        &mut self.materials[id.0]
    }

    pub fn image(&self, id: ImageId) -> &Image {
        &self.images[id.0]
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Finds the first object with this exact name, linked or not.
    pub fn find_object(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .iter()
            .position(|o| o.name == name)
            .map(ObjectId)
    }

    /// Objects reachable from the root through linked groups, in discovery order.
    pub fn all_objects(&self) -> Vec<ObjectId> {
        self.group_objects(self.root)
    }

    /// Objects in `group` and its descendants, deduplicated.
    pub fn group_objects(&self, group: GroupId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut seen_objects = HashSet::new();
        let mut seen_groups = HashSet::new();
        let mut stack = vec![group];
        while let Some(gid) = stack.pop() {
            if !seen_groups.insert(gid) {
                continue;
            }
            let g = &self.groups[gid.0];
            for &oid in &g.objects {
                if seen_objects.insert(oid) {
                    out.push(oid);
                }
            }
            stack.extend(g.children.iter().rev().copied());
        }
        out
    }

    /// Removes `child` from `parent`'s children. Returns false if it was not there.
    pub fn unlink_group(&mut self, parent: GroupId, child: GroupId) -> bool {
        let children = &mut self.groups[parent.0].children;
        let before = children.len();
        children.retain(|&c| c != child);
        children.len() != before
    }

    /// Unlinks the object from every group that lists it.
    pub fn detach_object(&mut self, id: ObjectId) {
        for group in &mut self.groups {
            group.objects.retain(|&o| o != id);
        }
    }

    /// Direct children of `id` among the linked objects.
    pub fn children_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.all_objects()
            .into_iter()
            .filter(|&c| self.objects[c.0].parent == Some(id))
            .collect()
    }

    /// True if `id` has `ancestor` somewhere up its parent chain.
    pub fn is_descendant_of(&self, id: ObjectId, ancestor: ObjectId) -> bool {
        let mut current = self.objects[id.0].parent;
        let mut steps = 0;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.objects.len() {
                return false;
            }
            current = self.objects[p.0].parent;
        }
        false
    }

    /// World matrix of `id`, following the parent chain.
    ///
    /// Parent cycles in malformed input stop after one pass over all objects.
    pub fn world_matrix(&self, id: ObjectId) -> Mat4 {
        let mut matrix = self.objects[id.0].transform.matrix();
        let mut current = self.objects[id.0].parent;
        let mut steps = 0;
        while let Some(p) = current {
            steps += 1;
            if steps > self.objects.len() {
                tracing::warn!(object = %self.objects[id.0].name, "Parent cycle detected");
                break;
            }
            matrix = self.objects[p.0].transform.matrix() * matrix;
            current = self.objects[p.0].parent;
        }
        matrix
    }

    /// World-space bounds; objects without geometry report their origin.
    pub fn world_bounds(&self, id: ObjectId) -> Aabb {
        let world = self.world_matrix(id);
        match self.objects[id.0].bounds {
            Some(local) => local.transformed(&world),
            None => Aabb::point(world.transform_point3(Vec3::ZERO)),
        }
    }

    /// Drops the parent link while keeping the object where it is in the world.
    pub fn clear_parent_keep_transform(&mut self, id: ObjectId) {
        if self.objects[id.0].parent.is_none() {
            return;
        }
        let world = self.world_matrix(id);
        let object = &mut self.objects[id.0];
        object.parent = None;
        object.transform = Transform::from_matrix(world);
    }

    /// Materials used by `objects`, plus those of objects reached through
    /// group instancing, deduplicated in discovery order.
    pub fn materials_of(&self, objects: &[ObjectId]) -> Vec<MaterialId> {
        let mut queue: Vec<ObjectId> = objects.to_vec();
        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut materials = Vec::new();
        let mut i = 0;
        while i < queue.len() {
            let id = queue[i];
            i += 1;
            if !visited.insert(id) {
                continue;
            }
            let object = &self.objects[id.0];
            if let Some(group) = object.instance_of {
                queue.extend(self.group_objects(group));
            }
            for slot in object.material_slots.iter().flatten() {
                if !materials.contains(slot) {
                    materials.push(*slot);
                }
            }
        }
        materials
    }

    /// Objects that should appear in a render: linked, visible, not banished.
    pub fn renderable_objects(&self) -> Vec<ObjectId> {
        self.all_objects()
            .into_iter()
            .filter(|&id| {
                let o = &self.objects[id.0];
                !o.hidden && !o.banished
            })
            .collect()
    }
}
