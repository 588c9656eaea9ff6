//! Rebinding of missing or external textures to one shared fallback image.

use std::path::Path;

use crate::formats::texture::load_texture_from_file;
use crate::scene::{Image, ImageId, MaterialId, ObjectId, Scene};

/// True if the node's image is absent, or external while `repair_unpacked`.
fn needs_repair(scene: &Scene, image: Option<ImageId>, repair_unpacked: bool) -> bool {
    match image {
        None => true,
        Some(id) => repair_unpacked && !scene.image(id).packed,
    }
}

/// Rebinds every broken image node of the materials used by `objects`
/// (including group instances) to the fallback texture at `fallback`.
///
/// Only the node's image binding changes; nodes are never added or removed.
/// Returns the number of rebound nodes. A missing or undecodable fallback
/// skips the repair with a warning.
pub fn repair_materials(
    scene: &mut Scene,
    objects: &[ObjectId],
    fallback: &Path,
    repair_unpacked: bool,
) -> usize {
    let mut broken: Vec<(MaterialId, usize)> = Vec::new();
    for material in scene.materials_of(objects) {
        for (i, node) in scene.material(material).image_nodes.iter().enumerate() {
            if needs_repair(scene, node.image, repair_unpacked) {
                broken.push((material, i));
            }
        }
    }
    if broken.is_empty() {
        return 0;
    }

    let Some(pixels) = load_texture_from_file(fallback) else {
        tracing::warn!(
            path = %fallback.display(),
            nodes = broken.len(),
            "Fallback texture unavailable, leaving images unrepaired"
        );
        return 0;
    };
    let shared = scene.add_image(Image {
        name: "fallback_texture".to_string(),
        uri: Some(fallback.display().to_string()),
        packed: true,
        pixels: Some(pixels),
    });

    for &(material, node) in &broken {
        let material = scene.material_mut(material);
        tracing::debug!(material = %material.name, node = %material.image_nodes[node].name, "Rebinding image node");
        material.image_nodes[node].image = Some(shared);
    }
    broken.len()
}
