//! Subject selection and normalization of the resident scene.
//!
//! Community scenes arrive with arbitrary scale, placement, helper objects
//! and set dressing. [`normalize`] reduces each one to a single *subject*
//! centred at the placeholder origin and scaled to a fixed planar width, so
//! every render is framed the same way:
//!
//! 1. hidden or excluded groups are unlinked
//! 2. objects that are not meshes or empties, or whose name is denylisted, are detached
//! 3. mesh candidates are gathered; disposable parents are severed
//! 4. meshes carrying particle systems form the decoration pool
//! 5. candidates with a decoration child are preferred
//! 6. the largest unspun planar size wins
//! 7. with no subject the scene is left as-is and tagged
//! 8. the subject is centred and the placeholder scaled
//! 9. loose debris near the subject follows it
//! 10. remaining low-poly or unmaterialed meshes are banished
//! 11. broken textures are rebound to the fallback image
//!
//! Only a missing resident scene is an error; everything else degrades to a
//! QC tag in the returned [`NormalizeReport`].

pub mod materials;
pub mod select;

use std::collections::HashSet;
use std::path::Path;

use glam::Vec3;

use crate::config::{BanishMode, ProjectConfig};
use crate::error::{PipelineError, Result};
use crate::qc::tags;
use crate::scene::{ObjectId, Scene, Transform};
use crate::workspace::Workspace;

/// What normalization did to the resident scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub subject: Option<ObjectId>,
    /// Unspun planar size of the subject before scaling.
    pub planar_size: f32,
    /// Uniform scale applied to the placeholder.
    pub scale: f32,
    pub unlinked_groups: usize,
    pub detached: Vec<ObjectId>,
    pub debris: Vec<ObjectId>,
    pub banished: Vec<ObjectId>,
    pub repaired_nodes: usize,
    /// QC tags the caller should apply to the submission.
    pub tags: Vec<&'static str>,
}

/// Runs every normalization step on the workspace's resident scene.
///
/// # Errors
/// [`PipelineError::Structural`] if no scene is resident.
pub fn normalize(workspace: &mut Workspace, config: &ProjectConfig, fallback_texture: &Path) -> Result<NormalizeReport> {
    let (scene, placeholder) = workspace
        .parts_mut()
        .ok_or_else(|| PipelineError::Structural("no resident scene to normalize".to_string()))?;

    let mut report = NormalizeReport {
        scale: 1.0,
        ..NormalizeReport::default()
    };

    clear_animation(scene);

    report.unlinked_groups = select::prune_hidden_groups(scene);
    report.detached = select::prune_objects(scene, config);

    let candidates = select::gather_candidates(scene, config);
    let pool = select::decoration_pool(scene, config);
    tracing::debug!(
        candidates = candidates.len(),
        decorations = pool.len(),
        "Gathered subject candidates"
    );

    let Some((subject, size)) = select::choose_subject(scene, &candidates, &pool) else {
        tracing::warn!(scene = %scene.name, "No base mesh found");
        report.tags.push(tags::NO_BASE_MESH);
        placeholder.transform = Transform::IDENTITY;
        workspace.set_subject(None);
        return Ok(report);
    };
    report.subject = Some(subject);
    report.planar_size = size;

    let center = scene.world_bounds(subject).center();
    scene.object_mut(subject).transform.translation -= center;

    report.scale = if size < config.size_epsilon {
        1.0
    } else {
        config.target_width / size
    };
    placeholder.transform = Transform {
        scale: Vec3::splat(report.scale),
        ..Transform::IDENTITY
    };

    report.debris = move_debris(scene, subject, center, config.debris_radius * size);

    let mut protected: HashSet<ObjectId> = HashSet::new();
    protected.insert(subject);
    protected.extend(report.debris.iter().copied());
    let roots: Vec<ObjectId> = protected.iter().copied().collect();
    for id in scene.all_objects() {
        if roots.iter().any(|&r| scene.is_descendant_of(id, r)) {
            protected.insert(id);
        }
    }
    report.banished = banish_clutter(scene, &protected, &pool, config);

    let survivors = scene.renderable_objects();
    report.repaired_nodes = materials::repair_materials(
        scene,
        &survivors,
        fallback_texture,
        config.repair_unpacked_textures,
    );

    tracing::info!(
        subject = %scene.object(subject).name,
        planar_size = size,
        scale = report.scale,
        unlinked_groups = report.unlinked_groups,
        detached = report.detached.len(),
        debris = report.debris.len(),
        banished = report.banished.len(),
        repaired_nodes = report.repaired_nodes,
        "Normalized scene"
    );
    workspace.set_subject(Some(subject));
    Ok(report)
}

fn clear_animation(scene: &mut Scene) {
    for id in scene.all_objects() {
        scene.object_mut(id).animated = false;
    }
}

/// Moves unparented objects centred within `radius` of `center` by the same
/// offset as the subject.
fn move_debris(scene: &mut Scene, subject: ObjectId, center: Vec3, radius: f32) -> Vec<ObjectId> {
    let debris: Vec<ObjectId> = scene
        .all_objects()
        .into_iter()
        .filter(|&id| id != subject && scene.object(id).parent.is_none())
        .filter(|&id| scene.world_bounds(id).center().distance(center) <= radius)
        .collect();
    for &id in &debris {
        tracing::debug!(object = %scene.object(id).name, "Moving co-located debris");
        scene.object_mut(id).transform.translation -= center;
    }
    debris
}

fn banish_clutter(
    scene: &mut Scene,
    protected: &HashSet<ObjectId>,
    pool: &HashSet<ObjectId>,
    config: &ProjectConfig,
) -> Vec<ObjectId> {
    let clutter: Vec<ObjectId> = scene
        .all_objects()
        .into_iter()
        .filter(|id| !protected.contains(id))
        .filter(|&id| {
            let o = scene.object(id);
            if !o.is_mesh() {
                return false;
            }
            let low_poly = o.polygon_count() < config.min_polycount && !o.has_procedural_modifier();
            let bare = !o.has_materials() && !pool.contains(&id);
            low_poly || bare
        })
        .collect();

    for &id in &clutter {
        let object = scene.object_mut(id);
        tracing::debug!(object = %object.name, mode = ?config.banish_mode, "Banishing clutter");
        match config.banish_mode {
            BanishMode::Filter => object.banished = true,
            BanishMode::Relocate => object.transform.translation.x += config.banish_offset,
        }
    }
    clutter
}
