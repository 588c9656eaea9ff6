//! Pruning and subject selection heuristics.

use std::collections::HashSet;

use crate::config::ProjectConfig;
use crate::scene::{GroupId, ObjectId, ObjectKind, Scene};

/// Unlinks every hidden or excluded group, at any depth. Returns how many
/// groups were unlinked.
pub fn prune_hidden_groups(scene: &mut Scene) -> usize {
    let mut unlinked = 0;
    let mut stack: Vec<GroupId> = vec![scene.root()];
    let mut visited = HashSet::new();
    while let Some(gid) = stack.pop() {
        if !visited.insert(gid) {
            continue;
        }
        for child in scene.group(gid).children.clone() {
            if scene.group(child).is_hidden() {
                tracing::debug!(group = %scene.group(child).name, "Unlinking hidden group");
                scene.unlink_group(gid, child);
                unlinked += 1;
            } else {
                stack.push(child);
            }
        }
    }
    unlinked
}

/// Detaches objects that are neither empties nor meshes, and objects whose
/// name hits the denylist. Returns the detached objects.
pub fn prune_objects(scene: &mut Scene, config: &ProjectConfig) -> Vec<ObjectId> {
    let doomed: Vec<ObjectId> = scene
        .all_objects()
        .into_iter()
        .filter(|&id| {
            let o = scene.object(id);
            !matches!(o.kind, ObjectKind::Empty | ObjectKind::Mesh) || config.is_denylisted(&o.name)
        })
        .collect();
    for &id in &doomed {
        tracing::debug!(object = %scene.object(id).name, kind = ?scene.object(id).kind, "Detaching object");
        scene.detach_object(id);
    }
    doomed
}

/// A parent that does not count as part of the subject's own hierarchy.
fn is_disposable_parent(scene: &Scene, parent: ObjectId, config: &ProjectConfig) -> bool {
    let p = scene.object(parent);
    p.hidden
        || p.kind == ObjectKind::Empty
        || p.polygon_count() <= config.trivial_polycount
        || config.is_denylisted(&p.name)
}

/// Visible mesh objects big enough (or procedural) to be the subject.
///
/// Candidates parented to a disposable parent are unparented in place,
/// keeping their world transform; candidates under a real mesh parent are
/// left out.
pub fn gather_candidates(scene: &mut Scene, config: &ProjectConfig) -> Vec<ObjectId> {
    let mut candidates = Vec::new();
    for id in scene.all_objects() {
        let o = scene.object(id);
        if !o.is_mesh() || o.hidden {
            continue;
        }
        if o.polygon_count() < config.min_polycount && !o.has_procedural_modifier() {
            continue;
        }
        let parent = o.parent;
        match parent {
            None => candidates.push(id),
            Some(parent) if is_disposable_parent(scene, parent, config) => {
                tracing::debug!(
                    object = %scene.object(id).name,
                    parent = %scene.object(parent).name,
                    "Severing candidate from disposable parent"
                );
                scene.clear_parent_keep_transform(id);
                candidates.push(id);
            }
            Some(_) => {}
        }
    }
    candidates
}

/// Meshes carrying particle systems: fine detail, never the subject.
pub fn decoration_pool(scene: &Scene, config: &ProjectConfig) -> HashSet<ObjectId> {
    scene
        .all_objects()
        .into_iter()
        .filter(|&id| {
            let o = scene.object(id);
            o.is_mesh() && o.particle_systems > 0 && o.polygon_count() >= config.min_polycount
        })
        .collect()
}

/// World planar size with the object's own Z spin removed.
pub fn planar_size_unspun(scene: &mut Scene, id: ObjectId) -> f32 {
    let spin = scene.object(id).transform.rotation.z;
    scene.object_mut(id).transform.rotation.z = 0.0;
    let size = scene.world_bounds(id).planar_size();
    scene.object_mut(id).transform.rotation.z = spin;
    size
}

/// Picks the subject among the candidates: those with a decoration child if
/// any, otherwise all non-decoration candidates; the largest unspun planar
/// size wins and ties keep the earlier candidate.
pub fn choose_subject(
    scene: &mut Scene,
    candidates: &[ObjectId],
    pool: &HashSet<ObjectId>,
) -> Option<(ObjectId, f32)> {
    let base: Vec<ObjectId> = candidates
        .iter()
        .copied()
        .filter(|id| !pool.contains(id))
        .collect();
    let decorated: Vec<ObjectId> = base
        .iter()
        .copied()
        .filter(|&id| scene.children_of(id).iter().any(|c| pool.contains(c)))
        .collect();
    let shortlist = if decorated.is_empty() { base } else { decorated };

    let mut best: Option<(ObjectId, f32)> = None;
    for id in shortlist {
        let size = planar_size_unspun(scene, id);
        if best.map_or(true, |(_, s)| size > s) {
            best = Some((id, size));
        }
    }
    best
}
