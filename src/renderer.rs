//! Software rasterizer used by [`RasterHost`](crate::host::RasterHost).
//!
//! Takes the renderable objects of a [`Scene`], flattens them to world-space
//! triangles under the placeholder transform, and rasterizes them with a
//! fixed Z-up camera rig, flat shading and a z-buffer. The rig frames the
//! origin because normalization centres the subject there at unit width.
//!
//! No GPU is required; it runs entirely on the CPU.
//!
//! # Examples
//! ```
//! use glam::Mat4;
//!
//! use community_render::renderer::{self, Camera};
//! use community_render::scene::Scene;
//!
//! let scene = Scene::new("empty");
//! let triangles = renderer::collect_triangles(&scene, Mat4::IDENTITY);
//! let pixels = renderer::rasterize(&triangles, &Camera::default(), 8, 8);
//! assert_eq!(pixels.len(), 8 * 8 * 4);
//! ```

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::scene::{ObjectId, Scene, TextureData};

/// Nesting limit when expanding group instances.
const MAX_INSTANCE_DEPTH: usize = 4;

/// A world-space triangle ready for rasterization.
pub struct Triangle {
    pub verts: [Vec3; 3],
    pub uvs: [Vec2; 3],
    pub color: [f32; 3],
    pub texture: Option<Arc<TextureData>>,
}

/// Orbit camera around a target point, Z-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    /// Degrees around Z, 0 looking along +Y from the front.
    pub azimuth_deg: f32,
    /// Degrees above the XY plane.
    pub elevation_deg: f32,
    pub fov_deg: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 2.4,
            azimuth_deg: 35.0,
            elevation_deg: 25.0,
            fov_deg: 45.0,
        }
    }
}

impl Camera {
    pub fn eye(&self) -> Vec3 {
        let azimuth = self.azimuth_deg.to_radians();
        let elevation = self.elevation_deg.to_radians();
        self.target
            + self.distance
                * Vec3::new(
                    elevation.cos() * azimuth.sin(),
                    -elevation.cos() * azimuth.cos(),
                    elevation.sin(),
                )
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(self.eye(), self.target, Vec3::Z);
        let near = self.distance * 0.01;
        let far = self.distance * 100.0;
        Mat4::perspective_rh_gl(self.fov_deg.to_radians(), aspect, near, far) * view
    }
}

/// Flattens every renderable object to world-space triangles.
pub fn collect_triangles(scene: &Scene, placeholder: Mat4) -> Vec<Triangle> {
    let mut triangles = Vec::new();
    for id in scene.renderable_objects() {
        push_object(scene, id, placeholder, &mut triangles, 0);
    }
    triangles
}

fn push_object(scene: &Scene, id: ObjectId, parent: Mat4, out: &mut Vec<Triangle>, depth: usize) {
    let object = scene.object(id);
    let world = parent * scene.world_matrix(id);

    if let Some(mesh) = &object.mesh {
        for (i, tri) in mesh.triangles.iter().enumerate() {
            let material = mesh
                .slots
                .get(i)
                .and_then(|&slot| object.material_slots.get(slot).copied().flatten())
                .map(|m| scene.material(m));
            let color = material.map_or([0.8, 0.8, 0.8], |m| m.base_color);
            let texture = material.and_then(|m| {
                m.image_nodes
                    .iter()
                    .filter_map(|node| node.image)
                    .find_map(|image| scene.image(image).pixels.clone())
            });
            out.push(Triangle {
                verts: (*tri).map(|v| world.transform_point3(v)),
                uvs: mesh.uvs.get(i).copied().unwrap_or([Vec2::ZERO; 3]),
                color,
                texture,
            });
        }
    }

    if let Some(group) = object.instance_of {
        if depth >= MAX_INSTANCE_DEPTH {
            tracing::warn!(object = %object.name, "Instance nesting too deep");
            return;
        }
        for member in scene.group_objects(group) {
            let m = scene.object(member);
            if !m.hidden && !m.banished {
                push_object(scene, member, world, out, depth + 1);
            }
        }
    }
}

/// Rasterizes triangles into a row-major RGBA buffer. Uncovered pixels are
/// transparent.
pub fn rasterize(triangles: &[Triangle], camera: &Camera, width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut color_buf = vec![[0.0_f32; 4]; w * h];
    let mut depth_buf = vec![f32::INFINITY; w * h];

    if w == 0 || h == 0 {
        return Vec::new();
    }

    let view_proj = camera.view_proj(width as f32 / height as f32);

    // ---- Lighting ----
    let light_dir = Vec3::new(0.5, -0.3, 0.8).normalize();
    let light2_dir = Vec3::new(-0.3, 0.5, 0.2).normalize();

    for tri in triangles {
        let mut clip = [Vec4::ZERO; 3];
        let mut screen = [Vec3::ZERO; 3];
        let mut visible = true;

        for i in 0..3 {
            clip[i] = view_proj * tri.verts[i].extend(1.0);
            if clip[i].w <= 0.0 {
                visible = false;
                break;
            }
            let inv_w = 1.0 / clip[i].w;
            screen[i] = Vec3::new(
                (clip[i].x * inv_w * 0.5 + 0.5) * width as f32,
                (0.5 - clip[i].y * inv_w * 0.5) * height as f32,
                clip[i].z * inv_w,
            );
        }
        if !visible {
            continue;
        }

        // Flat shading from the world-space face normal
        let normal = (tri.verts[1] - tri.verts[0])
            .cross(tri.verts[2] - tri.verts[0])
            .normalize_or_zero();
        let ndl_main = normal.dot(light_dir).abs();
        let ndl_fill = normal.dot(light2_dir).abs();
        let shade = (0.15 + ndl_main * 0.60 + ndl_fill * 0.15 + ndl_main.powf(32.0) * 0.10).min(1.0);

        let min_x = screen[0].x.min(screen[1].x).min(screen[2].x).max(0.0) as usize;
        let max_x = (screen[0].x.max(screen[1].x).max(screen[2].x).ceil().max(0.0) as usize).min(w);
        let min_y = screen[0].y.min(screen[1].y).min(screen[2].y).max(0.0) as usize;
        let max_y = (screen[0].y.max(screen[1].y).max(screen[2].y).ceil().max(0.0) as usize).min(h);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let (u_bary, v_bary, w_bary) = barycentric(screen, x as f32 + 0.5, y as f32 + 0.5);
                if u_bary < 0.0 || v_bary < 0.0 || w_bary < 0.0 {
                    continue;
                }

                let z = u_bary * screen[0].z + v_bary * screen[1].z + w_bary * screen[2].z;
                let idx = y * w + x;
                if z >= depth_buf[idx] {
                    continue;
                }

                let uv = tri.uvs[0] * u_bary + tri.uvs[1] * v_bary + tri.uvs[2] * w_bary;
                let (base, alpha) = match &tri.texture {
                    Some(tex) => {
                        let s = tex.sample(uv.x, uv.y);
                        (
                            [s[0] * tri.color[0], s[1] * tri.color[1], s[2] * tri.color[2]],
                            s[3],
                        )
                    }
                    None => (tri.color, 1.0),
                };

                // Alpha cutoff
                if alpha < 0.5 {
                    continue;
                }

                depth_buf[idx] = z;
                color_buf[idx] = [
                    (base[0] * shade).min(1.0),
                    (base[1] * shade).min(1.0),
                    (base[2] * shade).min(1.0),
                    1.0,
                ];
            }
        }
    }

    let mut pixels = vec![0u8; w * h * 4];
    for (i, c) in color_buf.iter().enumerate() {
        for k in 0..4 {
            pixels[i * 4 + k] = (c[k].clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
    pixels
}

// ===========================================================================
// Caption overlay
// ===========================================================================

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;

/// 5x7 bitmap for `c`, one row per entry, leftmost pixel in bit 4. Letters
/// are drawn upper-case; anything unknown draws as `?`.
fn glyph(c: char) -> [u8; GLYPH_HEIGHT] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0; GLYPH_HEIGHT],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

/// Draws `lines` into the bottom-left corner of an RGBA frame, last line
/// lowest. White text with a one-cell black shadow; text past the frame
/// edge is clipped. Glyph cells grow with the frame height.
pub fn draw_caption(pixels: &mut [u8], width: u32, height: u32, lines: &[&str]) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || pixels.len() < w * h * 4 {
        return;
    }
    let cell = (h / 216).max(1);
    let advance = (GLYPH_WIDTH + 1) * cell;
    let line_height = (GLYPH_HEIGHT + 2) * cell;
    let margin = 2 * cell;

    let lines: Vec<&str> = lines.iter().copied().filter(|l| !l.trim().is_empty()).collect();
    for (row, line) in lines.iter().rev().enumerate() {
        let bottom = h as isize - margin as isize - (row * line_height) as isize;
        let top = bottom - (GLYPH_HEIGHT * cell) as isize;
        for (col, c) in line.chars().enumerate() {
            let left = (margin + col * advance) as isize;
            if left >= w as isize {
                break;
            }
            let bits = glyph(c);
            for (shadow, rgb) in [(cell as isize, 0u8), (0, 255u8)] {
                blit_glyph(pixels, w, h, &bits, left + shadow, top + shadow, cell, rgb);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn blit_glyph(
    pixels: &mut [u8],
    w: usize,
    h: usize,
    bits: &[u8; GLYPH_HEIGHT],
    left: isize,
    top: isize,
    cell: usize,
    rgb: u8,
) {
    for (gy, row) in bits.iter().enumerate() {
        for gx in 0..GLYPH_WIDTH {
            if row & (1 << (GLYPH_WIDTH - 1 - gx)) == 0 {
                continue;
            }
            for dy in 0..cell {
                for dx in 0..cell {
                    let x = left + (gx * cell + dx) as isize;
                    let y = top + (gy * cell + dy) as isize;
                    if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
                        continue;
                    }
                    let idx = (y as usize * w + x as usize) * 4;
                    pixels[idx..idx + 4].copy_from_slice(&[rgb, rgb, rgb, 255]);
                }
            }
        }
    }
}

// ===========================================================================
// Rasterization helpers
// ===========================================================================

fn barycentric(tri: [Vec3; 3], px: f32, py: f32) -> (f32, f32, f32) {
    let v0x = tri[1].x - tri[0].x;
    let v0y = tri[1].y - tri[0].y;
    let v1x = tri[2].x - tri[0].x;
    let v1y = tri[2].y - tri[0].y;
    let v2x = px - tri[0].x;
    let v2y = py - tri[0].y;

    let d00 = v0x * v0x + v0y * v0y;
    let d01 = v0x * v1x + v0y * v1y;
    let d11 = v1x * v1x + v1y * v1y;
    let d20 = v2x * v0x + v2y * v0y;
    let d21 = v2x * v1x + v2y * v1y;

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-10 {
        return (-1.0, -1.0, -1.0);
    }

    let inv = 1.0 / denom;
    let v = (d11 * d20 - d01 * d21) * inv;
    let w = (d00 * d21 - d01 * d20) * inv;
    (1.0 - v - w, v, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Group, MeshData, ObjectKind, SceneObject};

    fn quad_scene() -> Scene {
        let mut scene = Scene::new("quad");
        let root = scene.root();
        let a = Vec3::new(-0.5, 0.0, -0.5);
        let b = Vec3::new(0.5, 0.0, -0.5);
        let c = Vec3::new(0.5, 0.0, 0.5);
        let d = Vec3::new(-0.5, 0.0, 0.5);
        let mesh = MeshData {
            triangles: vec![[a, b, c], [a, c, d]],
            polygon_count: 1,
            ..MeshData::default()
        };
        scene.add_object(SceneObject::new("quad", ObjectKind::Mesh).with_mesh(mesh), root);
        scene
    }

    fn coverage(pixels: &[u8]) -> usize {
        pixels.chunks_exact(4).filter(|p| p[3] > 0).count()
    }

    #[test]
    fn test_caption_draws_into_bottom_left() {
        let mut pixels = vec![0u8; 64 * 32 * 4];
        draw_caption(&mut pixels, 64, 32, &["Jane Doe", "US"]);
        assert!(coverage(&pixels) > 0);
        // Top rows stay clear; text sits along the bottom.
        assert!(pixels[..64 * 8 * 4].chunks_exact(4).all(|p| p[3] == 0));
        let white = pixels.chunks_exact(4).filter(|p| p[0] == 255 && p[3] == 255).count();
        assert!(white > 0);
    }

    #[test]
    fn test_blank_caption_draws_nothing() {
        let mut pixels = vec![0u8; 16 * 16 * 4];
        draw_caption(&mut pixels, 16, 16, &["", "  "]);
        assert_eq!(coverage(&pixels), 0);
    }

    #[test]
    fn test_glyphs_are_case_insensitive() {
        assert_eq!(glyph('a'), glyph('A'));
        assert_ne!(glyph('A'), glyph('B'));
        assert_eq!(glyph('\u{e9}'), glyph('?'));
    }

    #[test]
    fn test_empty_scene_is_transparent() {
        let pixels = rasterize(&[], &Camera::default(), 16, 8);
        assert_eq!(pixels.len(), 16 * 8 * 4);
        assert_eq!(coverage(&pixels), 0);
    }

    #[test]
    fn test_quad_at_origin_is_visible() {
        let scene = quad_scene();
        let triangles = collect_triangles(&scene, Mat4::IDENTITY);
        assert_eq!(triangles.len(), 2);
        let pixels = rasterize(&triangles, &Camera::default(), 32, 32);
        assert!(coverage(&pixels) > 32);
    }

    #[test]
    fn test_banished_objects_are_not_drawn() {
        let mut scene = quad_scene();
        let id = scene.all_objects()[0];
        scene.object_mut(id).banished = true;
        assert!(collect_triangles(&scene, Mat4::IDENTITY).is_empty());
    }

    #[test]
    fn test_instances_expand_group_members() {
        let mut scene = quad_scene();
        let root = scene.root();
        let quad = scene.all_objects()[0];
        let library = scene.add_group(Group::new("library"), root);
        scene.detach_object(quad);
        scene.group_mut(library).objects.push(quad);
        scene.unlink_group(root, library);

        let mut instancer = SceneObject::new("inst", ObjectKind::Empty);
        instancer.instance_of = Some(library);
        instancer.transform.translation = Vec3::new(0.0, 0.0, 3.0);
        scene.add_object(instancer, root);

        let triangles = collect_triangles(&scene, Mat4::IDENTITY);
        assert_eq!(triangles.len(), 2);
        assert!(triangles[0].verts.iter().all(|v| v.z >= 2.5));
    }
}
