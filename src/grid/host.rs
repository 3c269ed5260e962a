//! Host rendition of the grid stages, used when no accelerator is set up.
//!
//! Each function mirrors the `grid.wgsl` kernel of the same name over
//! `vec4`-shaped buffers, so both paths produce the same mesh layout.

use glam::{Vec2, Vec3, Vec4};

use crate::noise::SurfaceNoise;

fn index(n: usize, x: usize, y: usize) -> usize {
    y * n + x
}

/// UV grid → base-plane x/z by homogeneous bilinear interpolation of `corners`.
pub fn geometry(positions: &mut [[f32; 4]], n: usize, corners: &[Vec4; 4]) {
    let span = (n.max(2) - 1) as f32;
    for y in 0..n {
        let v = y as f32 / span;
        let left = corners[0].lerp(corners[2], v);
        let right = corners[1].lerp(corners[3], v);
        for x in 0..n {
            let u = x as f32 / span;
            let p = left.lerp(right, u);
            let world = p.truncate() / p.w;
            let out = &mut positions[index(n, x, y)];
            out[0] = world.x;
            out[2] = world.z;
            out[3] = 1.0;
        }
    }
}

pub fn set_base_plane(positions: &mut [[f32; 4]], base_height: f32) {
    for p in positions.iter_mut() {
        p[1] = base_height;
    }
}

/// Add `noise` displacement sampled at `world + (x, z)`.
pub fn add_height(positions: &mut [[f32; 4]], noise: &dyn SurfaceNoise, world: Vec3, strength: f32) {
    for p in positions.iter_mut() {
        p[1] += noise.displacement(world.x + p[0], world.z + p[2], strength);
    }
}

/// 5-point average of interior elevations; border rows keep their heights.
pub fn smooth(positions: &mut [[f32; 4]], scratch: &mut Vec<[f32; 4]>, n: usize) {
    scratch.clear();
    scratch.extend_from_slice(positions);
    for y in 1..n.saturating_sub(1) {
        for x in 1..n - 1 {
            let sum = positions[index(n, x, y)][1]
                + positions[index(n, x - 1, y)][1]
                + positions[index(n, x + 1, y)][1]
                + positions[index(n, x, y - 1)][1]
                + positions[index(n, x, y + 1)][1];
            scratch[index(n, x, y)][1] = 0.2 * sum;
        }
    }
    positions.copy_from_slice(scratch);
}

/// Central-difference normals (one-sided at borders), facing +y.
pub fn normals(positions: &[[f32; 4]], normals: &mut [[f32; 4]], n: usize) {
    let at = |x: usize, y: usize| Vec4::from_array(positions[index(n, x, y)]).truncate();
    for y in 0..n {
        let (ym, yp) = (y.saturating_sub(1), (y + 1).min(n - 1));
        for x in 0..n {
            let (xm, xp) = (x.saturating_sub(1), (x + 1).min(n - 1));
            let dx = at(xp, y) - at(xm, y);
            let dz = at(x, yp) - at(x, ym);
            let mut normal = dz.cross(dx).try_normalize().unwrap_or(Vec3::Y);
            if normal.y < 0.0 {
                normal = -normal;
            }
            normals[index(n, x, y)] = normal.extend(0.0).to_array();
        }
    }
}

/// Lateral displacement along the flattened camera forward axis.
///
/// `backup` holds the undisplaced x/z; heights in `positions` are kept.
pub fn choppy(
    positions: &mut [[f32; 4]],
    normals: &[[f32; 4]],
    backup: &[[f32; 4]],
    camera_dir: Vec3,
    strength: f32,
    underwater: f32,
) {
    let forward = Vec2::new(camera_dir.x, camera_dir.z).normalize_or_zero();
    for ((p, n), b) in positions.iter_mut().zip(normals).zip(backup) {
        let slope = Vec2::new(n[0], n[2]).dot(forward);
        let offset = strength * underwater * slope * forward;
        p[0] = b[0] + offset.x;
        p[2] = b[2] + offset.y;
    }
}
