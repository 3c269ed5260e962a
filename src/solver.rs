//! Projection window solver for the projected grid.
//!
//! Each frame the rendering camera's frustum is clipped against the slab
//! between the upper and lower displacement bounds of the water plane. The
//! clipped points are projected through an auxiliary "projecting" camera and
//! their 2D bounding box becomes the range matrix that stretches the unit
//! UV square over exactly the visible water.

use glam::{Mat4, Vec3, Vec4};
use log::debug;

use crate::camera::Camera;

/// Far clip used while solving, whatever the rendering camera says (meters)
pub const MAX_FAR_CLIP: f32 = 99_999.0;

/// Frustum corner pairs forming the 12 edges of the view volume
const CUBE_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (0, 2),
    (2, 3),
    (1, 3),
    (0, 4),
    (2, 6),
    (3, 7),
    (1, 5),
    (4, 6),
    (4, 5),
    (5, 7),
    (6, 7),
];

/// Slack when testing whether an edge hit lies within the edge
const EDGE_TOLERANCE: f32 = 1e-5;

/// Distance of the horizon-following aim point along the view ray (meters)
const AIM_LOOKAHEAD: f32 = 10.0;

/// Infinite plane `normal · p + d = 0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// Plane with unit `normal` through `point`
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    /// Horizontal plane at `height`, facing +Y
    pub fn horizontal(height: f32) -> Self {
        Self::from_point_normal(Vec3::new(0.0, height, 0.0), Vec3::Y)
    }

    /// Signed distance (positive on the normal side)
    pub fn distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }

    /// Same orientation, moved `offset` along the normal
    pub fn shifted(&self, offset: f32) -> Self {
        Self {
            normal: self.normal,
            d: self.d - offset,
        }
    }

    /// Height of the plane along its own normal (the base-plane kernel argument)
    pub fn height(&self) -> f32 {
        -self.d
    }

    /// Orthogonal projection of `p` onto the plane
    pub fn project_point(&self, p: Vec3) -> Vec3 {
        p - self.normal * self.distance(p)
    }

    /// Ray parameter of the hit, or `None` when the ray runs parallel.
    ///
    /// Negative values mean the plane lies behind the origin.
    pub fn ray_parameter(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let denom = self.normal.dot(dir);
        if denom.abs() < f32::EPSILON {
            return None;
        }
        Some(-(self.normal.dot(origin) + self.d) / denom)
    }
}

/// Result of a successful solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionRange {
    /// Unit UV square → world (homogeneous) through the projecting camera
    pub matrix: Mat4,
    /// View matrix of the projecting camera used to build `matrix`
    pub view: Mat4,
}

impl ProjectionRange {
    /// Homogeneous world positions of the four UV corners (0,0), (1,0), (0,1), (1,1).
    ///
    /// Each corner is the base-plane hit of its projector ray, divided by its
    /// depth in front of the projecting camera, so bilinear interpolation in
    /// homogeneous space stays perspective-correct.
    pub fn corners(&self, base: &Plane) -> [Vec4; 4] {
        [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
            .map(|(u, v)| self.world_corner(base, u, v))
    }

    fn world_corner(&self, base: &Plane, u: f32, v: f32) -> Vec4 {
        let origin = self.matrix * Vec4::new(u, v, 0.0, 1.0);
        let target = self.matrix * Vec4::new(u, v, 1.0, 1.0);
        let origin = origin.truncate() / origin.w;
        let target = target.truncate() / target.w;
        let dir = (target - origin).normalize_or_zero();

        let t = base.ray_parameter(origin, dir).unwrap_or(0.0);
        let world = origin + dir * t;

        let eye = self.view * world.extend(1.0);
        let mut depth = -eye.z / eye.w;
        if depth.abs() < 1e-6 {
            depth = 1e-6;
        }
        world.extend(1.0) / depth
    }
}

/// Computes projection windows; owns the two helper cameras.
#[derive(Debug, Clone)]
pub struct ProjectedGridSolver {
    base: Plane,
    tracking: Camera,
    projecting: Camera,
}

impl ProjectedGridSolver {
    /// Solver for the water plane `base`, in the mesh's local frame.
    pub fn new(base: Plane) -> Self {
        Self {
            base,
            tracking: Camera::default(),
            projecting: Camera::default(),
        }
    }

    pub fn base_plane(&self) -> &Plane {
        &self.base
    }

    /// Rendering camera re-centred above the origin (valid after `solve`)
    pub fn tracking_camera(&self) -> &Camera {
        &self.tracking
    }

    /// Camera the grid is projected from (valid after `solve`)
    pub fn projecting_camera(&self) -> &Camera {
        &self.projecting
    }

    /// Compute the range matrix for `camera`, or `None` if no water is visible.
    ///
    /// # Arguments
    /// * `camera` - Rendering camera, world space
    /// * `water_level` - World height of the base plane
    /// * `strength` - Maximum vertical displacement (bounds the slab)
    /// * `elevation` - Extra keep-away margin for the projecting camera
    pub fn solve(
        &mut self,
        camera: &Camera,
        water_level: f32,
        strength: f32,
        elevation: f32,
    ) -> Option<ProjectionRange> {
        let upper = self.base.shifted(strength);
        let lower = self.base.shifted(-strength);

        // Same frustum shape, only the height above the water kept
        self.tracking = Camera {
            position: Vec3::new(0.0, camera.position.y - water_level, 0.0),
            far: camera.far.min(MAX_FAR_CLIP),
            ..camera.clone()
        };

        let points = self.clip_frustum(&upper, &lower);
        if points.is_empty() {
            debug!("Frustum misses the displacement slab, keeping previous geometry");
            return None;
        }

        self.aim_projector(strength + elevation);

        let view_proj = self.projecting.view_projection();
        let (mut min, mut max) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
        for p in &points {
            let clip = view_proj.project_point3(self.base.project_point(*p));
            min = min.min(clip);
            max = max.max(clip);
        }

        let pack = Mat4::from_cols(
            Vec4::new(max.x - min.x, 0.0, 0.0, 0.0),
            Vec4::new(0.0, max.y - min.y, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
            Vec4::new(min.x, min.y, 0.0, 1.0),
        );
        debug!(
            "Projection window x [{:.3}, {:.3}] y [{:.3}, {:.3}] from {} points",
            min.x,
            max.x,
            min.y,
            max.y,
            points.len()
        );

        Some(ProjectionRange {
            matrix: view_proj.inverse() * pack,
            view: self.projecting.view_matrix(),
        })
    }

    /// Frustum edge crossings with both bounds plus corners inside the slab.
    fn clip_frustum(&self, upper: &Plane, lower: &Plane) -> Vec<Vec3> {
        let inv = self.tracking.view_projection().inverse();
        let mut frustum = [Vec3::ZERO; 8];
        for (i, corner) in frustum.iter_mut().enumerate() {
            let x = if i & 1 == 0 { -1.0 } else { 1.0 };
            let y = if i & 2 == 0 { -1.0 } else { 1.0 };
            let z = if i & 4 == 0 { 0.0 } else { 1.0 };
            *corner = inv.project_point3(Vec3::new(x, y, z));
        }

        let mut points = Vec::with_capacity(24);
        for (src, dst) in CUBE_EDGES {
            let edge = frustum[dst] - frustum[src];
            let len = edge.length();
            if len <= 0.0 {
                continue;
            }
            let dir = edge / len;
            for bound in [upper, lower] {
                if let Some(t) = bound.ray_parameter(frustum[src], dir) {
                    if t >= 0.0 && t < len + EDGE_TOLERANCE {
                        points.push(frustum[src] + dir * t);
                    }
                }
            }
        }

        points.extend(
            frustum
                .iter()
                .filter(|p| upper.distance(**p) / lower.distance(**p) < 0.0),
        );
        points
    }

    /// Place and orient the projecting camera.
    fn aim_projector(&mut self, min_height: f32) {
        let n = self.base.normal;
        let pos = self.tracking.position;
        let dir = self.tracking.direction();

        self.projecting = self.tracking.clone();

        // Keep away from grazing angles
        let height = self.base.distance(pos);
        if height < min_height {
            let lift = if height < 0.0 {
                min_height - 2.0 * height
            } else {
                min_height - height
            };
            self.projecting.position += n * lift;
        }

        // Where the view ray meets the plane, mirrored when looking away from it
        let direct = if n.dot(dir) < 0.0 || n.dot(pos) < 0.0 {
            let t = self.base.ray_parameter(pos, dir).unwrap_or(0.0);
            pos + dir * t.abs()
        } else {
            let flipped = (dir - 2.0 * n * dir.dot(n)).normalize_or_zero();
            let t = self.base.ray_parameter(pos, flipped).unwrap_or(0.0);
            pos + flipped * t
        };

        // Forward point flattened onto the plane, follows the horizon
        let horizon = self.base.project_point(pos + dir * AIM_LOOKAHEAD);

        let af = n.dot(dir).abs();
        let aim = direct * af + horizon * (1.0 - af);
        self.projecting.set_direction(aim - self.projecting.position);
    }
}
