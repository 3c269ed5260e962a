//! Perspective camera consumed by the projected grid.

use glam::{Mat3, Mat4, Quat, Vec2, Vec3};

/// Perspective camera with a free orientation and optional frustum offset
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// World position (meters)
    pub position: Vec3,

    /// Orientation; the camera looks down its local -Z axis
    pub orientation: Quat,

    /// Vertical field of view (radians)
    pub fov_y: f32,

    /// Viewport width / height
    pub aspect: f32,

    /// Near clip distance (meters)
    pub near: f32,

    /// Far clip distance (meters)
    pub far: f32,

    /// Shift of the projection centre in normalized device coordinates
    pub frustum_offset: Vec2,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 100.0, 0.0),
            orientation: Quat::IDENTITY,
            fov_y: 45f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 1.0,
            far: 10_000.0,
            frustum_offset: Vec2::ZERO,
        }
    }
}

impl Camera {
    /// Camera at `position` looking at `target`
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let mut camera = Self {
            position,
            ..Self::default()
        };
        camera.look_at(target);
        camera
    }

    /// Unit forward vector
    pub fn direction(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    /// World → view transform
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.orientation.conjugate()) * Mat4::from_translation(-self.position)
    }

    /// View → clip transform (right-handed, depth in [0, 1])
    pub fn projection_matrix(&self) -> Mat4 {
        let proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        if self.frustum_offset == Vec2::ZERO {
            proj
        } else {
            Mat4::from_translation(self.frustum_offset.extend(0.0)) * proj
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Point the camera at `target`, keeping +Y as the yaw axis
    pub fn look_at(&mut self, target: Vec3) {
        self.set_direction(target - self.position);
    }

    /// Point the camera along `dir` without rolling.
    ///
    /// Straight up/down views fall back to +Z as the reference up axis.
    /// A zero vector leaves the orientation unchanged.
    pub fn set_direction(&mut self, dir: Vec3) {
        let Some(forward) = dir.try_normalize() else {
            return;
        };
        let up = if forward.cross(Vec3::Y).length_squared() < 1e-8 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(Vec3::ZERO, forward, up);
        let rotation = Mat3::from_mat4(view).transpose();
        self.orientation = Quat::from_mat3(&rotation).normalize();
    }

    /// Has the pose changed enough to require new geometry?
    pub fn pose_differs(&self, other: &Camera) -> bool {
        self.position != other.position
            || self.orientation != other.orientation
            || self.fov_y != other.fov_y
            || self.aspect != other.aspect
            || self.near != other.near
            || self.far != other.far
            || self.frustum_offset != other.frustum_offset
    }
}
