use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Mesh vertex handed to the renderer (local frame, see `ProjectedGrid::mesh_origin`)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GridVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl GridVertex {
    /// Build from the `vec4<f32>` device layout (w is dropped)
    pub fn from_device(position: [f32; 4], normal: [f32; 4]) -> Self {
        Self {
            position: [position[0], position[1], position[2]],
            normal: [normal[0], normal[1], normal[2]],
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<GridVertex>(), 24);
        let v = GridVertex::from_device([1.0, 2.0, 3.0, 1.0], [0.0, 1.0, 0.0, 0.0]);
        assert_eq!(v.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(v.normal(), Vec3::Y);
    }
}
