//! Device side of the grid: the six `grid.wgsl` kernels, their buffers and bind groups.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::device::{DeviceBroker, DeviceBuffer, DeviceIndex, DispatchSize, Kernel, KernelSpec, OpenDevice};
use crate::error::{DispatchError, ResourceExhaustion, SimError};

/// Bytes per vertex in the position/normal buffers (`vec4<f32>`)
pub const VERTEX_STRIDE: u64 = 16;

/// Argument block shared by every kernel in `grid.wgsl`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct GridParams {
    /// Homogeneous corners for uv (0,0), (1,0), (0,1), (1,1)
    pub corners: [[f32; 4]; 4],
    /// Camera forward vector (w unused)
    pub camera_dir: [f32; 4],
    pub dims: [u32; 2],
    pub base_height: f32,
    pub choppy_strength: f32,
    /// +1 above the surface, -1 below
    pub underwater: f32,
    /// Smoothing pass: 0 averages into scratch, 1 copies back
    pub pass_index: u32,
    pub _padding: [f32; 2],
}

impl GridParams {
    pub fn new(n: u32, corners: &[Vec4; 4], camera_dir: Vec3) -> Self {
        Self {
            corners: corners.map(|c| c.to_array()),
            camera_dir: camera_dir.extend(0.0).to_array(),
            dims: [n, n],
            ..Default::default()
        }
    }
}

/// Entry points of `grid.wgsl`, in pipeline order
pub const GRID_ENTRY_POINTS: [&str; 6] = [
    "geometry",
    "setBasePlane",
    "copy",
    "smoothHeights",
    "normals",
    "choppyWaves",
];

pub struct GridKernels {
    pub geometry: Kernel,
    pub base_plane: Kernel,
    pub copy: Kernel,
    pub smooth: Kernel,
    pub normals: Kernel,
    pub choppy: Kernel,
}

impl GridKernels {
    pub fn build(broker: &mut DeviceBroker) -> Result<Self, SimError> {
        let mut build = |entry: &'static str| {
            broker.build_kernel(
                DeviceIndex::PRIMARY,
                &KernelSpec {
                    program: "grid",
                    entry,
                    constants: Vec::new(),
                    args_size: std::mem::size_of::<GridParams>() as u64,
                },
            )
        };
        let [geometry, base_plane, copy, smooth, normals, choppy] = GRID_ENTRY_POINTS;
        Ok(Self {
            geometry: build(geometry)?,
            base_plane: build(base_plane)?,
            copy: build(copy)?,
            smooth: build(smooth)?,
            normals: build(normals)?,
            choppy: build(choppy)?,
        })
    }
}

/// Vertex buffers, each exactly `n²` `vec4<f32>` elements
pub struct GridBuffers {
    pub n: u32,
    pub positions: DeviceBuffer,
    pub normals: DeviceBuffer,
    pub backup_positions: DeviceBuffer,
    pub backup_normals: DeviceBuffer,
    pub scratch: DeviceBuffer,
}

impl GridBuffers {
    pub fn allocate(broker: &DeviceBroker, n: u32) -> Result<Self, ResourceExhaustion> {
        let size = Self::byte_len(n);
        let alloc = |label: &str| broker.allocate(DeviceIndex::PRIMARY, label, size);
        Ok(Self {
            n,
            positions: alloc("grid positions")?,
            normals: alloc("grid normals")?,
            backup_positions: alloc("choppy backup positions")?,
            backup_normals: alloc("choppy backup normals")?,
            scratch: alloc("smoothing scratch")?,
        })
    }

    /// Size of one vertex buffer in bytes
    pub fn byte_len(n: u32) -> u64 {
        n as u64 * n as u64 * VERTEX_STRIDE
    }

    pub fn vertex_count(&self) -> usize {
        (self.n as usize).pow(2)
    }
}

/// Bind groups for every stage; `backup` and `restore` swap the copy direction.
pub struct GridBindings {
    pub geometry: wgpu::BindGroup,
    pub base_plane: wgpu::BindGroup,
    pub backup: wgpu::BindGroup,
    pub restore: wgpu::BindGroup,
    pub smooth: wgpu::BindGroup,
    pub normals: wgpu::BindGroup,
    pub choppy: wgpu::BindGroup,
}

impl GridBindings {
    pub fn new(
        gpu: &OpenDevice,
        kernels: &GridKernels,
        buffers: &GridBuffers,
    ) -> Result<Self, DispatchError> {
        let b = buffers;
        Ok(Self {
            geometry: kernels.geometry.bind(gpu, &[(1, &b.positions)])?,
            base_plane: kernels.base_plane.bind(gpu, &[(1, &b.positions)])?,
            backup: kernels.copy.bind(
                gpu,
                &[
                    (1, &b.positions),
                    (2, &b.normals),
                    (3, &b.backup_positions),
                    (4, &b.backup_normals),
                ],
            )?,
            restore: kernels.copy.bind(
                gpu,
                &[
                    (1, &b.backup_positions),
                    (2, &b.backup_normals),
                    (3, &b.positions),
                    (4, &b.normals),
                ],
            )?,
            smooth: kernels
                .smooth
                .bind(gpu, &[(1, &b.positions), (5, &b.scratch)])?,
            normals: kernels
                .normals
                .bind(gpu, &[(1, &b.positions), (2, &b.normals)])?,
            choppy: kernels.choppy.bind(
                gpu,
                &[
                    (1, &b.positions),
                    (2, &b.normals),
                    (3, &b.backup_positions),
                ],
            )?,
        })
    }
}

/// One dispatch of `kernel` over the whole grid
pub fn run(
    gpu: &OpenDevice,
    kernel: &Kernel,
    group: &wgpu::BindGroup,
    params: &GridParams,
) -> Result<(), DispatchError> {
    let size = DispatchSize::for_grid(params.dims[0], params.dims[1]);
    kernel.enqueue(gpu, group, params, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<GridParams>(), 112);
        assert_eq!(std::mem::offset_of!(GridParams, camera_dir), 64);
        assert_eq!(std::mem::offset_of!(GridParams, dims), 80);
        assert_eq!(std::mem::offset_of!(GridParams, underwater), 96);
    }

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(GridBuffers::byte_len(4), 256);
        assert_eq!(GridBuffers::byte_len(256), 256 * 256 * 16);
    }

    #[test]
    fn test_params_defaults() {
        let corners = [Vec4::ONE; 4];
        let p = GridParams::new(8, &corners, Vec3::NEG_Z);
        assert_eq!(p.dims, [8, 8]);
        assert_eq!(p.camera_dir, [0.0, 0.0, -1.0, 0.0]);
        assert_eq!(p.pass_index, 0);
    }
}
