//! Projected grid options and the accelerator device-class filter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which class of accelerator devices the simulator may open.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// First device of any class; only that one is opened
    Default,
    /// Every device regardless of class
    #[default]
    All,
    /// Discrete, integrated or virtual GPUs
    Gpu,
    /// Software rasterizers / CPU implementations
    Cpu,
    /// Anything the backend reports as "other"
    Accelerator,
}

impl DeviceType {
    /// Does an adapter of class `kind` pass this filter?
    pub fn matches(self, kind: wgpu::DeviceType) -> bool {
        match self {
            DeviceType::Default | DeviceType::All => true,
            DeviceType::Gpu => matches!(
                kind,
                wgpu::DeviceType::DiscreteGpu
                    | wgpu::DeviceType::IntegratedGpu
                    | wgpu::DeviceType::VirtualGpu
            ),
            DeviceType::Cpu => kind == wgpu::DeviceType::Cpu,
            DeviceType::Accelerator => kind == wgpu::DeviceType::Other,
        }
    }

    /// `Default` opens only the first matching device.
    pub fn first_only(self) -> bool {
        self == DeviceType::Default
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Default => "default",
            DeviceType::All => "all",
            DeviceType::Gpu => "gpu",
            DeviceType::Cpu => "cpu",
            DeviceType::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projected grid parameters; serialized under the keys `Complexity`, `Strength`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GridOptions {
    /// Grid resolution N (vertices per side, mesh has N² vertices)
    pub complexity: u32,

    /// Maximum vertical displacement in world units (meters)
    pub strength: f32,

    /// Extra keep-away margin between the projecting camera and the plane (meters)
    pub elevation: f32,

    /// Run the 5-point smoothing pass over elevations
    pub smooth: bool,

    /// Regenerate geometry every frame even when the camera is still
    pub force_recalculate_geometry: bool,

    /// Apply lateral displacement along the camera's forward axis
    pub choppy_waves: bool,

    /// Lateral displacement scale (dimensionless multiplier on the normal slope)
    pub choppy_strength: f32,

    /// Accelerator device class filter
    pub device_type: DeviceType,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            complexity: 256,
            strength: 35.0,
            elevation: 50.0,
            smooth: false,
            force_recalculate_geometry: false,
            choppy_waves: true,
            choppy_strength: 3.75,
            device_type: DeviceType::All,
        }
    }
}

impl GridOptions {
    /// Smallest grid that still has interior vertices for normals/smoothing
    pub const MIN_COMPLEXITY: u32 = 2;

    /// Number of vertices in the mesh (N²)
    pub fn vertex_count(&self) -> usize {
        let n = self.complexity as usize;
        n * n
    }

    /// Does switching from `self` to `next` require destroying the grid buffers?
    pub fn requires_rebuild(&self, next: &GridOptions) -> bool {
        self.complexity != next.complexity
    }

    /// Does switching from `self` to `next` invalidate the surface kept between
    /// frames (the choppy backup or the smoothed heights)?
    pub fn requires_regeneration(&self, next: &GridOptions) -> bool {
        self.requires_rebuild(next)
            || self.choppy_waves != next.choppy_waves
            || self.smooth != next.smooth
    }
}
