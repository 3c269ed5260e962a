//! Height-field noise: layered fixed-point noise plus analytic waves.
//!
//! Every noise source has two evaluation paths:
//! - host: synchronous point queries (`value`, `displacement`) that never touch the device
//! - device: `device_evaluate` adds the source's contribution to the grid's
//!   vertex buffer in one kernel dispatch

mod perlin;
mod waves;

use glam::Vec3;

pub use perlin::{PerlinNoise, PerlinParams};
pub use waves::{GpuWave, Wave, WaveNoise, WaveParams, WaveSet};

use crate::device::{DeviceBroker, DeviceBuffer};
use crate::error::SimError;
use crate::params::NoiseOptions;

/// Vertex buffer a noise source writes into
pub struct HeightTarget<'a> {
    /// `vec4<f32>` positions, local to `world`
    pub positions: &'a DeviceBuffer,
    /// Grid extent (Complexity × Complexity)
    pub dims: [u32; 2],
    /// World position of the mesh's local origin
    pub world: Vec3,
    /// Maximum vertical displacement of the layered noise (meters)
    pub strength: f32,
}

/// Capabilities shared by every noise source.
pub trait SurfaceNoise {
    fn name(&self) -> &'static str;

    /// Build host tables. Idempotent.
    fn create(&mut self);

    /// Release everything, host and device. Safe on any state, safe to repeat.
    fn remove(&mut self);

    fn is_created(&self) -> bool;

    /// Advance animation by `dt` seconds and refresh host tables
    fn update(&mut self, dt: f32);

    /// Layered noise at world (x, y) in normalised units
    fn value(&self, x: f32, y: f32) -> f32;

    /// Vertical displacement at world (x, y) in meters
    fn displacement(&self, x: f32, y: f32, strength: f32) -> f32 {
        strength * self.value(x, y)
    }

    fn options(&self) -> &NoiseOptions;

    /// Replace options; the octave count is kept once created
    fn set_options(&mut self, options: NoiseOptions);

    /// Build kernels and device buffers on the broker's primary device
    fn setup_device(&mut self, broker: &mut DeviceBroker) -> Result<(), SimError>;

    fn release_kernels(&mut self);

    fn release_buffers(&mut self);

    /// Add this source's displacement to `target`
    fn device_evaluate(
        &mut self,
        broker: &mut DeviceBroker,
        target: &HeightTarget<'_>,
    ) -> Result<(), SimError>;
}

/// Closed set of noise sources the simulator can drive
pub enum NoiseModule {
    Perlin(PerlinNoise),
    Waves(WaveNoise),
}

impl NoiseModule {
    /// Default source: layered noise with an (initially empty) wave set
    pub fn with_waves(options: NoiseOptions) -> Self {
        NoiseModule::Waves(WaveNoise::new(options))
    }

    pub fn perlin_only(options: NoiseOptions) -> Self {
        NoiseModule::Perlin(PerlinNoise::new(options))
    }

    /// Wave set, if this source has one
    pub fn waves(&self) -> Option<&WaveSet> {
        match self {
            NoiseModule::Perlin(_) => None,
            NoiseModule::Waves(w) => Some(w.waves()),
        }
    }

    pub fn waves_mut(&mut self) -> Option<&mut WaveSet> {
        match self {
            NoiseModule::Perlin(_) => None,
            NoiseModule::Waves(w) => Some(w.waves_mut()),
        }
    }

    fn inner(&self) -> &dyn SurfaceNoise {
        match self {
            NoiseModule::Perlin(p) => p,
            NoiseModule::Waves(w) => w,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SurfaceNoise {
        match self {
            NoiseModule::Perlin(p) => p,
            NoiseModule::Waves(w) => w,
        }
    }
}

impl SurfaceNoise for NoiseModule {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn create(&mut self) {
        self.inner_mut().create()
    }

    fn remove(&mut self) {
        self.inner_mut().remove()
    }

    fn is_created(&self) -> bool {
        self.inner().is_created()
    }

    fn update(&mut self, dt: f32) {
        self.inner_mut().update(dt)
    }

    fn value(&self, x: f32, y: f32) -> f32 {
        self.inner().value(x, y)
    }

    fn displacement(&self, x: f32, y: f32, strength: f32) -> f32 {
        self.inner().displacement(x, y, strength)
    }

    fn options(&self) -> &NoiseOptions {
        self.inner().options()
    }

    fn set_options(&mut self, options: NoiseOptions) {
        self.inner_mut().set_options(options)
    }

    fn setup_device(&mut self, broker: &mut DeviceBroker) -> Result<(), SimError> {
        self.inner_mut().setup_device(broker)
    }

    fn release_kernels(&mut self) {
        self.inner_mut().release_kernels()
    }

    fn release_buffers(&mut self) {
        self.inner_mut().release_buffers()
    }

    fn device_evaluate(
        &mut self,
        broker: &mut DeviceBroker,
        target: &HeightTarget<'_>,
    ) -> Result<(), SimError> {
        self.inner_mut().device_evaluate(broker, target)
    }
}
