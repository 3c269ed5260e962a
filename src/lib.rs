//! tidegrid - GPU projected-grid ocean surface simulator

pub mod camera;
pub mod cli;
pub mod device;
pub mod error;
pub mod grid;
pub mod noise;
pub mod params;
pub mod resources;
pub mod solver;

pub use camera::Camera;
pub use error::SimError;
pub use grid::{FrameOutcome, GridVertex, ProjectedGrid};
pub use noise::{NoiseModule, SurfaceNoise, Wave};
pub use params::{DeviceType, GridOptions, NoiseOptions};
