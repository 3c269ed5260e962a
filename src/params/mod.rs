//! Simulator options with units and documented semantics.
//!
//! All tunables live here:
//! - Grid options (resolution, displacement bounds, post-processing switches)
//! - Noise options (octave layering and animation rates)
//! - The RON options file holding both

mod config;
mod grid;
mod noise;

// Re-export all types
pub use config::{ConfigError, SimConfig};
pub use grid::{DeviceType, GridOptions};
pub use noise::{noise_constants, NoiseOptions};
