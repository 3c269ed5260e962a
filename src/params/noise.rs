//! Layered noise options and the fixed-point constants shared with `perlin.wgsl`.

use serde::{Deserialize, Serialize};

/// Fixed-point layout of the layered noise.
///
/// The packed-texture constants are also baked into the device kernel as
/// pipeline overrides, so host and device lookups agree bit for bit.
pub mod noise_constants {
    /// Keyframe tile is `N_SIZE × N_SIZE`
    pub const N_BITS: u32 = 5;
    pub const N_SIZE: usize = 1 << (N_BITS - 1);
    pub const N_SIZE_M1: usize = N_SIZE - 1;
    pub const N_SIZE_SQ: usize = N_SIZE * N_SIZE;

    /// Octaves merged into one packed texture
    pub const N_PACKSIZE: usize = 4;

    /// Packed texture is `NP_SIZE × NP_SIZE`
    pub const NP_BITS: u32 = N_BITS + N_PACKSIZE as u32 - 1;
    pub const NP_SIZE: usize = 1 << (NP_BITS - 1);
    pub const NP_SIZE_M1: usize = NP_SIZE - 1;
    pub const NP_SIZE_SQ: usize = NP_SIZE * NP_SIZE;

    /// Fractional bits of texture coordinates
    pub const N_DEC_BITS: u32 = 12;
    pub const N_DEC_MAGN: i32 = 1 << N_DEC_BITS;
    pub const N_DEC_MAGN_M1: i32 = N_DEC_MAGN - 1;

    /// Hard cap on octaves
    pub const MAX_OCTAVES: usize = 32;

    /// Number of precomputed keyframes
    pub const NOISE_FRAMES: usize = 256;
    pub const NOISE_FRAMES_M1: usize = NOISE_FRAMES - 1;

    /// Fixed-point scale of noise samples
    pub const NOISE_DECIMALBITS: u32 = 15;
    pub const NOISE_MAGNITUDE: i32 = 1 << (NOISE_DECIMALBITS - 1);

    /// Fixed-point scale of blend weights
    pub const SCALE_DECIMALBITS: u32 = 15;
    pub const SCALE_MAGNITUDE: i32 = 1 << (SCALE_DECIMALBITS - 1);

    /// World units → texture coordinates, multiplied by the `Scale` option
    pub const BASE_MAGNITUDE: f32 = N_DEC_MAGN as f32;

    /// Packed textures the device buffer always has room for
    pub const MAX_PACKS: usize = MAX_OCTAVES / N_PACKSIZE;
}

/// Layered noise parameters; serialized under the keys `Octaves`, `Scale`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NoiseOptions {
    /// Number of octaves (clamped to 32, frozen once created)
    pub octaves: u32,

    /// Spatial frequency (texture cycles per world unit, before fixed-point scaling)
    pub scale: f32,

    /// Per-octave amplitude decay (octave o weighs falloff^o before normalisation)
    pub falloff: f32,

    /// Animation speed multiplier (noise seconds per simulated second)
    pub animspeed: f32,

    /// Per-octave time-rate multiplier (octave o runs timemulti^o faster)
    pub timemulti: f32,

    /// Keyframe RNG seed
    pub seed: u64,
}

impl Default for NoiseOptions {
    fn default() -> Self {
        Self {
            octaves: 8,
            scale: 0.085,
            falloff: 0.49,
            animspeed: 1.4,
            timemulti: 1.27,
            seed: 42,
        }
    }
}

impl NoiseOptions {
    /// Octaves clamped to the supported range
    pub fn clamped_octaves(&self) -> usize {
        (self.octaves as usize).min(noise_constants::MAX_OCTAVES)
    }

    /// Packed textures needed for `octaves` (a partial group still gets a pack)
    pub fn pack_count(octaves: usize) -> usize {
        octaves.div_ceil(noise_constants::N_PACKSIZE)
    }

    /// World → fixed-point texture coordinate factor
    pub fn magnitude(&self) -> f32 {
        noise_constants::BASE_MAGNITUDE * self.scale
    }
}
