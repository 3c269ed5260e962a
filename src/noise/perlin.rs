//! Layered fixed-point noise.
//!
//! Three stages:
//! 1. `create`: 256 keyframes of smoothed uniform noise over a 16×16 tile
//! 2. `update`: each octave cross-fades three consecutive keyframes at its own rate
//! 3. packing: every 4 octaves are upsampled and summed into one 128×128
//!    texture, so a lookup costs one bilinear fetch per 4 octaves
//!
//! Host (`value`) and device (`perlin.wgsl`) lookups read the same packed
//! tables with the same integer arithmetic.

use bytemuck::{Pod, Zeroable};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{HeightTarget, SurfaceNoise};
use crate::device::{DeviceBroker, DeviceBuffer, DeviceIndex, DispatchSize, Kernel, KernelSpec};
use crate::error::{DispatchError, SimError};
use crate::params::noise_constants::*;
use crate::params::NoiseOptions;

/// Argument block of the `height` kernel in `perlin.wgsl`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct PerlinParams {
    /// World position of the mesh origin (w unused)
    pub world: [f32; 4],
    pub dims: [u32; 2],
    pub strength: f32,
    pub magnitude: f32,
    pub packs: u32,
    pub _padding: [u32; 3],
}

/// Layered noise with host tables and an optional device kernel
pub struct PerlinNoise {
    options: NoiseOptions,
    created: bool,
    /// Noise time (seconds scaled by `animspeed`)
    time: f64,
    /// `NOISE_FRAMES` smoothed tiles of `N_SIZE_SQ` samples
    keyframes: Vec<i32>,
    /// Current blend per octave, `MAX_OCTAVES` tiles
    octave_noise: Vec<i32>,
    /// `MAX_PACKS` packed textures of `NP_SIZE_SQ` texels
    packed: Vec<i32>,
    kernel: Option<Kernel>,
    packed_buffer: Option<DeviceBuffer>,
}

impl PerlinNoise {
    pub fn new(options: NoiseOptions) -> Self {
        let mut noise = Self {
            options: NoiseOptions::default(),
            created: false,
            time: 0.0,
            keyframes: Vec::new(),
            octave_noise: vec![0; N_SIZE_SQ * MAX_OCTAVES],
            packed: vec![0; NP_SIZE_SQ * MAX_PACKS],
            kernel: None,
            packed_buffer: None,
        };
        noise.set_options(options);
        noise
    }

    /// Octaves in use (already clamped)
    pub fn octaves(&self) -> usize {
        self.options.octaves as usize
    }

    /// Packed textures covering the octaves in use
    pub fn packs(&self) -> usize {
        NoiseOptions::pack_count(self.octaves())
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn has_device_state(&self) -> bool {
        self.kernel.is_some() || self.packed_buffer.is_some()
    }

    /// Smoothed uniform noise, `4 · (r - 0.5)` filtered by a 3×3 kernel
    /// (centre 6, neighbours 1, normalised by 14) with wrap-around.
    fn init_keyframes(seed: u64) -> Vec<i32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let raw: Vec<f32> = (0..N_SIZE_SQ * NOISE_FRAMES)
            .map(|_| 4.0 * (rng.gen::<f32>() - 0.5))
            .collect();

        let mut frames = vec![0; N_SIZE_SQ * NOISE_FRAMES];
        for frame in 0..NOISE_FRAMES {
            let f = frame * N_SIZE_SQ;
            for v in 0..N_SIZE {
                let rows = [
                    (v.wrapping_sub(1) & N_SIZE_M1) * N_SIZE,
                    v * N_SIZE,
                    ((v + 1) & N_SIZE_M1) * N_SIZE,
                ];
                for u in 0..N_SIZE {
                    let cols = [u.wrapping_sub(1) & N_SIZE_M1, u, (u + 1) & N_SIZE_M1];
                    let mut sum = 0.0;
                    for (ri, row) in rows.iter().enumerate() {
                        for (ci, col) in cols.iter().enumerate() {
                            let weight = if ri == 1 && ci == 1 { 6.0 } else { 1.0 };
                            sum += weight * raw[f + row + col];
                        }
                    }
                    frames[f + v * N_SIZE + u] = (NOISE_MAGNITUDE as f32 * sum / 14.0) as i32;
                }
            }
        }
        frames
    }

    /// Cross-fade three keyframes per octave into `octave_noise`.
    fn blend_octaves(&mut self) {
        let octaves = self.octaves();
        if octaves == 0 || self.keyframes.is_empty() {
            return;
        }

        let falloff = self.options.falloff as f64;
        let mut weights: Vec<f64> = (0..octaves).map(|i| falloff.powi(i as i32)).collect();
        let sum: f64 = weights.iter().sum();
        if sum != 0.0 {
            weights.iter_mut().for_each(|w| *w /= sum);
        }

        let third_pi = std::f64::consts::PI / 3.0;
        let mut rate = 1.0f64;
        for (o, weight) in weights.iter().enumerate() {
            let scaled = self.time * rate;
            let whole = scaled.trunc();
            let fraction = scaled - whole;
            let image = whole as i64;

            let mut amount = [0i32; 3];
            let mut frame = [0usize; 3];
            for k in 0..3 {
                let phase = (fraction + (2 - k) as f64) * third_pi;
                amount[k] = (SCALE_MAGNITUDE as f64 * weight * phase.sin().powi(2) / 1.5) as i32;
                frame[k] = ((image + k as i64) & NOISE_FRAMES_M1 as i64) as usize * N_SIZE_SQ;
            }

            let out = &mut self.octave_noise[o * N_SIZE_SQ..(o + 1) * N_SIZE_SQ];
            for (i, texel) in out.iter_mut().enumerate() {
                *texel = (0..3)
                    .map(|k| (amount[k] * self.keyframes[frame[k] + i]) >> SCALE_DECIMALBITS)
                    .sum();
            }

            rate *= self.options.timemulti as f64;
        }
    }

    /// Bilinear upsample of one octave tile by `2^power`, fixed point.
    fn map_sample(&self, u: usize, v: usize, power: u32, octave: usize) -> i32 {
        let magnitude = 1usize << power;
        let (pu, pv) = (u >> power, v >> power);
        let (fu, fv) = ((u & (magnitude - 1)) as i32, (v & (magnitude - 1)) as i32);
        let (fu_m, fv_m) = (magnitude as i32 - fu, magnitude as i32 - fv);

        let tile = &self.octave_noise[octave * N_SIZE_SQ..(octave + 1) * N_SIZE_SQ];
        let at = |pu: usize, pv: usize| tile[(pv & N_SIZE_M1) * N_SIZE + (pu & N_SIZE_M1)];

        let sum = fu_m * fv_m * at(pu, pv)
            + fu * fv_m * at(pu + 1, pv)
            + fu_m * fv * at(pu, pv + 1)
            + fu * fv * at(pu + 1, pv + 1);
        sum >> (2 * power)
    }

    /// Merge each group of 4 octaves into one `NP_SIZE²` texture.
    fn pack_octaves(&mut self) {
        for pack in 0..self.packs() {
            let o = pack * N_PACKSIZE;
            for v in 0..NP_SIZE {
                for u in 0..NP_SIZE {
                    let finest = self.octave_noise
                        [(o + 3) * N_SIZE_SQ + (v & N_SIZE_M1) * N_SIZE + (u & N_SIZE_M1)];
                    let texel = finest
                        + self.map_sample(u, v, 3, o)
                        + self.map_sample(u, v, 2, o + 1)
                        + self.map_sample(u, v, 1, o + 2);
                    self.packed[pack * NP_SIZE_SQ + v * NP_SIZE + u] = texel;
                }
            }
        }
    }

    fn recompute(&mut self) {
        self.blend_octaves();
        self.pack_octaves();
    }

    /// Packed textures currently in use
    pub fn packed_texels(&self) -> &[i32] {
        &self.packed[..self.packs() * NP_SIZE_SQ]
    }
}

/// Bilinear fixed-point fetch from one packed texture at 20.12 coordinates.
fn read_texel(texture: &[i32], u: i32, v: i32) -> i32 {
    let mask = NP_SIZE_M1 as i32;
    let row = NP_SIZE as i32;
    let iu = (u >> N_DEC_BITS) & mask;
    let iv = ((v >> N_DEC_BITS) & mask) * row;
    let iup = ((u >> N_DEC_BITS) + 1) & mask;
    let ivp = (((v >> N_DEC_BITS) + 1) & mask) * row;

    let fu = u & N_DEC_MAGN_M1;
    let fv = v & N_DEC_MAGN_M1;

    let at = |i: i32| texture[i as usize];
    let ut01 = ((N_DEC_MAGN - fu) * at(iv + iu) + fu * at(iv + iup)) >> N_DEC_BITS;
    let ut23 = ((N_DEC_MAGN - fu) * at(ivp + iu) + fu * at(ivp + iup)) >> N_DEC_BITS;
    ((N_DEC_MAGN - fv) * ut01 + fv * ut23) >> N_DEC_BITS
}

impl SurfaceNoise for PerlinNoise {
    fn name(&self) -> &'static str {
        "Perlin"
    }

    fn create(&mut self) {
        if self.created {
            return;
        }
        self.keyframes = Self::init_keyframes(self.options.seed);
        self.created = true;
        self.recompute();
        info!(
            "Layered noise created: {} octaves in {} packs",
            self.octaves(),
            self.packs()
        );
    }

    fn remove(&mut self) {
        self.release_kernels();
        self.release_buffers();
        if !self.created {
            return;
        }
        self.time = 0.0;
        self.keyframes = Vec::new();
        self.octave_noise.iter_mut().for_each(|t| *t = 0);
        self.packed.iter_mut().for_each(|t| *t = 0);
        self.created = false;
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn update(&mut self, dt: f32) {
        if !self.created {
            return;
        }
        self.time += dt as f64 * self.options.animspeed as f64;
        self.recompute();
    }

    fn value(&self, x: f32, y: f32) -> f32 {
        let magnitude = self.options.magnitude();
        let mut u = (x * magnitude) as i32;
        let mut v = (y * magnitude) as i32;

        let mut value = 0i32;
        for texture in self.packed_texels().chunks_exact(NP_SIZE_SQ) {
            value += read_texel(texture, u, v);
            u = u.wrapping_shl(N_PACKSIZE as u32);
            v = v.wrapping_shl(N_PACKSIZE as u32);
        }
        value as f32 / NOISE_MAGNITUDE as f32
    }

    fn options(&self) -> &NoiseOptions {
        &self.options
    }

    fn set_options(&mut self, options: NoiseOptions) {
        let octaves = if self.created {
            if options.clamped_octaves() != self.octaves() {
                debug!("Octave count is fixed while created, keeping {}", self.octaves());
            }
            self.options.octaves
        } else {
            options.clamped_octaves() as u32
        };
        self.options = NoiseOptions { octaves, ..options };
    }

    fn setup_device(&mut self, broker: &mut DeviceBroker) -> Result<(), SimError> {
        let spec = KernelSpec {
            program: "perlin",
            entry: "height",
            constants: vec![
                ("N_PACKSIZE", N_PACKSIZE as f64),
                ("NP_SIZE", NP_SIZE as f64),
                ("N_DEC_BITS", N_DEC_BITS as f64),
                ("N_DEC_MAGN", N_DEC_MAGN as f64),
                ("NOISE_MAGNITUDE", NOISE_MAGNITUDE as f64),
            ],
            args_size: std::mem::size_of::<PerlinParams>() as u64,
        };
        self.kernel = Some(broker.build_kernel(DeviceIndex::PRIMARY, &spec)?);
        self.packed_buffer = Some(broker.allocate(
            DeviceIndex::PRIMARY,
            "packed noise",
            (NP_SIZE_SQ * MAX_PACKS * std::mem::size_of::<i32>()) as u64,
        )?);
        Ok(())
    }

    fn release_kernels(&mut self) {
        self.kernel = None;
    }

    fn release_buffers(&mut self) {
        self.packed_buffer = None;
    }

    fn device_evaluate(
        &mut self,
        broker: &mut DeviceBroker,
        target: &HeightTarget<'_>,
    ) -> Result<(), SimError> {
        let packs = self.packs();
        if packs == 0 {
            return Ok(());
        }
        let (Some(kernel), Some(packed)) = (&self.kernel, &self.packed_buffer) else {
            return Err(DispatchError {
                stage: "perlin height",
                reason: "device state not set up".to_string(),
            }
            .into());
        };

        broker.upload(
            DeviceIndex::PRIMARY,
            packed,
            bytemuck::cast_slice(self.packed_texels()),
        )?;

        let gpu = broker.device(DeviceIndex::PRIMARY)?;
        let group = kernel.bind(gpu, &[(1, target.positions), (2, packed)])?;
        let args = PerlinParams {
            world: target.world.extend(0.0).to_array(),
            dims: target.dims,
            strength: target.strength,
            magnitude: self.options.magnitude(),
            packs: packs as u32,
            _padding: [0; 3],
        };
        kernel.enqueue(
            gpu,
            &group,
            &args,
            DispatchSize::for_grid(target.dims[0], target.dims[1]),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(options: NoiseOptions) -> PerlinNoise {
        let mut noise = PerlinNoise::new(options);
        noise.create();
        noise
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<PerlinParams>(), 48);
    }

    #[test]
    fn test_keyframes_are_seeded() {
        let a = PerlinNoise::init_keyframes(7);
        let b = PerlinNoise::init_keyframes(7);
        let c = PerlinNoise::init_keyframes(8);
        assert_eq!(a.len(), N_SIZE_SQ * NOISE_FRAMES);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Smoothing keeps samples inside the raw range of ±2
        assert!(a.iter().all(|s| s.abs() <= 2 * NOISE_MAGNITUDE));
    }

    #[test]
    fn test_octaves_clamped_and_frozen() {
        let mut options = NoiseOptions::default();
        options.octaves = 64;
        let mut noise = PerlinNoise::new(options.clone());
        assert_eq!(noise.octaves(), MAX_OCTAVES);

        noise.create();
        options.octaves = 4;
        options.scale = 0.2;
        noise.set_options(options);
        assert_eq!(noise.octaves(), MAX_OCTAVES);
        assert_eq!(noise.options().scale, 0.2);

        noise.remove();
        let mut options = noise.options().clone();
        options.octaves = 4;
        noise.set_options(options);
        assert_eq!(noise.octaves(), 4);
    }

    #[test]
    fn test_value_is_deterministic_and_bounded() {
        let noise = created(NoiseOptions::default());
        let again = created(NoiseOptions::default());
        for &(x, y) in &[(0.0, 0.0), (12.5, -40.0), (-301.0, 77.7), (1.0e4, 3.0)] {
            let v = noise.value(x, y);
            assert_eq!(v, again.value(x, y));
            assert!(v.is_finite());
            assert!(v.abs() <= 2.0 * MAX_PACKS as f32, "value {v} out of range");
        }
    }

    #[test]
    fn test_single_pack_tiles() {
        let mut options = NoiseOptions::default();
        options.octaves = 4;
        let noise = created(options);
        // One pack repeats every NP_SIZE texels of N_DEC_MAGN fixed-point units
        let period = (NP_SIZE as f32 * N_DEC_MAGN as f32) / noise.options().magnitude();
        let a = noise.value(0.0, 0.0);
        let b = noise.value(period, 0.0);
        assert!((a - b).abs() < 1e-3);
    }

    #[test]
    fn test_partial_pack_contributes() {
        let mut options = NoiseOptions::default();
        options.octaves = 2;
        let noise = created(options);
        assert_eq!(noise.packs(), 1);
        let nonzero = (0..64).any(|i| noise.value(i as f32 * 3.7, i as f32 * 1.3) != 0.0);
        assert!(nonzero);
    }

    #[test]
    fn test_zero_octaves_is_flat() {
        let mut options = NoiseOptions::default();
        options.octaves = 0;
        let mut noise = created(options);
        noise.update(0.5);
        assert_eq!(noise.packs(), 0);
        assert_eq!(noise.value(10.0, 20.0), 0.0);
    }

    #[test]
    fn test_update_animates() {
        let mut noise = created(NoiseOptions::default());
        let before = noise.value(9.0, 4.0);
        noise.update(0.37);
        assert!((noise.time() - 0.37 * 1.4).abs() < 1e-6);
        let after = noise.value(9.0, 4.0);
        assert_ne!(before, after);
    }

    #[test]
    fn test_blend_weights_sum_to_octave_share() {
        // sin²(a+2π/3) + sin²(a+π/3) + sin²(a) = 1.5 for any a
        let third_pi = std::f64::consts::PI / 3.0;
        for fraction in [0.0, 0.25, 0.5, 0.99] {
            let sum: f64 = (0..3)
                .map(|k| ((fraction + (2 - k) as f64) * third_pi).sin().powi(2))
                .sum();
            assert!((sum - 1.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_update_before_create_is_ignored() {
        let mut noise = PerlinNoise::new(NoiseOptions::default());
        noise.update(1.0);
        assert_eq!(noise.time(), 0.0);
        assert_eq!(noise.value(1.0, 1.0), 0.0);
    }

    #[test]
    fn test_remove_resets_state() {
        let mut noise = created(NoiseOptions::default());
        noise.update(1.0);
        noise.remove();
        noise.remove();
        assert!(!noise.is_created());
        assert_eq!(noise.time(), 0.0);
        assert!(!noise.has_device_state());
    }
}
