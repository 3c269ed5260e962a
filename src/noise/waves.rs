//! Analytic deep-water waves layered on top of the noise.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use log::{debug, info};

use super::perlin::PerlinNoise;
use super::{HeightTarget, SurfaceNoise};
use crate::device::{DeviceBroker, DeviceBuffer, DeviceIndex, DispatchSize, Kernel, KernelSpec};
use crate::error::{DispatchError, SimError};
use crate::params::NoiseOptions;

/// Wavelength per squared period (meters / s²), deep-water dispersion
pub const DISPERSION: f32 = 1.5625;

/// One sinusoidal wave travelling over the x/z plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wave {
    /// Unit travel direction (x, z)
    pub direction: Vec2,
    /// Amplitude (meters)
    pub amplitude: f32,
    /// Period (seconds)
    pub period: f32,
    /// Phase offset (radians)
    pub phase: f32,
}

impl Wave {
    /// `direction` is normalised; a zero vector becomes +X.
    pub fn new(direction: Vec2, amplitude: f32, period: f32, phase: f32) -> Self {
        Self {
            direction: direction.try_normalize().unwrap_or(Vec2::X),
            amplitude,
            period,
            phase,
        }
    }

    /// Period is positive and finite; anything else has no wavelength.
    pub fn is_valid(&self) -> bool {
        self.period.is_finite() && self.period > 0.0
    }

    /// Wavelength (meters)
    pub fn wavelength(&self) -> f32 {
        DISPERSION * self.period * self.period
    }

    /// Elevation at world (x, z) and wave time `t`
    pub fn height(&self, x: f32, z: f32, t: f32) -> f32 {
        let distance = self.direction.dot(Vec2::new(x, z));
        let frequency = std::f32::consts::TAU / self.period;
        let wavenumber = std::f32::consts::TAU / self.wavelength();
        self.amplitude * (frequency * t - wavenumber * distance + self.phase).sin()
    }

    fn to_gpu(self) -> GpuWave {
        GpuWave {
            direction: self.direction.to_array(),
            amplitude: self.amplitude,
            period: self.period,
            phase: self.phase,
            _padding: 0.0,
        }
    }
}

/// Device layout of a wave (`Wave` struct in `waves.wgsl`)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuWave {
    pub direction: [f32; 2],
    pub amplitude: f32,
    pub period: f32,
    pub phase: f32,
    pub _padding: f32,
}

/// Argument block of the `height` kernel in `waves.wgsl`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WaveParams {
    pub world: [f32; 4],
    pub dims: [u32; 2],
    pub time: f32,
    pub count: u32,
}

/// Ordered, index-addressed waves with a mirrored device buffer.
///
/// Adding or removing a wave reallocates the device buffer to the exact
/// count and re-sends every wave. Field edits through [`WaveSet::get_mut`]
/// are picked up by [`WaveSet::sync`], which re-sends only on change.
#[derive(Debug, Default)]
pub struct WaveSet {
    waves: Vec<Wave>,
    /// Waves as last sent
    snapshot: Vec<GpuWave>,
    buffer: Option<DeviceBuffer>,
    sends: u64,
}

impl WaveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Wave> {
        self.waves.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Wave> {
        self.waves.get_mut(index)
    }

    /// How many times the waves were sent (device upload or snapshot refresh)
    pub fn send_count(&self) -> u64 {
        self.sends
    }

    /// Append `wave`; returns its index.
    pub fn add(&mut self, wave: Wave, device: Option<&DeviceBroker>) -> Result<usize, SimError> {
        if !wave.is_valid() {
            return Err(SimError::InvalidWave {
                index: self.waves.len(),
                period: wave.period,
            });
        }
        self.waves.push(wave);
        self.reallocate(device)?;
        self.send(device)?;
        Ok(self.waves.len() - 1)
    }

    /// Remove the wave at `index`; `Ok(false)` if there is none.
    pub fn remove(&mut self, index: usize, device: Option<&DeviceBroker>) -> Result<bool, SimError> {
        if index >= self.waves.len() {
            return Ok(false);
        }
        self.waves.remove(index);
        self.reallocate(device)?;
        self.send(device)?;
        Ok(true)
    }

    /// Drop every wave and the device buffer
    pub fn clear(&mut self) {
        self.waves.clear();
        self.snapshot.clear();
        self.buffer = None;
    }

    /// Has any wave changed since the last send?
    pub fn is_modified(&self) -> bool {
        self.snapshot.len() != self.waves.len()
            || self
                .waves
                .iter()
                .zip(&self.snapshot)
                .any(|(wave, sent)| wave.to_gpu() != *sent)
    }

    /// Re-send if modified; returns whether a send happened.
    ///
    /// An edited wave with a non-positive period is rejected before anything is sent.
    pub fn sync(&mut self, device: Option<&DeviceBroker>) -> Result<bool, SimError> {
        if !self.is_modified() {
            return Ok(false);
        }
        if let Some((index, wave)) = self.waves.iter().enumerate().find(|(_, w)| !w.is_valid()) {
            return Err(SimError::InvalidWave {
                index,
                period: wave.period,
            });
        }
        self.send(device)?;
        Ok(true)
    }

    /// Buffer sized to exactly the current count (none when empty or detached).
    fn reallocate(&mut self, device: Option<&DeviceBroker>) -> Result<(), SimError> {
        self.buffer = None;
        let Some(broker) = device else {
            return Ok(());
        };
        if self.waves.is_empty() {
            return Ok(());
        }
        let size = (self.waves.len() * std::mem::size_of::<GpuWave>()) as u64;
        self.buffer = Some(broker.allocate(DeviceIndex::PRIMARY, "waves", size)?);
        Ok(())
    }

    fn send(&mut self, device: Option<&DeviceBroker>) -> Result<(), SimError> {
        self.snapshot = self.waves.iter().map(|w| w.to_gpu()).collect();
        self.sends += 1;
        if self.snapshot.is_empty() {
            return Ok(());
        }
        if let (Some(broker), Some(buffer)) = (device, &self.buffer) {
            broker.upload(
                DeviceIndex::PRIMARY,
                buffer,
                bytemuck::cast_slice(&self.snapshot),
            )?;
        }
        Ok(())
    }

    /// Allocate and send after the device becomes available.
    fn attach(&mut self, broker: &DeviceBroker) -> Result<(), SimError> {
        self.reallocate(Some(broker))?;
        self.send(Some(broker))
    }

    /// Sum of all waves at (x, z)
    pub fn height(&self, x: f32, z: f32, t: f32) -> f32 {
        self.waves.iter().map(|w| w.height(x, z, t)).sum()
    }
}

/// Layered noise plus a [`WaveSet`]
pub struct WaveNoise {
    perlin: PerlinNoise,
    waves: WaveSet,
    /// Wave time (unscaled seconds)
    time: f32,
    kernel: Option<Kernel>,
}

impl WaveNoise {
    pub fn new(options: NoiseOptions) -> Self {
        Self {
            perlin: PerlinNoise::new(options),
            waves: WaveSet::new(),
            time: 0.0,
            kernel: None,
        }
    }

    pub fn waves(&self) -> &WaveSet {
        &self.waves
    }

    pub fn waves_mut(&mut self) -> &mut WaveSet {
        &mut self.waves
    }

    pub fn perlin(&self) -> &PerlinNoise {
        &self.perlin
    }

    pub fn time(&self) -> f32 {
        self.time
    }
}

impl SurfaceNoise for WaveNoise {
    fn name(&self) -> &'static str {
        "Waves"
    }

    fn create(&mut self) {
        self.perlin.create();
    }

    fn remove(&mut self) {
        self.release_kernels();
        self.release_buffers();
        self.waves.clear();
        self.time = 0.0;
        self.perlin.remove();
    }

    fn is_created(&self) -> bool {
        self.perlin.is_created()
    }

    fn update(&mut self, dt: f32) {
        if !self.is_created() {
            return;
        }
        self.perlin.update(dt);
        self.time += dt;
    }

    fn value(&self, x: f32, y: f32) -> f32 {
        self.perlin.value(x, y)
    }

    fn displacement(&self, x: f32, y: f32, strength: f32) -> f32 {
        strength * self.perlin.value(x, y) + self.waves.height(x, y, self.time)
    }

    fn options(&self) -> &NoiseOptions {
        self.perlin.options()
    }

    fn set_options(&mut self, options: NoiseOptions) {
        self.perlin.set_options(options);
    }

    fn setup_device(&mut self, broker: &mut DeviceBroker) -> Result<(), SimError> {
        self.perlin.setup_device(broker)?;
        let spec = KernelSpec {
            program: "waves",
            entry: "height",
            constants: Vec::new(),
            args_size: std::mem::size_of::<WaveParams>() as u64,
        };
        self.kernel = Some(broker.build_kernel(DeviceIndex::PRIMARY, &spec)?);
        self.waves.attach(broker)?;
        info!("Wave kernel ready with {} waves", self.waves.len());
        Ok(())
    }

    fn release_kernels(&mut self) {
        self.kernel = None;
        self.perlin.release_kernels();
    }

    fn release_buffers(&mut self) {
        self.waves.buffer = None;
        self.perlin.release_buffers();
    }

    fn device_evaluate(
        &mut self,
        broker: &mut DeviceBroker,
        target: &HeightTarget<'_>,
    ) -> Result<(), SimError> {
        self.perlin.device_evaluate(broker, target)?;
        if self.waves.is_empty() {
            return Ok(());
        }

        if self.waves.buffer.is_none() {
            debug!("Wave buffer missing, reallocating");
            self.waves.attach(broker)?;
        } else if self.waves.sync(Some(&*broker))? {
            debug!("Waves modified, re-sent {} waves", self.waves.len());
        }

        let (Some(kernel), Some(buffer)) = (&self.kernel, &self.waves.buffer) else {
            return Err(DispatchError {
                stage: "waves height",
                reason: "device state not set up".to_string(),
            }
            .into());
        };
        let gpu = broker.device(DeviceIndex::PRIMARY)?;
        let group = kernel.bind(gpu, &[(1, target.positions), (2, buffer)])?;
        let args = WaveParams {
            world: target.world.extend(0.0).to_array(),
            dims: target.dims,
            time: self.time,
            count: self.waves.len() as u32,
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

    fn wave(amplitude: f32) -> Wave {
        Wave::new(Vec2::new(1.0, 0.0), amplitude, 4.0, 0.0)
    }

    #[test]
    fn test_layouts() {
        assert_eq!(std::mem::size_of::<GpuWave>(), 24);
        assert_eq!(std::mem::size_of::<WaveParams>(), 32);
    }

    #[test]
    fn test_wave_dispersion() {
        let w = wave(1.0);
        assert_eq!(w.wavelength(), 25.0);
        // Zero at origin, time zero, phase zero
        assert_eq!(w.height(0.0, 0.0, 0.0), 0.0);
        // Quarter wavelength behind the origin is a crest
        assert!((w.height(-6.25, 0.0, 0.0) - 1.0).abs() < 1e-5);
        // One period later the same point repeats
        assert!((w.height(3.0, 1.0, 4.0) - w.height(3.0, 1.0, 0.0)).abs() < 1e-4);
    }

    #[test]
    fn test_direction_is_normalised() {
        let w = Wave::new(Vec2::new(3.0, 4.0), 1.0, 2.0, 0.0);
        assert!((w.direction.length() - 1.0).abs() < 1e-6);
        let fallback = Wave::new(Vec2::ZERO, 1.0, 2.0, 0.0);
        assert_eq!(fallback.direction, Vec2::X);
    }

    #[test]
    fn test_add_get_remove() {
        let mut set = WaveSet::new();
        assert_eq!(set.add(wave(1.0), None).unwrap(), 0);
        assert_eq!(set.add(wave(2.0), None).unwrap(), 1);
        assert_eq!(set.get(1).map(|w| w.amplitude), Some(2.0));

        assert!(set.remove(0, None).unwrap());
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).map(|w| w.amplitude), Some(2.0));
        assert!(set.get(1).is_none());

        assert!(!set.remove(5, None).unwrap());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_sync_skips_unchanged() {
        let mut set = WaveSet::new();
        set.add(wave(1.0), None).unwrap();
        let sends = set.send_count();

        assert!(!set.sync(None).unwrap());
        assert!(!set.sync(None).unwrap());
        assert_eq!(set.send_count(), sends);

        if let Some(w) = set.get_mut(0) {
            w.phase = 0.5;
        }
        assert!(set.sync(None).unwrap());
        assert_eq!(set.send_count(), sends + 1);
        assert!(!set.sync(None).unwrap());
    }

    #[test]
    fn test_non_positive_period_rejected() {
        let mut set = WaveSet::new();
        for period in [0.0, -2.0, f32::NAN] {
            let err = set
                .add(Wave::new(Vec2::X, 1.0, period, 0.0), None)
                .unwrap_err();
            assert!(matches!(err, SimError::InvalidWave { index: 0, .. }));
        }
        assert!(set.is_empty());

        set.add(wave(1.0), None).unwrap();
        let sends = set.send_count();
        if let Some(w) = set.get_mut(0) {
            w.period = 0.0;
        }
        assert!(matches!(
            set.sync(None),
            Err(SimError::InvalidWave { index: 0, .. })
        ));
        assert_eq!(set.send_count(), sends);
    }

    #[test]
    fn test_wave_time_is_unscaled() {
        let mut noise = WaveNoise::new(NoiseOptions::default());
        noise.update(1.0);
        assert_eq!(noise.time(), 0.0);
        noise.create();
        noise.update(0.5);
        noise.update(0.25);
        assert_eq!(noise.time(), 0.75);
    }

    #[test]
    fn test_displacement_adds_waves() {
        let mut noise = WaveNoise::new(NoiseOptions::default());
        noise.create();
        noise.waves_mut().add(wave(3.0), None).unwrap();
        noise.update(1.0);
        let (x, z) = (2.0, 7.0);
        let expected = 10.0 * noise.value(x, z) + 3.0 * wave(1.0).height(x, z, 1.0);
        assert!((noise.displacement(x, z, 10.0) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_remove_clears_waves() {
        let mut noise = WaveNoise::new(NoiseOptions::default());
        noise.create();
        noise.waves_mut().add(wave(1.0), None).unwrap();
        noise.remove();
        noise.remove();
        assert!(noise.waves().is_empty());
        assert!(!noise.is_created());
    }
}
