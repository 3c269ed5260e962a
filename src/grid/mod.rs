//! Projected-grid ocean surface: frame state machine over the grid kernels.
//!
//! Per `update`:
//! - Moved (camera pose changed, first frame, or forced): solve a new projection
//!   range, regenerate geometry, download, then run the surface stages
//! - Static: download the previous frame's result first, then run the surface
//!   stages so the accelerator computes the next frame while the host renders
//!
//! Surface stages: base plane → noise → [smooth] → normals → [choppy].
//! Any stage failure aborts the rest of the frame and keeps the last
//! downloaded mesh.

pub mod host;
mod kernels;
mod vertex;

use glam::{Vec3, Vec4};
use log::{debug, error, info, warn};

pub use kernels::{GridParams, GRID_ENTRY_POINTS, VERTEX_STRIDE};
pub use vertex::GridVertex;

use self::kernels::{run as dispatch, GridBindings, GridBuffers, GridKernels};
use crate::camera::Camera;
use crate::device::{DeviceBroker, DeviceIndex};
use crate::error::SimError;
use crate::noise::{HeightTarget, NoiseModule, SurfaceNoise, Wave};
use crate::params::{GridOptions, NoiseOptions};
use crate::resources::ResourceLocator;
use crate::solver::{Plane, ProjectedGridSolver, ProjectionRange};

/// What one `update` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// New projection range, geometry rebuilt
    Regenerated,
    /// Same geometry, surface re-animated
    Animated,
    /// No water visible yet; nothing ran
    Skipped,
}

/// Accelerator state, declared in release order.
struct DeviceState {
    bindings: GridBindings,
    kernels: GridKernels,
    buffers: GridBuffers,
    broker: DeviceBroker,
}

/// Host mirror of the device buffers (or the whole mesh in host-only mode)
#[derive(Default)]
struct HostBuffers {
    positions: Vec<[f32; 4]>,
    normals: Vec<[f32; 4]>,
    backup: Vec<[f32; 4]>,
    scratch: Vec<[f32; 4]>,
}

impl HostBuffers {
    fn resize(&mut self, count: usize) {
        for buffer in [
            &mut self.positions,
            &mut self.normals,
            &mut self.backup,
            &mut self.scratch,
        ] {
            buffer.clear();
            buffer.resize(count, [0.0; 4]);
        }
    }
}

/// GPU projected-grid ocean simulator
pub struct ProjectedGrid {
    options: GridOptions,
    noise: NoiseModule,
    water_level: f32,
    locator: ResourceLocator,
    host_only: bool,

    solver: ProjectedGridSolver,
    created: bool,
    last_camera: Option<Camera>,
    range: Option<ProjectionRange>,
    mesh_origin: Vec3,
    camera_dir: Vec3,
    underwater: bool,

    host: HostBuffers,
    vertices: Vec<GridVertex>,
    device: Option<DeviceState>,
}

impl ProjectedGrid {
    /// Simulator for a water plane at world height `water_level`. Call [`create`](Self::create) next.
    pub fn new(options: GridOptions, noise: NoiseModule, water_level: f32) -> Self {
        Self {
            options: Self::sanitized(options),
            noise,
            water_level,
            locator: ResourceLocator::default(),
            host_only: false,
            solver: ProjectedGridSolver::new(Plane::horizontal(0.0)),
            created: false,
            last_camera: None,
            range: None,
            mesh_origin: Vec3::new(0.0, water_level, 0.0),
            camera_dir: Vec3::NEG_Z,
            underwater: false,
            host: HostBuffers::default(),
            vertices: Vec::new(),
            device: None,
        }
    }

    /// Look up kernel programs with `locator` instead of the default search path
    pub fn with_locator(mut self, locator: ResourceLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Run every stage on the host; no accelerator is opened
    pub fn host_only(mut self) -> Self {
        self.host_only = true;
        self
    }

    fn sanitized(mut options: GridOptions) -> GridOptions {
        options.complexity = options.complexity.max(GridOptions::MIN_COMPLEXITY);
        options
    }

    fn n(&self) -> u32 {
        self.options.complexity
    }

    /// Build noise tables, open the accelerator and allocate every buffer.
    ///
    /// On failure everything acquired so far is released and the simulator
    /// stays not-created.
    pub fn create(&mut self) -> Result<(), SimError> {
        if self.created {
            return Ok(());
        }
        self.noise.create();

        if !self.host_only {
            match self.open_device() {
                Ok(state) => self.device = Some(state),
                Err(e) => {
                    error!("Projected grid setup failed: {e}");
                    self.remove();
                    return Err(e);
                }
            }
        }

        let count = self.options.vertex_count();
        self.host.resize(count);
        self.vertices = vec![GridVertex::default(); count];
        self.last_camera = None;
        self.range = None;
        self.created = true;
        info!(
            "Projected grid created: {n}x{n} vertices, noise {}, {}",
            self.noise.name(),
            if self.host_only { "host only" } else { "accelerated" },
            n = self.n(),
        );
        Ok(())
    }

    fn open_device(&mut self) -> Result<DeviceState, SimError> {
        let n = self.n();
        let mut broker = DeviceBroker::open(self.options.device_type, self.locator.clone())?;
        info!(
            "Accelerator platform {} with {} device(s), using device 0",
            broker.platform_name().unwrap_or("unknown"),
            broker.device_count()
        );
        match Self::build_device_state(&mut self.noise, &mut broker, n) {
            Ok((kernels, buffers, bindings)) => Ok(DeviceState {
                bindings,
                kernels,
                buffers,
                broker,
            }),
            Err(e) => {
                // Noise handles go before the broker that owns their device
                self.noise.release_kernels();
                self.noise.release_buffers();
                broker.teardown();
                Err(e)
            }
        }
    }

    fn build_device_state(
        noise: &mut NoiseModule,
        broker: &mut DeviceBroker,
        n: u32,
    ) -> Result<(GridKernels, GridBuffers, GridBindings), SimError> {
        noise.setup_device(broker)?;
        let kernels = GridKernels::build(broker)?;
        let buffers = GridBuffers::allocate(broker, n)?;
        let bindings = GridBindings::new(broker.device(DeviceIndex::PRIMARY)?, &kernels, &buffers)?;
        Ok((kernels, buffers, bindings))
    }

    /// Release kernels, buffers and the accelerator. Safe on any state, safe to repeat.
    pub fn remove(&mut self) {
        self.noise.release_kernels();
        if let Some(state) = self.device.take() {
            let DeviceState {
                bindings,
                kernels,
                buffers,
                mut broker,
            } = state;
            drop(bindings);
            drop(kernels);
            self.noise.release_buffers();
            drop(buffers);
            broker.teardown();
        }
        self.noise.remove();

        self.host = HostBuffers::default();
        self.vertices = Vec::new();
        self.last_camera = None;
        self.range = None;
        self.underwater = false;
        if self.created {
            info!("Projected grid removed");
        }
        self.created = false;
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_accelerated(&self) -> bool {
        self.device.is_some()
    }

    /// Advance the simulation by `dt` seconds as seen from `camera`.
    pub fn update(&mut self, dt: f32, camera: &Camera) -> Result<FrameOutcome, SimError> {
        if !self.created {
            return Err(SimError::NotCreated);
        }
        self.noise.update(dt);
        self.camera_dir = camera.direction();
        self.underwater =
            camera.position.y < self.get_height(camera.position.x, camera.position.z);

        let moved = self.options.force_recalculate_geometry
            || self
                .last_camera
                .as_ref()
                .map_or(true, |last| last.pose_differs(camera));

        if moved {
            self.last_camera = Some(camera.clone());
            match self.solver.solve(
                camera,
                self.water_level,
                self.options.strength,
                self.options.elevation,
            ) {
                Some(range) => {
                    self.range = Some(range);
                    self.mesh_origin =
                        Vec3::new(camera.position.x, self.water_level, camera.position.z);
                }
                None if self.range.is_some() => {
                    debug!("No projection range this frame, animating previous geometry");
                    return self.run_frame(false);
                }
                None => return Ok(FrameOutcome::Skipped),
            }
        } else if self.range.is_none() {
            return Ok(FrameOutcome::Skipped);
        }

        self.run_frame(moved)
    }

    fn run_frame(&mut self, moved: bool) -> Result<FrameOutcome, SimError> {
        let result = if self.device.is_some() {
            self.device_frame(moved)
        } else {
            self.host_frame(moved)
        };

        match result {
            Ok(()) if moved => Ok(FrameOutcome::Regenerated),
            Ok(()) => Ok(FrameOutcome::Animated),
            Err(e) => {
                warn!("Frame aborted, keeping previous mesh: {e}");
                // Regenerate from scratch next frame
                self.last_camera = None;
                Err(e)
            }
        }
    }

    fn frame_params(&self) -> GridParams {
        let corners = self
            .range
            .map(|r| r.corners(self.solver.base_plane()))
            .unwrap_or([Vec4::W; 4]);
        GridParams {
            base_height: self.solver.base_plane().height(),
            choppy_strength: self.options.choppy_strength,
            underwater: self.underwater_sign(),
            ..GridParams::new(self.n(), &corners, self.camera_dir)
        }
    }

    fn underwater_sign(&self) -> f32 {
        if self.underwater {
            -1.0
        } else {
            1.0
        }
    }

    fn device_frame(&mut self, moved: bool) -> Result<(), SimError> {
        let mut params = self.frame_params();
        let options = &self.options;
        let Some(state) = self.device.as_mut() else {
            return Err(SimError::NotCreated);
        };
        let DeviceState {
            bindings,
            kernels,
            buffers,
            broker,
        } = state;

        if moved {
            let gpu = broker.device(DeviceIndex::PRIMARY)?;
            dispatch(gpu, &kernels.geometry, &bindings.geometry, &params)?;
        }

        // Latency hiding: the mesh handed out lags the kernels by one frame
        broker.download(
            DeviceIndex::PRIMARY,
            &buffers.positions,
            bytemuck::cast_slice_mut(&mut self.host.positions),
        )?;
        broker.download(
            DeviceIndex::PRIMARY,
            &buffers.normals,
            bytemuck::cast_slice_mut(&mut self.host.normals),
        )?;
        publish(&mut self.vertices, &self.host);

        if options.choppy_waves && !moved {
            let gpu = broker.device(DeviceIndex::PRIMARY)?;
            dispatch(gpu, &kernels.copy, &bindings.restore, &params)?;
        }

        {
            let gpu = broker.device(DeviceIndex::PRIMARY)?;
            dispatch(gpu, &kernels.base_plane, &bindings.base_plane, &params)?;
        }

        let target = HeightTarget {
            positions: &buffers.positions,
            dims: params.dims,
            world: self.mesh_origin,
            strength: options.strength,
        };
        self.noise.device_evaluate(broker, &target)?;

        let gpu = broker.device(DeviceIndex::PRIMARY)?;
        if options.choppy_waves && moved {
            dispatch(gpu, &kernels.copy, &bindings.backup, &params)?;
        }
        if options.smooth {
            params.pass_index = 0;
            dispatch(gpu, &kernels.smooth, &bindings.smooth, &params)?;
            params.pass_index = 1;
            dispatch(gpu, &kernels.smooth, &bindings.smooth, &params)?;
            params.pass_index = 0;
        }
        dispatch(gpu, &kernels.normals, &bindings.normals, &params)?;
        if options.choppy_waves {
            dispatch(gpu, &kernels.choppy, &bindings.choppy, &params)?;
        }
        Ok(())
    }

    /// Same stage order as the device path, without the one-frame lag.
    fn host_frame(&mut self, moved: bool) -> Result<(), SimError> {
        if let Some(waves) = self.noise.waves_mut() {
            waves.sync(None)?;
        }
        let n = self.n() as usize;
        let params = self.frame_params();
        let corners = params.corners.map(Vec4::from_array);
        let buf = &mut self.host;

        if moved {
            host::geometry(&mut buf.positions, n, &corners);
        } else if self.options.choppy_waves {
            buf.positions.copy_from_slice(&buf.backup);
        }
        host::set_base_plane(&mut buf.positions, params.base_height);
        host::add_height(
            &mut buf.positions,
            &self.noise,
            self.mesh_origin,
            self.options.strength,
        );
        if self.options.choppy_waves && moved {
            buf.backup.copy_from_slice(&buf.positions);
        }
        if self.options.smooth {
            host::smooth(&mut buf.positions, &mut buf.scratch, n);
        }
        host::normals(&buf.positions, &mut buf.normals, n);
        if self.options.choppy_waves {
            host::choppy(
                &mut buf.positions,
                &buf.normals,
                &buf.backup,
                self.camera_dir,
                self.options.choppy_strength,
                params.underwater,
            );
        }
        publish(&mut self.vertices, &self.host);
        Ok(())
    }

    /// Host-side surface height at world (x, z); never touches the accelerator.
    pub fn get_height(&self, x: f32, z: f32) -> f32 {
        self.water_level + self.noise.displacement(x, z, self.options.strength)
    }

    /// Append a wave; `None` when the noise source has no wave set.
    pub fn add_wave(&mut self, wave: Wave) -> Result<Option<usize>, SimError> {
        let broker = self.device.as_ref().map(|d| &d.broker);
        match self.noise.waves_mut() {
            Some(waves) => waves.add(wave, broker).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_wave(&self, index: usize) -> Option<&Wave> {
        self.noise.waves().and_then(|w| w.get(index))
    }

    /// Mutable access; edits are detected and re-sent before the next evaluation
    pub fn wave_mut(&mut self, index: usize) -> Option<&mut Wave> {
        self.noise.waves_mut().and_then(|w| w.get_mut(index))
    }

    /// Remove a wave; `false` when `index` is out of range.
    pub fn remove_wave(&mut self, index: usize) -> Result<bool, SimError> {
        let broker = self.device.as_ref().map(|d| &d.broker);
        match self.noise.waves_mut() {
            Some(waves) => waves.remove(index, broker),
            None => Ok(false),
        }
    }

    pub fn wave_count(&self) -> usize {
        self.noise.waves().map_or(0, |w| w.len())
    }

    pub fn noise(&self) -> &NoiseModule {
        &self.noise
    }

    pub fn grid_options(&self) -> &GridOptions {
        &self.options
    }

    /// Apply new grid options; returns `true` when the grid buffers were rebuilt.
    ///
    /// Only a Complexity change rebuilds. Toggling `Smooth` or `ChoppyWaves`
    /// regenerates geometry on the next frame. `DeviceType` takes effect on
    /// the next `create`. On error the previous options and buffers stay in place.
    pub fn set_grid_options(&mut self, options: GridOptions) -> Result<bool, SimError> {
        let options = Self::sanitized(options);
        let rebuild = self.options.requires_rebuild(&options);
        if !rebuild || !self.created {
            if self.options.requires_regeneration(&options) {
                self.last_camera = None;
            }
            self.options = options;
            return Ok(false);
        }

        let n = options.complexity;
        if let Some(state) = self.device.as_mut() {
            let buffers = GridBuffers::allocate(&state.broker, n)?;
            let bindings = GridBindings::new(
                state.broker.device(DeviceIndex::PRIMARY)?,
                &state.kernels,
                &buffers,
            )?;
            state.bindings = bindings;
            state.buffers = buffers;
        }
        self.options = options;
        let count = self.options.vertex_count();
        self.host.resize(count);
        self.vertices = vec![GridVertex::default(); count];
        self.last_camera = None;
        info!("Projected grid rebuilt at {n}x{n}");
        Ok(true)
    }

    pub fn noise_options(&self) -> &NoiseOptions {
        self.noise.options()
    }

    /// Apply new noise options; the octave count stays fixed while created.
    pub fn set_noise_options(&mut self, options: NoiseOptions) {
        self.noise.set_options(options);
    }

    /// World position of the mesh's local origin
    pub fn mesh_origin(&self) -> Vec3 {
        self.mesh_origin
    }

    pub fn water_level(&self) -> f32 {
        self.water_level
    }

    /// Latest mesh, `Complexity²` vertices, row-major
    pub fn vertices(&self) -> &[GridVertex] {
        &self.vertices
    }

    pub fn is_underwater(&self) -> bool {
        self.underwater
    }

    /// Device bytes currently held (0 without an accelerator)
    pub fn allocated_bytes(&self) -> u64 {
        self.device
            .as_ref()
            .map_or(0, |d| d.broker.allocated_bytes())
    }

    /// Elements per device vertex buffer (0 without an accelerator)
    pub fn device_vertex_count(&self) -> usize {
        self.device.as_ref().map_or(0, |d| d.buffers.vertex_count())
    }
}

impl Drop for ProjectedGrid {
    fn drop(&mut self) {
        self.remove();
    }
}

fn publish(vertices: &mut Vec<GridVertex>, host: &HostBuffers) {
    vertices.clear();
    vertices.extend(
        host.positions
            .iter()
            .zip(&host.normals)
            .map(|(p, n)| GridVertex::from_device(*p, *n)),
    );
}
