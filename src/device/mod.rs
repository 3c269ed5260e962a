//! Accelerator broker: platform/device discovery, programs, kernels and buffer transfers.
//!
//! Vocabulary:
//! - platform: a `wgpu::Instance` restricted to one backend
//! - devices: the adapters of that backend passing the [`DeviceType`] filter,
//!   each opened as a logical `wgpu::Device` with its own in-order `wgpu::Queue`
//! - program: a compiled WGSL module, cached per source path
//! - kernel: one compute entry point plus its argument block ([`Kernel`])
//!
//! Every handle is owned; dropping the broker (or calling
//! [`DeviceBroker::teardown`]) releases programs, queues, devices and the
//! platform in that order. Kernels and buffers are owned by their users and
//! must be dropped first.

mod buffer;
mod dispatch;
mod kernel;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

pub use buffer::DeviceBuffer;
pub use dispatch::{round_up, DispatchSize, WORKGROUP_EDGE};
pub use kernel::{declares_entry_point, Kernel, KernelSpec};

use crate::error::{ContextFailure, ResourceExhaustion, SetupError, SimError, TransferError};
use crate::params::DeviceType;
use crate::resources::ResourceLocator;

/// Backends probed for a matching platform, in order
const PLATFORM_ORDER: [(wgpu::Backends, &str); 4] = [
    (wgpu::Backends::VULKAN, "Vulkan"),
    (wgpu::Backends::METAL, "Metal"),
    (wgpu::Backends::DX12, "DX12"),
    (wgpu::Backends::GL, "GL"),
];

/// Which opened device an operation targets. Only device 0 runs work today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceIndex(pub usize);

impl DeviceIndex {
    pub const PRIMARY: DeviceIndex = DeviceIndex(0);
}

/// A backend instance that exposes at least one matching device.
pub struct Platform {
    pub name: &'static str,
    backends: wgpu::Backends,
    instance: wgpu::Instance,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").field("name", &self.name).finish()
    }
}

/// One opened adapter with its logical device and queue.
pub struct OpenDevice {
    pub queue: wgpu::Queue,
    pub device: wgpu::Device,
    pub info: wgpu::AdapterInfo,
    /// Reused readback buffer, grown on demand
    staging: Option<wgpu::Buffer>,
    _adapter: wgpu::Adapter,
}

/// Owner of every accelerator handle the simulator uses.
///
/// Fields are declared in release order.
pub struct DeviceBroker {
    programs: HashMap<PathBuf, wgpu::ShaderModule>,
    devices: Vec<OpenDevice>,
    locator: ResourceLocator,
    allocated: Arc<AtomicU64>,
    platform: Option<Platform>,
}

/// Run `f` inside validation + out-of-memory error scopes.
pub(crate) fn capture_errors<T>(
    device: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    (value, validation.or(out_of_memory))
}

/// Does this adapter run compute shaders at all?
fn supports_compute(adapter: &wgpu::Adapter) -> bool {
    adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
}

fn matching_adapters(
    instance: &wgpu::Instance,
    backends: wgpu::Backends,
    filter: DeviceType,
) -> Vec<wgpu::Adapter> {
    instance
        .enumerate_adapters(backends)
        .into_iter()
        .filter(|a| filter.matches(a.get_info().device_type) && supports_compute(a))
        .collect()
}

/// Return the first platform exposing a device that passes `filter`.
pub fn select_platform(filter: DeviceType) -> Result<Platform, SetupError> {
    for (backends, name) in PLATFORM_ORDER {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let found = matching_adapters(&instance, backends, filter).len();
        debug!("Platform {name}: {found} device(s) of type {filter}");
        if found > 0 {
            info!("Selected platform {name}");
            return Ok(Platform {
                name,
                backends,
                instance,
            });
        }
    }
    Err(SetupError::NoPlatform { filter })
}

fn classify_context_failure(detail: &str) -> ContextFailure {
    if detail.to_lowercase().contains("memory") {
        ContextFailure::HostOutOfMemory
    } else {
        ContextFailure::Unavailable
    }
}

/// Open every matching device of `platform` (only the first for `DeviceType::Default`).
pub fn select_devices(
    platform: &Platform,
    filter: DeviceType,
) -> Result<Vec<OpenDevice>, SetupError> {
    let mut adapters = matching_adapters(&platform.instance, platform.backends, filter);
    if adapters.is_empty() {
        return Err(SetupError::NoDevice {
            backend: platform.name.to_string(),
            filter,
        });
    }
    if filter.first_only() {
        adapters.truncate(1);
    }

    let mut devices = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        let info = adapter.get_info();
        let request = adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tidegrid device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        );
        let (device, queue) = pollster::block_on(request).map_err(|e| {
            let detail = e.to_string();
            SetupError::Context {
                adapter: info.name.clone(),
                failure: classify_context_failure(&detail),
                detail,
            }
        })?;

        // Errors outside an explicit scope are logged instead of panicking
        device.on_uncaptured_error(Box::new(|e| error!("Uncaptured device error: {e}")));

        info!(
            "Opened device {} ({:?}, {:?})",
            info.name, info.device_type, info.backend
        );
        devices.push(OpenDevice {
            queue,
            device,
            info,
            staging: None,
            _adapter: adapter,
        });
    }
    Ok(devices)
}

impl DeviceBroker {
    /// Select a platform and open its devices.
    pub fn open(filter: DeviceType, locator: ResourceLocator) -> Result<Self, SetupError> {
        let platform = select_platform(filter)?;
        let devices = select_devices(&platform, filter)?;
        Ok(Self {
            programs: HashMap::new(),
            devices,
            locator,
            allocated: Arc::new(AtomicU64::new(0)),
            platform: Some(platform),
        })
    }

    pub fn platform_name(&self) -> Option<&'static str> {
        self.platform.as_ref().map(|p| p.name)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_open(&self) -> bool {
        self.platform.is_some() && !self.devices.is_empty()
    }

    /// Bytes held by live [`DeviceBuffer`]s (argument blocks included)
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn device(&self, index: DeviceIndex) -> Result<&OpenDevice, SetupError> {
        self.devices.get(index.0).ok_or(SetupError::NoSuchDevice {
            index: index.0,
            available: self.devices.len(),
        })
    }

    /// Allocate a read/write storage buffer of at least `size` bytes.
    pub fn allocate(
        &self,
        index: DeviceIndex,
        label: &str,
        size: u64,
    ) -> Result<DeviceBuffer, ResourceExhaustion> {
        self.allocate_with(index, label, size, buffer::storage_usage())
    }

    fn allocate_with(
        &self,
        index: DeviceIndex,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<DeviceBuffer, ResourceExhaustion> {
        let exhausted = |reason: String| ResourceExhaustion {
            label: label.to_string(),
            requested: size,
            reason,
        };
        let gpu = self.device(index).map_err(|e| exhausted(e.to_string()))?;
        let size_bytes = buffer::aligned_size(size);
        if size_bytes == 0 {
            return Err(exhausted("zero-sized buffer".to_string()));
        }
        let limit = gpu.device.limits().max_buffer_size;
        if size_bytes > limit {
            return Err(exhausted(format!("exceeds device limit of {limit} bytes")));
        }

        let (raw, err) = capture_errors(&gpu.device, || {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size_bytes,
                usage,
                mapped_at_creation: false,
            })
        });
        if let Some(e) = err {
            raw.destroy();
            return Err(exhausted(e.to_string()));
        }
        debug!("Allocated {size_bytes} bytes for {label}");
        Ok(DeviceBuffer::new(raw, label, Arc::clone(&self.allocated)))
    }

    /// Blocking host → device copy of `data` to the start of `dest`.
    pub fn upload(
        &self,
        index: DeviceIndex,
        dest: &DeviceBuffer,
        data: &[u8],
    ) -> Result<(), TransferError> {
        let gpu = self.device(index).map_err(|_| TransferError::InvalidBuffer {
            label: dest.label().to_string(),
        })?;
        let len = data.len() as u64;
        if !buffer::valid_region(len, dest.size()) {
            return Err(TransferError::InvalidRegion {
                label: dest.label().to_string(),
                len,
                capacity: dest.size(),
            });
        }

        let (index_after, err) = capture_errors(&gpu.device, || {
            gpu.queue.write_buffer(dest.raw(), 0, data);
            gpu.queue.submit(std::iter::empty())
        });
        if let Some(e) = err {
            return Err(transfer_failure(dest.label(), e));
        }
        gpu.device.poll(wgpu::Maintain::wait_for(index_after));
        Ok(())
    }

    /// Blocking device → host copy of the first `out.len()` bytes of `src`.
    pub fn download(
        &mut self,
        index: DeviceIndex,
        src: &DeviceBuffer,
        out: &mut [u8],
    ) -> Result<(), TransferError> {
        let label = src.label().to_string();
        let len = out.len() as u64;
        if !buffer::valid_region(len, src.size()) {
            return Err(TransferError::InvalidRegion {
                label,
                len,
                capacity: src.size(),
            });
        }
        let gpu = self
            .devices
            .get_mut(index.0)
            .ok_or(TransferError::InvalidBuffer {
                label: label.clone(),
            })?;

        let needs_staging = gpu.staging.as_ref().map_or(true, |s| s.size() < len);
        if needs_staging {
            let (staging, err) = capture_errors(&gpu.device, || {
                gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("readback staging"),
                    size: len,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            });
            if let Some(e) = err {
                staging.destroy();
                return Err(match e {
                    wgpu::Error::OutOfMemory { .. } => TransferError::HostExhausted { bytes: len },
                    other => transfer_failure(&label, other),
                });
            }
            if let Some(old) = gpu.staging.replace(staging) {
                old.destroy();
            }
        }
        let Some(staging) = gpu.staging.as_ref() else {
            return Err(TransferError::HostExhausted { bytes: len });
        };

        let (_, err) = capture_errors(&gpu.device, || {
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("readback"),
                });
            encoder.copy_buffer_to_buffer(src.raw(), 0, staging, 0, len);
            gpu.queue.submit(Some(encoder.finish()));
        });
        if let Some(e) = err {
            return Err(transfer_failure(&label, e));
        }

        let slice = staging.slice(0..len);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver outlives the poll below
            let _ = sender.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(receiver) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(TransferError::MapFailed {
                    label,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransferError::MapFailed {
                    label,
                    reason: "map callback dropped".to_string(),
                })
            }
        }

        {
            let view = slice.get_mapped_range();
            out.copy_from_slice(&view);
        }
        staging.unmap();
        Ok(())
    }

    /// Compile (or reuse) a program and extract one entry point.
    pub fn build_kernel(
        &mut self,
        index: DeviceIndex,
        spec: &KernelSpec<'_>,
    ) -> Result<Kernel, SimError> {
        let path = self
            .locator
            .locate(spec.program)
            .ok_or_else(|| SetupError::SourceNotFound {
                name: spec.program.to_string(),
            })?;

        let source = read_source(&path)?;
        check_entry_point(&source, &path, spec.entry)?;

        if !self.programs.contains_key(&path) {
            let module = self.compile_program(index, &path, &source)?;
            self.programs.insert(path.clone(), module);
        }
        let gpu = self.device(index)?;
        let module = self
            .programs
            .get(&path)
            .ok_or_else(|| SetupError::SourceNotFound {
                name: spec.program.to_string(),
            })?;

        let constants: HashMap<String, f64> = spec
            .constants
            .iter()
            .map(|(key, value)| ((*key).to_string(), *value))
            .collect();

        let (pipeline, err) = capture_errors(&gpu.device, || {
            gpu.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(spec.entry),
                    layout: None,
                    module,
                    entry_point: Some(spec.entry),
                    compilation_options: wgpu::PipelineCompilationOptions {
                        constants: &constants,
                        zero_initialize_workgroup_memory: false,
                    },
                    cache: None,
                })
        });
        if let Some(e) = err {
            warn!("Kernel {} in {} failed to build", spec.entry, path.display());
            return Err(SetupError::CompileFailed {
                path,
                log: e.to_string(),
            }
            .into());
        }

        let args = self.allocate_with(
            index,
            &format!("{} arguments", spec.entry),
            spec.args_size,
            buffer::uniform_usage(),
        )?;
        info!("Built kernel {} from {}", spec.entry, path.display());
        Ok(Kernel::new(spec.entry, pipeline, args))
    }

    fn compile_program(
        &self,
        index: DeviceIndex,
        path: &PathBuf,
        source: &str,
    ) -> Result<wgpu::ShaderModule, SetupError> {
        let gpu = self.device(index)?;

        let (module, err) = capture_errors(&gpu.device, || {
            gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: path.file_name().and_then(|n| n.to_str()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });

        let info = pollster::block_on(module.get_compilation_info());
        let log = info
            .messages
            .iter()
            .map(|m| match m.location {
                Some(loc) => format!(
                    "{}:{}: {:?}: {}",
                    loc.line_number, loc.line_position, m.message_type, m.message
                ),
                None => format!("{:?}: {}", m.message_type, m.message),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let failed = err.is_some()
            || info
                .messages
                .iter()
                .any(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error));

        if failed {
            let log = match (log.is_empty(), err) {
                (true, Some(e)) => e.to_string(),
                _ => log,
            };
            warn!("Build log for {}:\n{log}", path.display());
            return Err(SetupError::CompileFailed {
                path: path.clone(),
                log,
            });
        }
        if !log.is_empty() {
            info!("Build log for {}:\n{log}", path.display());
        }
        Ok(module)
    }

    /// Release programs, queues, devices and the platform. Safe to repeat.
    pub fn teardown(&mut self) {
        if self.platform.is_none() && self.devices.is_empty() && self.programs.is_empty() {
            return;
        }
        self.programs.clear();
        for gpu in self.devices.drain(..) {
            if let Some(staging) = gpu.staging {
                staging.destroy();
            }
            debug!("Released device {}", gpu.info.name);
        }
        if let Some(platform) = self.platform.take() {
            info!("Released platform {}", platform.name);
        }
    }
}

impl Drop for DeviceBroker {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn read_source(path: &PathBuf) -> Result<String, SetupError> {
    std::fs::read_to_string(path).map_err(|source| SetupError::SourceUnreadable {
        path: path.clone(),
        source,
    })
}

fn check_entry_point(source: &str, path: &PathBuf, entry: &str) -> Result<(), SetupError> {
    if declares_entry_point(source, entry) {
        Ok(())
    } else {
        Err(SetupError::EntryPointNotFound {
            path: path.clone(),
            entry: entry.to_string(),
        })
    }
}

fn transfer_failure(label: &str, err: wgpu::Error) -> TransferError {
    match err {
        wgpu::Error::OutOfMemory { .. } => TransferError::DeviceExhausted {
            label: label.to_string(),
        },
        _ => TransferError::InvalidBuffer {
            label: label.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_failure_classification() {
        assert_eq!(
            classify_context_failure("Not enough memory left"),
            ContextFailure::HostOutOfMemory
        );
        assert_eq!(
            classify_context_failure("Device is lost"),
            ContextFailure::Unavailable
        );
    }

    #[test]
    fn test_platform_probe_order() {
        let names: Vec<_> = PLATFORM_ORDER.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, ["Vulkan", "Metal", "DX12", "GL"]);
    }

    #[test]
    #[ignore = "requires a compute-capable adapter"]
    fn test_upload_download_roundtrip() {
        let mut broker = DeviceBroker::open(DeviceType::All, ResourceLocator::default()).unwrap();
        let buffer = broker.allocate(DeviceIndex::PRIMARY, "roundtrip", 64).unwrap();
        assert_eq!(broker.allocated_bytes(), 64);

        let data: Vec<u8> = (0..64u8).collect();
        broker.upload(DeviceIndex::PRIMARY, &buffer, &data).unwrap();
        let mut out = vec![0u8; 64];
        broker.download(DeviceIndex::PRIMARY, &buffer, &mut out).unwrap();
        assert_eq!(out, data);

        let err = broker.upload(DeviceIndex::PRIMARY, &buffer, &[0u8; 65]).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRegion { .. }));

        drop(buffer);
        assert_eq!(broker.allocated_bytes(), 0);
        broker.teardown();
        broker.teardown();
        assert!(!broker.is_open());
    }

    #[test]
    #[ignore = "requires a compute-capable adapter"]
    fn test_missing_entry_point_is_reported() {
        let mut broker = DeviceBroker::open(DeviceType::All, ResourceLocator::default()).unwrap();
        let spec = KernelSpec {
            program: "grid",
            entry: "doesNotExist",
            constants: Vec::new(),
            args_size: 16,
        };
        let err = broker.build_kernel(DeviceIndex::PRIMARY, &spec).unwrap_err();
        assert!(matches!(
            err,
            SimError::Setup(SetupError::EntryPointNotFound { .. })
        ));
    }
}
