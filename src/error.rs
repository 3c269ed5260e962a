//! Error taxonomy for accelerator setup, transfers, dispatches and allocation.
//!
//! Setup failures abort `create()` and leave the simulator torn down.
//! Transfer and dispatch failures abort only the current frame; the last
//! downloaded mesh stays valid.

use std::path::PathBuf;

use thiserror::Error;

use crate::params::DeviceType;

/// Why a logical device (the "context") could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFailure {
    /// The adapter exists but refused to open (lost, busy, unsupported limits).
    Unavailable,
    /// The driver ran out of host memory while opening the device.
    HostOutOfMemory,
}

impl std::fmt::Display for ContextFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextFailure::Unavailable => write!(f, "selected devices are not available"),
            ContextFailure::HostOutOfMemory => write!(f, "host is out of memory"),
        }
    }
}

/// Platform, device, program and kernel setup failures. Never retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no compute platform exposes a device of type {filter}")]
    NoPlatform { filter: DeviceType },

    #[error("platform {backend} has no device of type {filter}")]
    NoDevice {
        backend: String,
        filter: DeviceType,
    },

    #[error("can't create the device context for {adapter}: {failure} ({detail})")]
    Context {
        adapter: String,
        failure: ContextFailure,
        detail: String,
    },

    #[error("kernel program `{name}` can't be found in any resource directory")]
    SourceNotFound { name: String },

    #[error("can't read kernel source {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel program {path} failed to compile:\n{log}")]
    CompileFailed { path: PathBuf, log: String },

    #[error("kernel program {path} has no compute entry point `{entry}`")]
    EntryPointNotFound { path: PathBuf, entry: String },

    #[error("device index {index} is out of range ({available} devices open)")]
    NoSuchDevice { index: usize, available: usize },
}

/// Host <-> device copy failures.
#[derive(Debug, Error, PartialEq)]
pub enum TransferError {
    #[error("invalid buffer object `{label}`")]
    InvalidBuffer { label: String },

    #[error("invalid region: {len} bytes against `{label}` of {capacity} bytes (copies must be 4-byte multiples)")]
    InvalidRegion {
        label: String,
        len: u64,
        capacity: u64,
    },

    #[error("failure to allocate {bytes} bytes of host memory for a transfer")]
    HostExhausted { bytes: u64 },

    #[error("device ran out of memory while transferring `{label}`")]
    DeviceExhausted { label: String },

    #[error("readback of `{label}` could not be mapped: {reason}")]
    MapFailed { label: String, reason: String },
}

/// Kernel argument binding or enqueue failure for one pipeline stage.
#[derive(Debug, Error, PartialEq)]
#[error("{stage} kernel failed: {reason}")]
pub struct DispatchError {
    pub stage: &'static str,
    pub reason: String,
}

/// Device memory allocation failure.
#[derive(Debug, Error, PartialEq)]
#[error("device memory allocation of {requested} bytes for `{label}` failed: {reason}")]
pub struct ResourceExhaustion {
    pub label: String,
    pub requested: u64,
    pub reason: String,
}

/// Any failure surfaced by the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Exhausted(#[from] ResourceExhaustion),

    #[error("wave {index}: period must be a positive number of seconds, got {period}")]
    InvalidWave { index: usize, period: f32 },

    #[error("simulator is not created")]
    NotCreated,
}

impl SimError {
    /// Stage-level failures are recoverable on the next frame; setup ones are not.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, SimError::Transfer(_) | SimError::Dispatch(_))
    }
}
