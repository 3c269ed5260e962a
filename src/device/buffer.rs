//! Owned device buffers with live allocation accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read/write storage buffer that returns its bytes to the broker's tally on drop.
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    label: String,
    tally: Arc<AtomicU64>,
}

impl DeviceBuffer {
    pub(super) fn new(buffer: wgpu::Buffer, label: &str, tally: Arc<AtomicU64>) -> Self {
        let size = buffer.size();
        tally.fetch_add(size, Ordering::Relaxed);
        Self {
            buffer,
            size,
            label: label.to_string(),
            tally,
        }
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Capacity in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.tally.fetch_sub(self.size, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.label)
            .field("size", &self.size)
            .finish()
    }
}

/// Usage flags for simulator buffers
pub(super) fn storage_usage() -> wgpu::BufferUsages {
    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
}

/// Usage flags for kernel argument blocks
pub(super) fn uniform_usage() -> wgpu::BufferUsages {
    wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
}

/// Buffer sizes must be multiples of `wgpu::COPY_BUFFER_ALIGNMENT`.
pub(super) fn aligned_size(bytes: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    bytes.div_ceil(align) * align
}

/// Can `len` bytes be copied into/out of a buffer of `capacity` bytes?
pub(super) fn valid_region(len: u64, capacity: u64) -> bool {
    len > 0 && len % wgpu::COPY_BUFFER_ALIGNMENT == 0 && len <= capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 4);
        assert_eq!(aligned_size(16), 16);
        assert_eq!(aligned_size(18), 20);
    }

    #[test]
    fn test_valid_region() {
        assert!(valid_region(16, 16));
        assert!(valid_region(4, 64));
        assert!(!valid_region(0, 64));
        assert!(!valid_region(6, 64));
        assert!(!valid_region(68, 64));
    }
}
