//! Compiled compute kernels: pipeline, bind layout and argument block.

use bytemuck::Pod;

use super::buffer::DeviceBuffer;
use super::dispatch::DispatchSize;
use super::{capture_errors, OpenDevice};
use crate::error::DispatchError;

/// What to build: program name, entry point and extra override constants.
#[derive(Debug, Clone)]
pub struct KernelSpec<'a> {
    /// Resource name of the program (`"grid"`, `"perlin"`, `"waves"`)
    pub program: &'a str,
    /// `@compute` function inside the program
    pub entry: &'static str,
    /// Pipeline override constants declared by the program
    pub constants: Vec<(&'static str, f64)>,
    /// Size of the uniform argument block at binding 0
    pub args_size: u64,
}

/// One compute entry point, ready to bind and enqueue.
pub struct Kernel {
    name: &'static str,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    args: DeviceBuffer,
}

impl Kernel {
    pub(super) fn new(
        name: &'static str,
        pipeline: wgpu::ComputePipeline,
        args: DeviceBuffer,
    ) -> Self {
        let layout = pipeline.get_bind_group_layout(0);
        Self {
            name,
            pipeline,
            layout,
            args,
        }
    }

    /// Entry-point name, used as the stage name in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bind the argument block at 0 plus `buffers` at their binding slots.
    ///
    /// The set must match exactly the bindings the entry point uses.
    pub fn bind(
        &self,
        gpu: &OpenDevice,
        buffers: &[(u32, &DeviceBuffer)],
    ) -> Result<wgpu::BindGroup, DispatchError> {
        let mut entries = Vec::with_capacity(buffers.len() + 1);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: self.args.binding(),
        });
        entries.extend(buffers.iter().map(|(slot, buffer)| wgpu::BindGroupEntry {
            binding: *slot,
            resource: buffer.binding(),
        }));

        let (group, err) = capture_errors(&gpu.device, || {
            gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(self.name),
                layout: &self.layout,
                entries: &entries,
            })
        });
        match err {
            Some(e) => Err(DispatchError {
                stage: self.name,
                reason: format!("argument binding failed: {e}"),
            }),
            None => Ok(group),
        }
    }

    /// Write `args` and submit one dispatch over `size`.
    ///
    /// Returns as soon as the work is queued; ordering against later
    /// submissions on the same queue is guaranteed.
    pub fn enqueue<A: Pod>(
        &self,
        gpu: &OpenDevice,
        group: &wgpu::BindGroup,
        args: &A,
        size: DispatchSize,
    ) -> Result<(), DispatchError> {
        let bytes = bytemuck::bytes_of(args);
        if bytes.len() as u64 > self.args.size() {
            return Err(DispatchError {
                stage: self.name,
                reason: format!(
                    "argument block is {} bytes, kernel expects {}",
                    bytes.len(),
                    self.args.size()
                ),
            });
        }

        let (_, err) = capture_errors(&gpu.device, || {
            gpu.queue.write_buffer(self.args.raw(), 0, bytes);

            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(self.name),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(self.name),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, group, &[]);
                let (x, y, z) = size.workgroups();
                pass.dispatch_workgroups(x, y, z);
            }
            gpu.queue.submit(Some(encoder.finish()));
        });

        match err {
            Some(e) => Err(DispatchError {
                stage: self.name,
                reason: format!("enqueue failed: {e}"),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").field("name", &self.name).finish()
    }
}

/// Does `source` declare `@compute ... fn entry(`?
///
/// Checked before compilation so a missing entry point is reported as such
/// rather than as a generic pipeline failure.
pub fn declares_entry_point(source: &str, entry: &str) -> bool {
    let code = source
        .lines()
        .map(|line| match line.find("//") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut rest = code.as_str();
    while let Some(pos) = rest.find("@compute") {
        rest = &rest[pos + "@compute".len()..];
        let Some(fn_pos) = find_fn_keyword(rest) else {
            return false;
        };
        let name: String = rest[fn_pos + 2..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name == entry {
            return true;
        }
    }
    false
}

/// Offset of the next standalone `fn` token
fn find_fn_keyword(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    text.match_indices("fn").map(|(i, _)| i).find(|&i| {
        let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
        let after_ok = bytes.get(i + 2).map_or(false, |b| b.is_ascii_whitespace());
        before_ok && after_ok
    })
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
override NP_SIZE: u32 = 128u;

fn helper(x: f32) -> f32 { return x; }

@compute @workgroup_size(16, 16, 1)
fn geometry(@builtin(global_invocation_id) id: vec3<u32>) {}

// @compute fn commented_out() {}

@compute
@workgroup_size(16, 16, 1)
fn setBasePlane(@builtin(global_invocation_id) id: vec3<u32>) {}
"#;

    #[test]
    fn test_finds_entry_points() {
        assert!(declares_entry_point(SOURCE, "geometry"));
        assert!(declares_entry_point(SOURCE, "setBasePlane"));
    }

    #[test]
    fn test_ignores_helpers_and_comments() {
        assert!(!declares_entry_point(SOURCE, "helper"));
        assert!(!declares_entry_point(SOURCE, "commented_out"));
        assert!(!declares_entry_point(SOURCE, "geo"));
        assert!(!declares_entry_point("", "geometry"));
    }
}
