//! 2D dispatch sizing over the Complexity × Complexity grid domain.

/// Local work-group edge; every kernel declares `@workgroup_size(16, 16, 1)`
pub const WORKGROUP_EDGE: u32 = 16;

/// Round `value` up to the next multiple of `multiple`.
pub fn round_up(value: u32, multiple: u32) -> u32 {
    if multiple == 0 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

/// Global and local extents of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSize {
    /// Work-items per axis, rounded up to a multiple of `local`
    pub global: [u32; 2],
    pub local: [u32; 2],
}

impl DispatchSize {
    /// Cover an `x × y` domain with `WORKGROUP_EDGE²` groups.
    pub fn for_grid(x: u32, y: u32) -> Self {
        Self {
            global: [round_up(x, WORKGROUP_EDGE), round_up(y, WORKGROUP_EDGE)],
            local: [WORKGROUP_EDGE, WORKGROUP_EDGE],
        }
    }

    /// Argument for `dispatch_workgroups`
    pub fn workgroups(&self) -> (u32, u32, u32) {
        (
            self.global[0] / self.local[0].max(1),
            self.global[1] / self.local[1].max(1),
            1,
        )
    }
}
