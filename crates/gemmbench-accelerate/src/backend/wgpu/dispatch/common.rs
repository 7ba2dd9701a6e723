use crate::backend::wgpu::config::MAX_DISPATCH_WORKGROUPS;
use crate::error::{AccelError, Result};

pub fn dispatch_size(elements: u32, workgroup: u32) -> u32 {
    elements.div_ceil(workgroup.max(1))
}

/// Workgroup counts for one compute pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    /// Set when the tile grid was folded into the X dimension.
    pub flattened: bool,
}

impl DispatchGrid {
    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64
    }

    pub fn check_limit(&self, max_per_dimension: u32) -> Result<()> {
        let max = max_per_dimension.min(MAX_DISPATCH_WORKGROUPS);
        if self.x > max || self.y > max {
            return Err(AccelError::config(format!(
                "dispatch grid {}x{} exceeds device max {} workgroups per dimension",
                self.x, self.y, max
            )));
        }
        Ok(())
    }
}

/// Grid for an output of `extent_x` columns by `extent_y` rows.
///
/// Threads cover `ceil(x / rx) x ceil(y / ry)`. When the thread rows fit in
/// exactly one workgroup row the grid is flattened to a single row of
/// workgroups; kernels compiled with `FLAT_DISPATCH` unfold it again.
pub fn dispatch_grid(
    extent_x: u32,
    extent_y: u32,
    workgroup: (u32, u32),
    work_per_thread: (u32, u32),
) -> DispatchGrid {
    let (wx, wy) = (workgroup.0.max(1), workgroup.1.max(1));
    let (rx, ry) = (work_per_thread.0.max(1), work_per_thread.1.max(1));
    let tx = dispatch_size(extent_x, rx);
    let ty = dispatch_size(extent_y, ry);
    if ty == wy {
        // saturate on overflow so check_limit rejects the grid
        let threads = tx.checked_mul(ty);
        DispatchGrid {
            x: threads.map_or(u32::MAX, |threads| dispatch_size(threads, wx)),
            y: 1,
            flattened: true,
        }
    } else {
        DispatchGrid {
            x: dispatch_size(tx, wx),
            y: dispatch_size(ty, wy),
            flattened: false,
        }
    }
}

/// Whether `dispatch_grid` flattens for these extents; kernels are compiled against it.
pub fn grid_is_flat(extent_y: u32, workgroup_y: u32, rows_per_thread: u32) -> bool {
    dispatch_size(extent_y, rows_per_thread.max(1)) == workgroup_y.max(1)
}
