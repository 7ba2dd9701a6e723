/// Tile edge of the default naive and buffer variants.
pub const DEFAULT_TILE: u32 = 16;
/// Upper bound on workgroups per dispatch dimension, whatever the adapter reports.
pub const MAX_DISPATCH_WORKGROUPS: u32 = 65_535;
pub const ELEMENT_BYTES: u32 = 4;
/// Size of the shape uniform in bytes.
pub const SHAPE_UNIFORM_BYTES: u64 = 24;

/// Required alignment of `bytes_per_row` in buffer/texture copies.
pub const fn required_row_pitch_alignment() -> u32 {
    wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}
