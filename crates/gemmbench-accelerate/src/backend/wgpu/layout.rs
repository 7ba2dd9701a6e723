//! Host <-> device data layouts.
//!
//! Scalars are always 4 bytes. Texture uploads go through a staging buffer
//! whose rows are padded to the copy pitch alignment; readback strips that
//! row padding and any texel padding in the last column.

use crate::backend::wgpu::config::ELEMENT_BYTES;
use crate::error::{AccelError, Result};
use crate::matrix::ElementType;

/// How many logical values share one texel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelPacking {
    SingleChannel,
    FourChannel,
}

impl TexelPacking {
    pub fn channels(self) -> u32 {
        match self {
            TexelPacking::SingleChannel => 1,
            TexelPacking::FourChannel => 4,
        }
    }

    /// Values per texel along X and Y.
    pub fn values_per_texel(self) -> (u32, u32) {
        (self.channels(), 1)
    }

    pub fn format(self, element: ElementType) -> wgpu::TextureFormat {
        match (self, element) {
            (TexelPacking::SingleChannel, ElementType::F32) => wgpu::TextureFormat::R32Float,
            (TexelPacking::SingleChannel, ElementType::U32) => wgpu::TextureFormat::R32Uint,
            (TexelPacking::FourChannel, ElementType::F32) => wgpu::TextureFormat::Rgba32Float,
            (TexelPacking::FourChannel, ElementType::U32) => wgpu::TextureFormat::Rgba32Uint,
        }
    }

    pub fn texel_bytes(self) -> u32 {
        self.channels() * ELEMENT_BYTES
    }

    /// WGSL texel format name for storage textures.
    pub fn wgsl_format(self, element: ElementType) -> &'static str {
        match (self, element) {
            (TexelPacking::SingleChannel, ElementType::F32) => "r32float",
            (TexelPacking::SingleChannel, ElementType::U32) => "r32uint",
            (TexelPacking::FourChannel, ElementType::F32) => "rgba32float",
            (TexelPacking::FourChannel, ElementType::U32) => "rgba32uint",
        }
    }
}

/// Texture extent for a `logical_width x logical_height` matrix.
pub fn packed_texture_extent(
    logical_width: u32,
    logical_height: u32,
    values_per_texel: (u32, u32),
) -> (u32, u32) {
    (
        logical_width.div_ceil(values_per_texel.0.max(1)),
        logical_height.div_ceil(values_per_texel.1.max(1)),
    )
}

pub fn padded_bytes_per_row(unpadded: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    unpadded.div_ceil(alignment) * alignment
}

/// Checks a configured row pitch alignment against what copies require.
pub fn validate_row_pitch_alignment(alignment: u32, required: u32) -> Result<u32> {
    if alignment == 0 || required == 0 || alignment % required != 0 {
        return Err(AccelError::config(format!(
            "row pitch alignment {alignment} must be a non-zero multiple of {required}"
        )));
    }
    Ok(alignment)
}

/// Number of scalars per row once a row is padded to whole vec4s.
pub fn vec4_row_stride(cols: u32) -> u32 {
    cols.div_ceil(4) * 4
}

/// Copies `rows x cols` values into rows of `stride` values, zero filled.
pub fn pad_rows<T: bytemuck::Pod>(values: &[T], rows: usize, cols: usize, stride: usize) -> Vec<T> {
    if stride == cols {
        return values.to_vec();
    }
    let mut out = vec![T::zeroed(); rows * stride];
    for row in 0..rows {
        out[row * stride..row * stride + cols]
            .copy_from_slice(&values[row * cols..(row + 1) * cols]);
    }
    out
}

pub fn strip_rows<T: bytemuck::Pod>(
    values: &[T],
    rows: usize,
    cols: usize,
    stride: usize,
) -> Vec<T> {
    if stride == cols {
        return values[..rows * cols].to_vec();
    }
    let mut out = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        out.extend_from_slice(&values[row * stride..row * stride + cols]);
    }
    out
}

/// Staging bytes for a texture upload plus the `bytes_per_row` used.
#[derive(Debug, Clone)]
pub struct TextureStaging {
    pub bytes: Vec<u8>,
    pub bytes_per_row: u32,
    pub width: u32,
    pub height: u32,
}

/// Lays out row-major matrix bytes as padded texture rows.
pub fn stage_texture_upload(
    matrix_bytes: &[u8],
    rows: u32,
    cols: u32,
    packing: TexelPacking,
    alignment: u32,
) -> Result<TextureStaging> {
    let (width, height) = packed_texture_extent(cols, rows, packing.values_per_texel());
    let row_bytes = (cols * ELEMENT_BYTES) as usize;
    let expected = row_bytes * rows as usize;
    if row_bytes == 0 || matrix_bytes.len() != expected {
        return Err(AccelError::config(format!(
            "texture upload of {rows}x{cols} needs {expected} bytes, got {}",
            matrix_bytes.len()
        )));
    }
    let bytes_per_row = padded_bytes_per_row(width * packing.texel_bytes(), alignment);
    let mut bytes = vec![0u8; bytes_per_row as usize * height as usize];
    for (row, src) in matrix_bytes.chunks_exact(row_bytes).enumerate() {
        let dst = row * bytes_per_row as usize;
        bytes[dst..dst + row_bytes].copy_from_slice(src);
    }
    Ok(TextureStaging {
        bytes,
        bytes_per_row,
        width,
        height,
    })
}

/// Inverse of [`stage_texture_upload`]: drops row and texel padding.
pub fn strip_texture_readback(padded: &[u8], rows: u32, cols: u32, bytes_per_row: u32) -> Vec<u8> {
    let row_bytes = (cols * ELEMENT_BYTES) as usize;
    let mut out = Vec::with_capacity(row_bytes * rows as usize);
    for row in 0..rows as usize {
        let start = row * bytes_per_row as usize;
        out.extend_from_slice(&padded[start..start + row_bytes]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_extent_rounds_up() {
        assert_eq!(packed_texture_extent(17, 3, (4, 1)), (5, 3));
        assert_eq!(packed_texture_extent(16, 16, (1, 1)), (16, 16));
        assert_eq!(packed_texture_extent(1, 1, (4, 1)), (1, 1));
    }

    #[test]
    fn pitch_padding() {
        assert_eq!(padded_bytes_per_row(4, 256), 256);
        assert_eq!(padded_bytes_per_row(256, 256), 256);
        assert_eq!(padded_bytes_per_row(257, 256), 512);
        assert!(validate_row_pitch_alignment(512, 256).is_ok());
        assert!(validate_row_pitch_alignment(300, 256).is_err());
        assert!(validate_row_pitch_alignment(0, 256).is_err());
    }

    #[test]
    fn vec4_rows_are_padded_with_zeros() {
        let values: Vec<u32> = (1..=6).collect();
        let stride = vec4_row_stride(3) as usize;
        let padded = pad_rows(&values, 2, 3, stride);
        assert_eq!(padded, vec![1, 2, 3, 0, 4, 5, 6, 0]);
        assert_eq!(strip_rows(&padded, 2, 3, stride), values);
    }

    #[test]
    fn texture_staging_strips_back_to_input() {
        let values: Vec<f32> = (0..(3 * 5)).map(|v| v as f32).collect();
        let bytes = bytemuck::cast_slice(&values);
        let staged = stage_texture_upload(bytes, 3, 5, TexelPacking::FourChannel, 256).unwrap();
        assert_eq!((staged.width, staged.height), (2, 3));
        assert_eq!(staged.bytes_per_row, 256);
        assert_eq!(staged.bytes.len(), 768);
        // texel padding past column 5 is zero
        assert!(staged.bytes[20..32].iter().all(|b| *b == 0));
        let back = strip_texture_readback(&staged.bytes, 3, 5, staged.bytes_per_row);
        assert_eq!(back, bytes);
    }

    #[test]
    fn texture_staging_rejects_short_input() {
        let values = vec![0u32; 14];
        let err = stage_texture_upload(
            bytemuck::cast_slice(&values),
            3,
            5,
            TexelPacking::SingleChannel,
            256,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn formats_follow_packing_and_type() {
        assert_eq!(
            TexelPacking::SingleChannel.format(ElementType::U32),
            wgpu::TextureFormat::R32Uint
        );
        assert_eq!(
            TexelPacking::FourChannel.format(ElementType::F32),
            wgpu::TextureFormat::Rgba32Float
        );
        assert_eq!(TexelPacking::FourChannel.texel_bytes(), 16);
    }
}
