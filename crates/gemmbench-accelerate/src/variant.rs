use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::wgpu::config::DEFAULT_TILE;
use crate::backend::wgpu::layout::TexelPacking;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelKind {
    Matmul,
    Add,
}

/// Where operands live on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// Linear storage buffer, one scalar per element. Matmul is the naive kernel.
    Buffer,
    /// Linear storage buffer driven by the tiled kernel.
    PackedBuffer,
    /// Storage buffer of `vec4`, rows padded to a multiple of four.
    Vec4Buffer,
    #[serde(alias = "texture-r32")]
    TextureSingleChannel,
    #[serde(alias = "texture-rgba32")]
    TextureFourChannel,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Buffer => "buffer",
            Encoding::PackedBuffer => "packed-buffer",
            Encoding::Vec4Buffer => "vec4-buffer",
            Encoding::TextureSingleChannel => "texture-r32",
            Encoding::TextureFourChannel => "texture-rgba32",
        }
    }

    pub fn texel_packing(self) -> Option<TexelPacking> {
        match self {
            Encoding::TextureSingleChannel => Some(TexelPacking::SingleChannel),
            Encoding::TextureFourChannel => Some(TexelPacking::FourChannel),
            _ => None,
        }
    }

    pub fn is_texture(self) -> bool {
        self.texel_packing().is_some()
    }

    /// Values carried by one device element along a row.
    pub fn values_per_element(self) -> u32 {
        match self {
            Encoding::Vec4Buffer | Encoding::TextureFourChannel => 4,
            _ => 1,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kernel configuration under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub kind: KernelKind,
    pub encoding: Encoding,
    pub tile_size: u32,
    /// `(columns, rows)` of output computed by each invocation. The first
    /// value spreads along X (output columns), the second along Y (rows);
    /// config files write it as `[columns, rows]`.
    pub work_per_thread: (u32, u32),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl VariantSpec {
    pub fn matmul(encoding: Encoding, tile_size: u32, work_per_thread: (u32, u32)) -> Self {
        Self {
            kind: KernelKind::Matmul,
            encoding,
            tile_size,
            work_per_thread,
            label: None,
        }
    }

    pub fn add(encoding: Encoding, tile_size: u32) -> Self {
        Self {
            kind: KernelKind::Add,
            encoding,
            tile_size,
            work_per_thread: (1, 1),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let kind = match self.kind {
            KernelKind::Matmul => "matmul",
            KernelKind::Add => "add",
        };
        format!(
            "{kind}-{}-ts{}-{}x{}",
            self.encoding, self.tile_size, self.work_per_thread.0, self.work_per_thread.1
        )
    }
}

/// The naive buffer matmul used as ground truth.
pub fn default_reference() -> VariantSpec {
    VariantSpec::matmul(Encoding::Buffer, DEFAULT_TILE, (1, 1)).with_label("reference")
}

pub fn default_candidates() -> Vec<VariantSpec> {
    vec![
        VariantSpec::matmul(Encoding::Buffer, DEFAULT_TILE, (1, 1)),
        VariantSpec::matmul(Encoding::PackedBuffer, DEFAULT_TILE, (1, 1)),
        VariantSpec::matmul(Encoding::PackedBuffer, 8, (4, 4)),
        VariantSpec::matmul(Encoding::Vec4Buffer, 8, (4, 4)),
        VariantSpec::matmul(Encoding::TextureSingleChannel, 8, (4, 4)),
        VariantSpec::matmul(Encoding::TextureFourChannel, 8, (4, 4)),
    ]
}
