//! Kernel parameterization and WGSL generation.

use wgpu::BindGroupLayoutEntry;

use crate::backend::wgpu::bindings::{
    sampled_texture_entry, storage_read_entry, storage_read_write_entry, storage_texture_entry,
    uniform_entry,
};
use crate::backend::wgpu::shaders::{elementwise, matmul, matmul_vec4};
use crate::error::{AccelError, Result};
use crate::matrix::ElementType;
use crate::variant::{Encoding, KernelKind, VariantSpec};

/// Validated kernel configuration. Constructed only through [`KernelParams::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParams {
    kind: KernelKind,
    encoding: Encoding,
    element: ElementType,
    tile_size: u32,
    cols_per_thread: u32,
    rows_per_thread: u32,
    flat_dispatch: bool,
}

impl KernelParams {
    pub fn new(spec: &VariantSpec, element: ElementType, flat_dispatch: bool) -> Result<Self> {
        let params = Self {
            kind: spec.kind,
            encoding: spec.encoding,
            element,
            tile_size: spec.tile_size,
            cols_per_thread: spec.work_per_thread.0,
            rows_per_thread: spec.work_per_thread.1,
            flat_dispatch,
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        let label = format!("{}/{}", self.kind_str(), self.encoding);
        if self.tile_size == 0 {
            return Err(AccelError::config(format!("{label}: tile size must be at least 1")));
        }
        if self.cols_per_thread == 0 || self.rows_per_thread == 0 {
            return Err(AccelError::config(format!(
                "{label}: work per thread must be at least 1x1"
            )));
        }
        if !self.is_tiled() {
            if (self.cols_per_thread, self.rows_per_thread) != (1, 1) {
                return Err(AccelError::config(format!(
                    "{label}: work per thread must be 1x1 (got {}x{})",
                    self.cols_per_thread, self.rows_per_thread
                )));
            }
            return Ok(());
        }
        let (wx, wy) = self.workgroup();
        let inner = self.tile_inner();
        if inner % wx != 0 || inner % wy != 0 {
            return Err(AccelError::config(format!(
                "{label}: inner tile {inner} must be divisible by the workgroup {wx}x{wy}"
            )));
        }
        if self.is_vec4() {
            if self.cols_per_thread % 4 != 0 {
                return Err(AccelError::config(format!(
                    "{label}: columns per thread must be a multiple of 4 (got {})",
                    self.cols_per_thread
                )));
            }
            if inner % 4 != 0 || (inner / 4) % wx != 0 {
                return Err(AccelError::config(format!(
                    "{label}: inner tile {inner} must split into vec4 columns \
                     across {wx} invocations"
                )));
            }
        }
        Ok(())
    }

    /// Rejects configurations the device cannot run.
    pub fn check_limits(&self, limits: &wgpu::Limits) -> Result<()> {
        let (wx, wy) = self.workgroup();
        if wx > limits.max_compute_workgroup_size_x || wy > limits.max_compute_workgroup_size_y {
            return Err(AccelError::config(format!(
                "workgroup {wx}x{wy} exceeds device max {}x{}",
                limits.max_compute_workgroup_size_x, limits.max_compute_workgroup_size_y
            )));
        }
        if wx * wy > limits.max_compute_invocations_per_workgroup {
            return Err(AccelError::config(format!(
                "workgroup of {} invocations exceeds device max {}",
                wx * wy,
                limits.max_compute_invocations_per_workgroup
            )));
        }
        let storage = self.workgroup_storage_bytes();
        if storage > limits.max_compute_workgroup_storage_size {
            return Err(AccelError::config(format!(
                "requested {storage} bytes of workgroup storage exceeds device max {}",
                limits.max_compute_workgroup_storage_size
            )));
        }
        Ok(())
    }

    fn kind_str(&self) -> &'static str {
        match self.kind {
            KernelKind::Matmul => "matmul",
            KernelKind::Add => "add",
        }
    }

    /// Whether the kernel uses shared-memory tiles.
    pub fn is_tiled(&self) -> bool {
        self.kind == KernelKind::Matmul && self.encoding != Encoding::Buffer
    }

    pub fn is_vec4(&self) -> bool {
        self.encoding.values_per_element() == 4
    }

    pub fn workgroup(&self) -> (u32, u32) {
        (self.tile_size, self.tile_size)
    }

    pub fn work_per_thread(&self) -> (u32, u32) {
        (self.cols_per_thread, self.rows_per_thread)
    }

    pub fn tile_a_outer(&self) -> u32 {
        self.tile_size * self.rows_per_thread
    }

    pub fn tile_b_outer(&self) -> u32 {
        self.tile_size * self.cols_per_thread
    }

    pub fn tile_inner(&self) -> u32 {
        self.tile_a_outer().max(self.tile_b_outer())
    }

    pub fn workgroup_storage_bytes(&self) -> u32 {
        if !self.is_tiled() {
            return 0;
        }
        let elements =
            self.tile_a_outer() * self.tile_inner() + self.tile_inner() * self.tile_b_outer();
        elements * self.element.size_bytes()
    }

    pub fn flat_dispatch(&self) -> bool {
        self.flat_dispatch
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Bind group layout in declaration order: shape, A, B, output.
    pub fn layout_entries(&self) -> Vec<BindGroupLayoutEntry> {
        match self.encoding.texel_packing() {
            Some(packing) => vec![
                uniform_entry(0),
                sampled_texture_entry(1, self.element),
                sampled_texture_entry(2, self.element),
                storage_texture_entry(3, packing.format(self.element)),
            ],
            None => vec![
                uniform_entry(0),
                storage_read_entry(1),
                storage_read_entry(2),
                storage_read_write_entry(3),
            ],
        }
    }

    pub fn render(&self) -> String {
        let (io, body) = match (self.kind, self.encoding) {
            (KernelKind::Matmul, Encoding::Buffer) => {
                (matmul::BUFFER_SCALAR_IO, matmul::NAIVE_BODY)
            }
            (KernelKind::Matmul, Encoding::PackedBuffer) => {
                (matmul::BUFFER_SCALAR_IO, matmul::TILED_SCALAR_BODY)
            }
            (KernelKind::Matmul, Encoding::TextureSingleChannel) => {
                (matmul::TEXTURE_SCALAR_IO, matmul::TILED_SCALAR_BODY)
            }
            (KernelKind::Matmul, Encoding::Vec4Buffer) => {
                (matmul_vec4::BUFFER_VEC4_IO, matmul_vec4::TILED_VEC4_BODY)
            }
            (KernelKind::Matmul, Encoding::TextureFourChannel) => {
                (matmul_vec4::TEXTURE_VEC4_IO, matmul_vec4::TILED_VEC4_BODY)
            }
            (KernelKind::Add, encoding) if encoding.is_texture() => ("", elementwise::TEXTURE_ADD),
            (KernelKind::Add, _) => ("", elementwise::BUFFER_ADD),
        };
        let mut source = String::with_capacity(matmul::SHAPE_HEADER.len() + io.len() + body.len());
        source.push_str(matmul::SHAPE_HEADER);
        source.push_str(io);
        source.push_str(body);
        self.substitute(&source)
    }

    fn substitute(&self, source: &str) -> String {
        let scalar = self.element.wgsl_scalar();
        let element = if self.is_vec4() {
            format!("vec4<{scalar}>")
        } else {
            scalar.to_string()
        };
        let format = self
            .encoding
            .texel_packing()
            .map(|p| p.wgsl_format(self.element))
            .unwrap_or("r32float");
        let (wx, wy) = self.workgroup();
        let replacements: [(&str, String); 15] = [
            ("@WG_X@", wx.to_string()),
            ("@WG_Y@", wy.to_string()),
            ("@ROWS_PER_THREAD@", self.rows_per_thread.to_string()),
            ("@COLS_PER_THREAD@", self.cols_per_thread.to_string()),
            ("@COLS_PER_THREAD_VEC4@", (self.cols_per_thread / 4).max(1).to_string()),
            ("@TILE_A_OUTER@", self.tile_a_outer().to_string()),
            ("@TILE_B_OUTER@", self.tile_b_outer().to_string()),
            ("@TILE_B_OUTER_VEC4@", (self.tile_b_outer() / 4).max(1).to_string()),
            ("@TILE_INNER@", self.tile_inner().to_string()),
            ("@TILE_INNER_VEC4@", (self.tile_inner() / 4).max(1).to_string()),
            ("@FLAT_DISPATCH@", self.flat_dispatch.to_string()),
            ("@VALUES_PER_ELEMENT@", self.encoding.values_per_element().to_string()),
            ("@ELEMENT@", element),
            ("@FORMAT@", format.to_string()),
            ("@SCALAR@", scalar.to_string()),
        ];
        let mut out = source.to_string();
        for (sentinel, value) in &replacements {
            out = out.replace(sentinel, value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::wgpu::compiler::{NagaCompiler, ShaderCompiler};
    use crate::backend::wgpu::dispatch::common::dispatch_grid;
    use crate::variant::default_candidates;

    fn params(spec: VariantSpec) -> Result<KernelParams> {
        KernelParams::new(&spec, ElementType::F32, false)
    }

    #[test]
    fn derived_tiles() {
        let p = params(VariantSpec::matmul(Encoding::PackedBuffer, 8, (4, 2))).unwrap();
        assert_eq!(p.tile_a_outer(), 16);
        assert_eq!(p.tile_b_outer(), 32);
        assert_eq!(p.tile_inner(), 32);
        assert_eq!(p.workgroup_storage_bytes(), (16 * 32 + 32 * 32) * 4);
    }

    #[test]
    fn work_per_thread_is_columns_then_rows() {
        // 4 output columns and 1 row per invocation
        let p = params(VariantSpec::matmul(Encoding::PackedBuffer, 8, (4, 1))).unwrap();
        assert_eq!(p.work_per_thread(), (4, 1));
        assert_eq!(p.tile_b_outer(), 32);
        assert_eq!(p.tile_a_outer(), 8);
        // 64x64 output: X needs 16 threads (2 groups), Y needs 64 threads (8 groups)
        let grid = dispatch_grid(64, 64, p.workgroup(), p.work_per_thread());
        assert_eq!((grid.x, grid.y), (2, 8));
    }

    #[test]
    fn rejects_illegal_combinations() {
        let zero = params(VariantSpec::matmul(Encoding::PackedBuffer, 0, (1, 1)));
        assert_eq!(zero.unwrap_err().kind(), "config");
        assert!(params(VariantSpec::matmul(Encoding::PackedBuffer, 8, (0, 1))).is_err());
        // vec4 needs whole vec4 columns per invocation
        assert!(params(VariantSpec::matmul(Encoding::Vec4Buffer, 8, (2, 2))).is_err());
        // 6x6 workgroup with 4x1 work: inner 24 splits into 6 vec4, 6 % 6 == 0 ok
        assert!(params(VariantSpec::matmul(Encoding::Vec4Buffer, 6, (4, 1))).is_ok());
        assert!(params(VariantSpec::matmul(Encoding::PackedBuffer, 3, (2, 1))).is_ok());
        // inner 12 leaves 3 vec4 columns for a 2-wide workgroup
        assert!(params(VariantSpec::matmul(Encoding::TextureFourChannel, 2, (4, 6))).is_err());
        // naive kernels are one element per invocation
        assert!(params(VariantSpec::matmul(Encoding::Buffer, 16, (2, 2))).is_err());
        assert!(params(VariantSpec::add(Encoding::TextureFourChannel, 16)).is_ok());
    }

    #[test]
    fn limits_reject_oversized_workgroups() {
        let limits = wgpu::Limits::downlevel_defaults();
        let big = params(VariantSpec::matmul(Encoding::PackedBuffer, 32, (1, 1))).unwrap();
        assert!(big.check_limits(&limits).is_err());
        let storage_heavy =
            params(VariantSpec::matmul(Encoding::PackedBuffer, 16, (4, 4))).unwrap();
        let err = storage_heavy.check_limits(&wgpu::Limits::default()).unwrap_err();
        assert!(err.to_string().contains("workgroup storage"));
        let ok = params(VariantSpec::matmul(Encoding::PackedBuffer, 8, (4, 4))).unwrap();
        assert!(ok.check_limits(&wgpu::Limits::default()).is_ok());
    }

    #[test]
    fn rendered_source_has_no_sentinels() {
        let p = params(VariantSpec::matmul(Encoding::TextureFourChannel, 8, (4, 4))).unwrap();
        let src = p.render();
        let leftover = src
            .split('@')
            .skip(1)
            .any(|rest| rest.starts_with(|c: char| c.is_ascii_uppercase()));
        assert!(!leftover, "{src}");
        assert!(src.contains("@workgroup_size(8, 8, 1)"));
        assert!(src.contains("texture_storage_2d<rgba32float, write>"));
        assert!(src.contains("array<array<vec4<f32>, 8>, 32>"));
    }

    #[test]
    fn bindings_follow_declaration_order() {
        let p = params(VariantSpec::matmul(Encoding::TextureSingleChannel, 8, (1, 1))).unwrap();
        let entries = p.layout_entries();
        let slots: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert!(matches!(entries[3].ty, wgpu::BindingType::StorageTexture { .. }));
    }

    #[test]
    fn every_variant_validates_with_naga() {
        let compiler = NagaCompiler::default();
        let mut specs = default_candidates();
        specs.push(VariantSpec::add(Encoding::Buffer, 16));
        specs.push(VariantSpec::add(Encoding::Vec4Buffer, 16));
        specs.push(VariantSpec::add(Encoding::TextureSingleChannel, 16));
        specs.push(VariantSpec::add(Encoding::TextureFourChannel, 16));
        for element in [ElementType::F32, ElementType::U32] {
            for flat in [false, true] {
                for spec in &specs {
                    let p = KernelParams::new(spec, element, flat).unwrap();
                    let label = format!("{}-{element}-flat{flat}", spec.label());
                    compiler
                        .compile(&label, &p.render(), naga::ShaderStage::Compute)
                        .unwrap_or_else(|e| panic!("{label}: {e}"));
                }
            }
        }
    }
}
