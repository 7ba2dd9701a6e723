use std::sync::Arc;

use futures::future::BoxFuture;

use crate::backend::wgpu::context::GpuContext;
use crate::backend::wgpu::dispatch::common::DispatchGrid;
use crate::backend::wgpu::layout::{
    packed_texture_extent, padded_bytes_per_row, stage_texture_upload, strip_texture_readback,
    TexelPacking,
};
use crate::backend::wgpu::params::ShapeDescriptor;
use crate::backend::wgpu::readback::read_texture;
use crate::error::{AccelError, Result};
use crate::matrix::{ElementType, HostMatrix, MatrixData};
use crate::ops::{check_operands, prepare_kernel, ComputeOp, DispatchCore};
use crate::variant::VariantSpec;

struct TextureResources {
    shape: wgpu::Buffer,
    a: wgpu::Texture,
    b: wgpu::Texture,
    out: wgpu::Texture,
}

impl TextureResources {
    fn destroy(self) {
        self.shape.destroy();
        self.a.destroy();
        self.b.destroy();
        self.out.destroy();
    }
}

/// Operation whose operands are sampled 2D textures and whose output is a
/// write-only storage texture.
pub struct TextureOp {
    core: DispatchCore,
    resources: Option<TextureResources>,
    element: ElementType,
    out_rows: u32,
    out_cols: u32,
    out_bytes_per_row: u32,
}

/// Creates a texture for `matrix` and records the padded upload into `encoder`.
/// The returned staging buffer must outlive the submission.
fn upload_texture(
    ctx: &GpuContext,
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    matrix: &HostMatrix,
    packing: TexelPacking,
    usage: wgpu::TextureUsages,
) -> Result<(wgpu::Texture, wgpu::Buffer)> {
    let staged = stage_texture_upload(
        matrix.as_bytes(),
        matrix.rows as u32,
        matrix.cols as u32,
        packing,
        ctx.row_pitch_alignment(),
    )?;
    let texture = ctx.allocate_texture(
        label,
        staged.width,
        staged.height,
        packing.format(matrix.element_type()),
        usage | wgpu::TextureUsages::COPY_DST,
    )?;
    let staging = ctx.allocate_buffer_init(
        &format!("{label}-upload"),
        &staged.bytes,
        wgpu::BufferUsages::COPY_SRC,
    )?;
    encoder.copy_buffer_to_texture(
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(staged.bytes_per_row),
                rows_per_image: Some(staged.height),
            },
        },
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        texture.size(),
    );
    Ok((texture, staging))
}

fn packing_of(spec: &VariantSpec) -> Result<TexelPacking> {
    spec.encoding.texel_packing().ok_or_else(|| {
        AccelError::config(format!(
            "{}: encoding '{}' is not a texture encoding",
            spec.label(),
            spec.encoding
        ))
    })
}

impl TextureOp {
    pub fn new(
        ctx: &Arc<GpuContext>,
        spec: &VariantSpec,
        inputs: &[HostMatrix],
        shape: ShapeDescriptor,
    ) -> Result<Self> {
        let label = spec.label();
        let packing = packing_of(spec)?;
        let (a, b, element) = check_operands(spec, inputs, &shape)?;
        let prepared = prepare_kernel(ctx, spec, element, &shape)?;

        let shape_buffer = ctx.allocate_buffer_init(
            &format!("{label}-shape"),
            bytemuck::bytes_of(&shape),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )?;
        let mut encoder = ctx.create_encoder(&format!("{label}-upload"));
        let sampled = wgpu::TextureUsages::TEXTURE_BINDING;
        let (a_texture, a_staging) =
            upload_texture(ctx, &mut encoder, &format!("{label}-a"), a, packing, sampled)?;
        let (b_texture, b_staging) =
            upload_texture(ctx, &mut encoder, &format!("{label}-b"), b, packing, sampled)?;

        let (out_width, out_height) = packed_texture_extent(
            shape.output_width,
            shape.output_height,
            packing.values_per_texel(),
        );
        let out_texture = ctx.allocate_texture(
            &format!("{label}-out"),
            out_width,
            out_height,
            packing.format(element),
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )?;
        let out_bytes_per_row =
            padded_bytes_per_row(out_width * packing.texel_bytes(), ctx.row_pitch_alignment());

        let mut core = DispatchCore::new(ctx, label, &prepared);
        ctx.submit(encoder);
        core.signal();
        drop((a_staging, b_staging));

        let a_view = a_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let b_view = b_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let out_view = out_texture.create_view(&wgpu::TextureViewDescriptor::default());
        core.bind(&[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: shape_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&a_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&b_view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(&out_view),
            },
        ]);
        log::debug!(
            "built texture op '{}': {:?} out texture {}x{} pitch {} grid {}x{} flat={}",
            core.label(),
            packing.format(element),
            out_width,
            out_height,
            out_bytes_per_row,
            core.grid().x,
            core.grid().y,
            core.grid().flattened
        );
        Ok(Self {
            core,
            resources: Some(TextureResources {
                shape: shape_buffer,
                a: a_texture,
                b: b_texture,
                out: out_texture,
            }),
            element,
            out_rows: shape.output_height,
            out_cols: shape.output_width,
            out_bytes_per_row,
        })
    }

    pub fn grid(&self) -> DispatchGrid {
        self.core.grid()
    }

    pub fn output_bytes_per_row(&self) -> u32 {
        self.out_bytes_per_row
    }
}

impl ComputeOp for TextureOp {
    fn label(&self) -> &str {
        self.core.label()
    }

    fn dispatch(&mut self) -> Result<()> {
        self.core.dispatch()
    }

    fn dispatch_async(&mut self) -> BoxFuture<'_, Result<()>> {
        self.core.dispatch_async()
    }

    fn read_result(&mut self) -> Result<HostMatrix> {
        self.core.ensure_dispatched("read_result")?;
        let Some(resources) = self.resources.as_ref() else {
            return Err(AccelError::invalid_state("read_result", "output texture missing"));
        };
        let padded = self.core.read_texture(&resources.out, self.out_bytes_per_row)?;
        let bytes =
            strip_texture_readback(&padded, self.out_rows, self.out_cols, self.out_bytes_per_row);
        HostMatrix::new(
            self.out_rows as usize,
            self.out_cols as usize,
            MatrixData::from_bytes(self.element, &bytes),
        )
    }

    fn release(&mut self) -> Result<()> {
        self.core.release()?;
        if let Some(resources) = self.resources.take() {
            resources.destroy();
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.core.is_released()
    }
}

/// Uploads `matrix` into a packed texture and reads it straight back.
///
/// No kernel runs; the result only depends on the staging pitch and texel
/// padding being stripped correctly.
pub fn texture_roundtrip(
    ctx: &GpuContext,
    matrix: &HostMatrix,
    packing: TexelPacking,
) -> Result<HostMatrix> {
    matrix.validate()?;
    let label = format!("roundtrip-{}", packing.wgsl_format(matrix.element_type()));
    let _span = tracing::info_span!("texture_roundtrip", label = label.as_str()).entered();
    let mut fence = ctx.create_fence();
    let mut encoder = ctx.create_encoder(&format!("{label}-upload"));
    let (texture, staging) = upload_texture(
        ctx,
        &mut encoder,
        &label,
        matrix,
        packing,
        wgpu::TextureUsages::COPY_SRC,
    )?;
    ctx.submit(encoder);
    fence.signal();
    drop(staging);
    let bytes_per_row = padded_bytes_per_row(
        texture.width() * packing.texel_bytes(),
        ctx.row_pitch_alignment(),
    );
    let padded = read_texture(ctx, &mut fence, &texture, bytes_per_row, &label)?;
    texture.destroy();
    let (rows, cols) = (matrix.rows as u32, matrix.cols as u32);
    let bytes = strip_texture_readback(&padded, rows, cols, bytes_per_row);
    HostMatrix::new(
        matrix.rows,
        matrix.cols,
        MatrixData::from_bytes(matrix.element_type(), &bytes),
    )
}
