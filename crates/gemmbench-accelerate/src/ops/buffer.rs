use std::sync::Arc;

use futures::future::BoxFuture;

use crate::backend::wgpu::config::ELEMENT_BYTES;
use crate::backend::wgpu::context::GpuContext;
use crate::backend::wgpu::dispatch::common::DispatchGrid;
use crate::backend::wgpu::layout::{pad_rows, strip_rows, vec4_row_stride};
use crate::backend::wgpu::params::ShapeDescriptor;
use crate::error::{AccelError, Result};
use crate::matrix::{ElementType, HostMatrix, MatrixData};
use crate::ops::{check_operands, prepare_kernel, ComputeOp, DispatchCore};
use crate::variant::VariantSpec;

struct BufferResources {
    shape: wgpu::Buffer,
    a: wgpu::Buffer,
    b: wgpu::Buffer,
    out: wgpu::Buffer,
}

impl BufferResources {
    fn destroy(self) {
        self.shape.destroy();
        self.a.destroy();
        self.b.destroy();
        self.out.destroy();
    }
}

/// Operation whose operands and output live in storage buffers.
///
/// Vec4 encodings pad every row to a whole number of `vec4`; the stride is
/// kept so readback can drop the padding again.
pub struct BufferOp {
    core: DispatchCore,
    resources: Option<BufferResources>,
    element: ElementType,
    out_rows: usize,
    out_cols: usize,
    out_stride: usize,
}

fn row_stride(spec: &VariantSpec, cols: usize) -> usize {
    if spec.encoding.values_per_element() == 4 {
        vec4_row_stride(cols as u32) as usize
    } else {
        cols
    }
}

fn packed_bytes(spec: &VariantSpec, matrix: &HostMatrix) -> Vec<u8> {
    let width = ELEMENT_BYTES as usize;
    let stride = row_stride(spec, matrix.cols);
    pad_rows(matrix.as_bytes(), matrix.rows, matrix.cols * width, stride * width)
}

impl BufferOp {
    pub fn new(
        ctx: &Arc<GpuContext>,
        spec: &VariantSpec,
        inputs: &[HostMatrix],
        shape: ShapeDescriptor,
    ) -> Result<Self> {
        let label = spec.label();
        let (a, b, element) = check_operands(spec, inputs, &shape)?;
        let prepared = prepare_kernel(ctx, spec, element, &shape)?;

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let shape_buffer = ctx.allocate_buffer_init(
            &format!("{label}-shape"),
            bytemuck::bytes_of(&shape),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )?;
        let a_buffer =
            ctx.allocate_buffer_init(&format!("{label}-a"), &packed_bytes(spec, a), storage)?;
        let b_buffer =
            ctx.allocate_buffer_init(&format!("{label}-b"), &packed_bytes(spec, b), storage)?;
        let out_rows = shape.output_height as usize;
        let out_cols = shape.output_width as usize;
        let out_stride = row_stride(spec, out_cols);
        let out_bytes = (out_rows * out_stride) as u64 * ELEMENT_BYTES as u64;
        let out_buffer = ctx.allocate_buffer(
            &format!("{label}-out"),
            out_bytes,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        )?;

        let mut core = DispatchCore::new(ctx, label, &prepared);
        core.bind(&[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: shape_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: a_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: b_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: out_buffer.as_entire_binding(),
            },
        ]);
        log::debug!(
            "built buffer op '{}': grid {}x{} flat={} out {}x{} stride {}",
            core.label(),
            core.grid().x,
            core.grid().y,
            core.grid().flattened,
            out_rows,
            out_cols,
            out_stride
        );
        Ok(Self {
            core,
            resources: Some(BufferResources {
                shape: shape_buffer,
                a: a_buffer,
                b: b_buffer,
                out: out_buffer,
            }),
            element,
            out_rows,
            out_cols,
            out_stride,
        })
    }

    pub fn grid(&self) -> DispatchGrid {
        self.core.grid()
    }
}

impl ComputeOp for BufferOp {
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
            return Err(AccelError::invalid_state(
                "read_result",
                "output buffer missing",
            ));
        };
        let width = ELEMENT_BYTES as usize;
        let size = (self.out_rows * self.out_stride * width) as u64;
        let bytes = self.core.read_buffer(&resources.out, size)?;
        let bytes = strip_rows(
            &bytes,
            self.out_rows,
            self.out_cols * width,
            self.out_stride * width,
        );
        HostMatrix::new(
            self.out_rows,
            self.out_cols,
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
