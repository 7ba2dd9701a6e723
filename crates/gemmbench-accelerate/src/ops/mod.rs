//! Device operations: one kernel, its inputs and its output, built once and
//! dispatched any number of times.

pub mod buffer;
pub mod texture;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::backend::wgpu::context::GpuContext;
use crate::backend::wgpu::dispatch::common::{dispatch_grid, grid_is_flat, DispatchGrid};
use crate::backend::wgpu::fence::Fence;
use crate::backend::wgpu::kernel::KernelParams;
use crate::backend::wgpu::params::ShapeDescriptor;
use crate::backend::wgpu::pipelines::{create_pipeline, PipelineBundle};
use crate::backend::wgpu::readback;
use crate::error::{AccelError, Result};
use crate::matrix::{ElementType, HostMatrix};
use crate::variant::{KernelKind, VariantSpec};

pub use buffer::BufferOp;
pub use texture::{texture_roundtrip, TextureOp};

/// Lifecycle shared by every operation.
///
/// `read_result` needs a completed `dispatch`; after `release` every call
/// fails with [`AccelError::InvalidState`].
pub trait ComputeOp {
    fn label(&self) -> &str;
    fn dispatch(&mut self) -> Result<()>;
    fn dispatch_async(&mut self) -> BoxFuture<'_, Result<()>>;
    fn read_result(&mut self) -> Result<HostMatrix>;
    fn release(&mut self) -> Result<()>;
    fn is_released(&self) -> bool;
}

/// Closed set of operation families.
pub enum VariantOp {
    Buffer(BufferOp),
    Texture(TextureOp),
}

impl VariantOp {
    pub fn construct(
        ctx: &Arc<GpuContext>,
        spec: &VariantSpec,
        inputs: &[HostMatrix],
        shape: ShapeDescriptor,
    ) -> Result<Self> {
        if spec.encoding.is_texture() {
            TextureOp::new(ctx, spec, inputs, shape).map(VariantOp::Texture)
        } else {
            BufferOp::new(ctx, spec, inputs, shape).map(VariantOp::Buffer)
        }
    }

    fn inner(&self) -> &dyn ComputeOp {
        match self {
            VariantOp::Buffer(op) => op as &dyn ComputeOp,
            VariantOp::Texture(op) => op as &dyn ComputeOp,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ComputeOp {
        match self {
            VariantOp::Buffer(op) => op as &mut dyn ComputeOp,
            VariantOp::Texture(op) => op as &mut dyn ComputeOp,
        }
    }
}

impl ComputeOp for VariantOp {
    fn label(&self) -> &str {
        self.inner().label()
    }

    fn dispatch(&mut self) -> Result<()> {
        self.inner_mut().dispatch()
    }

    fn dispatch_async(&mut self) -> BoxFuture<'_, Result<()>> {
        self.inner_mut().dispatch_async()
    }

    fn read_result(&mut self) -> Result<HostMatrix> {
        self.inner_mut().read_result()
    }

    fn release(&mut self) -> Result<()> {
        self.inner_mut().release()
    }

    fn is_released(&self) -> bool {
        self.inner().is_released()
    }
}

/// Checks the two operands against the shape and returns their element type.
pub(crate) fn check_operands<'a>(
    spec: &VariantSpec,
    inputs: &'a [HostMatrix],
    shape: &ShapeDescriptor,
) -> Result<(&'a HostMatrix, &'a HostMatrix, ElementType)> {
    let label = spec.label();
    let [a, b] = inputs else {
        return Err(AccelError::config(format!(
            "{label}: expected 2 inputs, got {}",
            inputs.len()
        )));
    };
    if (a.rows, a.cols) != (shape.input_height as usize, shape.input_width as usize) {
        return Err(AccelError::config(format!(
            "{label}: input is {}x{} but the shape expects {}x{}",
            a.rows, a.cols, shape.input_height, shape.input_width
        )));
    }
    if (b.rows, b.cols) != (shape.filter_height as usize, shape.filter_width as usize) {
        return Err(AccelError::config(format!(
            "{label}: filter is {}x{} but the shape expects {}x{}",
            b.rows, b.cols, shape.filter_height, shape.filter_width
        )));
    }
    if spec.kind == KernelKind::Matmul && shape.input_width != shape.filter_height {
        return Err(AccelError::config(format!(
            "{label}: inner dimensions differ ({} vs {})",
            shape.input_width, shape.filter_height
        )));
    }
    if shape.output_width == 0 || shape.output_height == 0 {
        return Err(AccelError::config(format!("{label}: empty output")));
    }
    for (name, matrix) in [("input", a), ("filter", b)] {
        if let Err(AccelError::Config(message)) = matrix.validate() {
            return Err(AccelError::config(format!("{label}: {name}: {message}")));
        }
    }
    if a.element_type() != b.element_type() {
        return Err(AccelError::config(format!(
            "{label}: operands differ in element type ({} vs {})",
            a.element_type(),
            b.element_type()
        )));
    }
    Ok((a, b, a.element_type()))
}

/// Output extent along X (device columns) and Y (rows) covered by the grid.
pub(crate) fn grid_extent(spec: &VariantSpec, shape: &ShapeDescriptor) -> (u32, u32) {
    match spec.kind {
        // add runs one invocation per device element or texel
        KernelKind::Add => (
            shape
                .output_width
                .div_ceil(spec.encoding.values_per_element()),
            shape.output_height,
        ),
        KernelKind::Matmul => (shape.output_width, shape.output_height),
    }
}

/// Validated parameters, grid and compiled source for one variant.
pub(crate) struct PreparedKernel {
    pub params: KernelParams,
    pub grid: DispatchGrid,
    pub source: String,
}

pub(crate) fn prepare_kernel(
    ctx: &GpuContext,
    spec: &VariantSpec,
    element: ElementType,
    shape: &ShapeDescriptor,
) -> Result<PreparedKernel> {
    let (extent_x, extent_y) = grid_extent(spec, shape);
    let workgroup = (spec.tile_size, spec.tile_size);
    let flat = grid_is_flat(extent_y, workgroup.1, spec.work_per_thread.1);
    let params = KernelParams::new(spec, element, flat)?;
    params.check_limits(ctx.limits())?;
    let grid = dispatch_grid(extent_x, extent_y, params.workgroup(), params.work_per_thread());
    grid.check_limit(ctx.limits().max_compute_workgroups_per_dimension)?;
    let compiled = ctx.compile(&spec.label(), &params.render())?;
    Ok(PreparedKernel {
        params,
        grid,
        source: compiled.source,
    })
}

/// Pipeline, bindings and fence bookkeeping common to buffer and texture operations.
pub(crate) struct DispatchCore {
    ctx: Arc<GpuContext>,
    label: String,
    pipeline: PipelineBundle,
    bind_group: Option<wgpu::BindGroup>,
    grid: DispatchGrid,
    fence: Fence,
    last_dispatch: Option<u64>,
    released: bool,
}

impl DispatchCore {
    pub fn new(ctx: &Arc<GpuContext>, label: String, prepared: &PreparedKernel) -> Self {
        let pipeline = create_pipeline(
            ctx.device(),
            &label,
            &prepared.params.layout_entries(),
            &prepared.source,
        );
        Self {
            ctx: Arc::clone(ctx),
            label,
            pipeline,
            bind_group: None,
            grid: prepared.grid,
            fence: ctx.create_fence(),
            last_dispatch: None,
            released: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn grid(&self) -> DispatchGrid {
        self.grid
    }

    pub fn bind(&mut self, entries: &[wgpu::BindGroupEntry<'_>]) {
        self.bind_group = Some(self.ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}-bind-group", self.label)),
            layout: &self.pipeline.layout,
            entries,
        }));
    }

    /// Marks work submitted outside a dispatch (uploads) on this operation's fence.
    pub fn signal(&mut self) -> u64 {
        self.fence.signal()
    }

    pub fn read_buffer(&mut self, source: &wgpu::Buffer, size_bytes: u64) -> Result<Vec<u8>> {
        readback::read_buffer(&self.ctx, &mut self.fence, source, size_bytes, &self.label)
    }

    pub fn read_texture(&mut self, texture: &wgpu::Texture, bytes_per_row: u32) -> Result<Vec<u8>> {
        readback::read_texture(&self.ctx, &mut self.fence, texture, bytes_per_row, &self.label)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn ensure_live(&self, op: &str) -> Result<()> {
        if self.released {
            return Err(AccelError::invalid_state(
                op,
                format!("operation '{}' has been released", self.label),
            ));
        }
        Ok(())
    }

    pub fn ensure_dispatched(&self, op: &str) -> Result<()> {
        self.ensure_live(op)?;
        if self.last_dispatch.is_none() {
            return Err(AccelError::invalid_state(
                op,
                format!("operation '{}' has not been dispatched", self.label),
            ));
        }
        Ok(())
    }

    fn submit_dispatch(&mut self) -> Result<u64> {
        self.ensure_live("dispatch")?;
        let bind_group = self.bind_group.as_ref().ok_or_else(|| {
            AccelError::invalid_state(
                "dispatch",
                format!("operation '{}' has no bindings", self.label),
            )
        })?;
        let mut encoder = self.ctx.create_encoder(&format!("{}-encoder", self.label));
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("{}-pass", self.label)),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(self.grid.x, self.grid.y, 1);
        }
        self.ctx.submit(encoder);
        let value = self.fence.signal();
        self.last_dispatch = Some(value);
        Ok(value)
    }

    pub fn dispatch(&mut self) -> Result<()> {
        let _span = tracing::info_span!(
            "dispatch",
            label = self.label.as_str(),
            groups_x = self.grid.x,
            groups_y = self.grid.y
        )
        .entered();
        let value = self.submit_dispatch()?;
        self.fence.wait(value)
    }

    pub fn dispatch_async(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let value = self.submit_dispatch()?;
            self.fence.wait_async(value).await
        })
    }

    /// Waits for everything signalled on this operation, then drops the pipeline bindings.
    pub fn release(&mut self) -> Result<()> {
        self.ensure_live("release")?;
        let last = self.fence.issued();
        if last > 0 {
            self.fence.wait(last)?;
        }
        self.bind_group = None;
        self.released = true;
        log::debug!("released '{}'", self.label);
        Ok(())
    }
}
