//! Device resource manager: adapter/device setup, checked allocation and submission.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wgpu::util::DeviceExt;

use crate::backend::wgpu::compiler::{CompiledShader, NagaCompiler, ShaderCompiler};
use crate::backend::wgpu::config::required_row_pitch_alignment;
use crate::backend::wgpu::fence::Fence;
use crate::backend::wgpu::layout::validate_row_pitch_alignment;
use crate::backend::wgpu::metrics::GpuMetrics;
use crate::error::{AccelError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    None,
    LowPower,
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::None => wgpu::PowerPreference::None,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
    /// Row pitch for texture copies; must be a multiple of 256.
    pub row_pitch_alignment: u32,
    /// Upper bound for every fence wait. `None` waits for the device to go idle.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            row_pitch_alignment: required_row_pitch_alignment(),
            fence_timeout_ms: None,
        }
    }
}

impl DeviceOptions {
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

pub struct GpuContext {
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    row_pitch_alignment: u32,
    fence_timeout: Option<Duration>,
    compiler: Arc<dyn ShaderCompiler>,
    metrics: Arc<GpuMetrics>,
}

impl GpuContext {
    pub fn new(opts: &DeviceOptions) -> Result<Self> {
        pollster::block_on(Self::new_async(opts))
    }

    pub async fn new_async(opts: &DeviceOptions) -> Result<Self> {
        let row_pitch_alignment =
            validate_row_pitch_alignment(opts.row_pitch_alignment, required_row_pitch_alignment())?;
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: opts.power_preference.into(),
                force_fallback_adapter: opts.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| AccelError::Device("no compatible adapter found".to_string()))?;
        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gemmbench-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                },
                None,
            )
            .await?;
        install_device_error_handlers(&device);
        let limits = device.limits();
        log::info!(
            "wgpu adapter '{}' ({:?}) ready: max_invocations={} workgroup_storage={} row_pitch={}",
            adapter_info.name,
            adapter_info.backend,
            limits.max_compute_invocations_per_workgroup,
            limits.max_compute_workgroup_storage_size,
            row_pitch_alignment
        );
        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
            row_pitch_alignment,
            fence_timeout: opts.fence_timeout(),
            compiler: Arc::new(NagaCompiler::default()),
            metrics: Arc::new(GpuMetrics::new()),
        })
    }

    /// Replaces the shader front end used by every operation built on this context.
    pub fn with_compiler(mut self, compiler: Arc<dyn ShaderCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn metrics(&self) -> &GpuMetrics {
        &self.metrics
    }

    pub fn row_pitch_alignment(&self) -> u32 {
        self.row_pitch_alignment
    }

    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout
    }

    pub fn compile(&self, label: &str, source: &str) -> Result<CompiledShader> {
        self.compiler.compile(label, source, naga::ShaderStage::Compute)
    }

    pub fn create_fence(&self) -> Fence {
        Fence::new(
            Arc::clone(&self.device),
            Arc::clone(&self.queue),
            Arc::clone(&self.metrics),
            self.fence_timeout,
        )
    }

    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.metrics.inc_submission();
        self.queue.submit(Some(encoder.finish()))
    }

    fn check_buffer_size(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> Result<()> {
        if size == 0 {
            return Err(AccelError::allocation(label, "zero-sized buffer"));
        }
        if size > self.limits.max_buffer_size {
            return Err(AccelError::allocation(
                label,
                format!(
                    "requested {} bytes exceeds device max buffer size {}",
                    size, self.limits.max_buffer_size
                ),
            ));
        }
        if usage.contains(wgpu::BufferUsages::STORAGE)
            && size > self.limits.max_storage_buffer_binding_size as u64
        {
            return Err(AccelError::allocation(
                label,
                format!(
                    "requested {} bytes exceeds device max storage binding {}",
                    size, self.limits.max_storage_buffer_binding_size
                ),
            ));
        }
        if usage.contains(wgpu::BufferUsages::UNIFORM)
            && size > self.limits.max_uniform_buffer_binding_size as u64
        {
            return Err(AccelError::allocation(
                label,
                format!(
                    "requested {} bytes exceeds device max uniform binding {}",
                    size, self.limits.max_uniform_buffer_binding_size
                ),
            ));
        }
        Ok(())
    }

    pub fn allocate_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer> {
        self.check_buffer_size(label, size, usage)?;
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }))
    }

    /// Allocates a buffer holding `bytes`.
    pub fn allocate_buffer_init(
        &self,
        label: &str,
        bytes: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer> {
        self.check_buffer_size(label, bytes.len() as u64, usage)?;
        self.metrics.add_uploaded(bytes.len() as u64);
        Ok(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage,
        }))
    }

    pub fn allocate_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Result<wgpu::Texture> {
        let max = self.limits.max_texture_dimension_2d;
        if width == 0 || height == 0 {
            return Err(AccelError::allocation(
                label,
                format!("texture extent {width}x{height} must be non-zero"),
            ));
        }
        if width > max || height > max {
            return Err(AccelError::allocation(
                label,
                format!("texture extent {width}x{height} exceeds device max {max}"),
            ));
        }
        let allowed = self.adapter.get_texture_format_features(format).allowed_usages;
        if !allowed.contains(usage) {
            return Err(AccelError::allocation(
                label,
                format!("format {format:?} does not support usage {usage:?}"),
            ));
        }
        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        }))
    }
}

fn install_device_error_handlers(device: &wgpu::Device) {
    device.on_uncaptured_error(Box::new(|error| {
        log::error!("wgpu uncaptured error: {:?}", error);
    }));
    device.set_device_lost_callback(|reason, message| {
        log::error!("wgpu device lost: reason={:?}, message={}", reason, message);
    });
}
