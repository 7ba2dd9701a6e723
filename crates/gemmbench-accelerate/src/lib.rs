//! gemmbench accelerate: matrix multiply kernel variants on wgpu.
//!
//! - Device context, fences and readback live under [`backend::wgpu`].
//! - [`ops`] turns a [`VariantSpec`] plus inputs into a dispatchable operation over
//!   storage buffers or packed textures.
//! - [`harness`] checks every candidate against a reference variant and times it.

pub mod backend;
pub mod error;
pub mod harness;
pub mod matrix;
pub mod ops;
pub mod variant;

pub use backend::wgpu::context::{DeviceOptions, GpuContext, PowerPreference};
pub use backend::wgpu::fence::Fence;
pub use backend::wgpu::layout::TexelPacking;
pub use backend::wgpu::metrics::MetricsSnapshot;
pub use backend::wgpu::params::ShapeDescriptor;
pub use error::{AccelError, Result};
pub use harness::{run_benchmark, BenchmarkConfig, BenchmarkReport, SizeConfig, SizeRun};
pub use matrix::{host_add, host_matmul, ElementType, HostMatrix, MatrixData};
pub use ops::{ComputeOp, VariantOp};
pub use variant::{Encoding, KernelKind, VariantSpec};
