//! Correctness and timing runs over a set of variants.

pub mod compare;
pub mod config;
pub mod correctness;
pub mod timing;

use std::sync::Arc;

use serde::Serialize;

use crate::backend::wgpu::context::GpuContext;
use crate::backend::wgpu::metrics::MetricsSnapshot;
use crate::backend::wgpu::params::ShapeDescriptor;
use crate::error::{AccelError, Result};
use crate::matrix::{ElementType, HostMatrix};
use crate::ops::{ComputeOp, VariantOp};
use crate::variant::{KernelKind, VariantSpec};

pub use compare::{compare, ensure_matches, Comparison};
pub use config::{BenchmarkConfig, ChecksConfig, SizeConfig, TimingConfig, Tolerance};
pub use correctness::{CorrectnessHarness, CorrectnessReport, VariantOutcome};
pub use timing::{TimingHarness, TimingReport, TimingStats, VariantTiming};

/// Uniform shape for `kind` applied to `a` and `b`.
pub fn shape_for(kind: KernelKind, a: &HostMatrix, b: &HostMatrix) -> Result<ShapeDescriptor> {
    let dim = |v: usize| {
        u32::try_from(v)
            .map_err(|_| AccelError::config(format!("dimension {v} does not fit in u32")))
    };
    match kind {
        KernelKind::Matmul => {
            if a.cols != b.rows {
                return Err(AccelError::config(format!(
                    "matmul operands {}x{} and {}x{} do not chain",
                    a.rows, a.cols, b.rows, b.cols
                )));
            }
            Ok(ShapeDescriptor::matmul(dim(a.rows)?, dim(a.cols)?, dim(b.cols)?))
        }
        KernelKind::Add => {
            if (a.rows, a.cols) != (b.rows, b.cols) {
                return Err(AccelError::config(format!(
                    "add operands {}x{} and {}x{} differ",
                    a.rows, a.cols, b.rows, b.cols
                )));
            }
            Ok(ShapeDescriptor::elementwise(dim(a.rows)?, dim(a.cols)?))
        }
    }
}

/// Sequential-valued operands of `element` for one problem size.
pub fn benchmark_inputs(
    kind: KernelKind,
    element: ElementType,
    size: SizeConfig,
) -> (HostMatrix, HostMatrix) {
    let SizeConfig { m, k, n } = size;
    let (m, k, n) = (m as usize, k as usize, n as usize);
    match kind {
        KernelKind::Matmul => (
            HostMatrix::sequential(element, m, k),
            HostMatrix::sequential(element, k, n),
        ),
        KernelKind::Add => (
            HostMatrix::sequential(element, m, n),
            HostMatrix::sequential(element, m, n),
        ),
    }
}

/// Construct, dispatch once, read back and release.
pub fn run_variant(
    ctx: &Arc<GpuContext>,
    spec: &VariantSpec,
    a: &HostMatrix,
    b: &HostMatrix,
) -> Result<HostMatrix> {
    let shape = shape_for(spec.kind, a, b)?;
    let mut op = VariantOp::construct(ctx, spec, &[a.clone(), b.clone()], shape)?;
    let result = op.dispatch().and_then(|_| op.read_result());
    let released = op.release();
    let output = result?;
    released?;
    Ok(output)
}

/// Results for one entry of `BenchmarkConfig::sizes`.
#[derive(Debug, Clone, Serialize)]
pub struct SizeRun {
    pub size: SizeConfig,
    pub correctness: Option<CorrectnessReport>,
    pub timing: Option<TimingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_skipped: Option<String>,
}

impl SizeRun {
    pub fn error_count(&self) -> usize {
        self.correctness.as_ref().map(|c| c.error_count).unwrap_or(0)
            + self.timing.as_ref().map(|t| t.error_count()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub adapter: String,
    pub backend: String,
    pub config: BenchmarkConfig,
    pub runs: Vec<SizeRun>,
    pub metrics: MetricsSnapshot,
}

impl BenchmarkReport {
    pub fn error_count(&self) -> usize {
        self.runs.iter().map(SizeRun::error_count).sum()
    }
}

/// Correctness then timing for every configured size, as enabled by
/// `config.checks` and `config.timing`.
pub fn run_benchmark(ctx: &Arc<GpuContext>, config: &BenchmarkConfig) -> Result<BenchmarkReport> {
    config.validate()?;
    let runs = config
        .sizes
        .iter()
        .map(|&size| run_size(ctx, config, size))
        .collect::<Result<Vec<_>>>()?;
    Ok(BenchmarkReport {
        adapter: ctx.adapter_info().name.clone(),
        backend: format!("{:?}", ctx.adapter_info().backend),
        config: config.clone(),
        runs,
        metrics: ctx.metrics().snapshot(),
    })
}

fn run_size(ctx: &Arc<GpuContext>, config: &BenchmarkConfig, size: SizeConfig) -> Result<SizeRun> {
    let _span = tracing::info_span!("size", m = size.m, k = size.k, n = size.n).entered();
    let (a, b) = benchmark_inputs(config.kind(), config.element, size);
    let correctness = if config.checks.correctness {
        Some(CorrectnessHarness::new(ctx, config).run(&a, &b)?)
    } else {
        None
    };
    let errors = correctness.as_ref().map(|c| c.error_count).unwrap_or(0);
    let mut timing_skipped = None;
    let timing = if !config.timing.enabled {
        timing_skipped = Some("timing disabled".to_string());
        None
    } else if errors > 0 && config.checks.stop_timing_on_error {
        log::warn!("skipping timing: correctness run recorded {} error(s)", errors);
        timing_skipped = Some(format!("correctness run recorded {errors} error(s)"));
        None
    } else {
        Some(TimingHarness::new(ctx, config).run(&a, &b)?)
    };
    Ok(SizeRun {
        size,
        correctness,
        timing,
        timing_skipped,
    })
}
