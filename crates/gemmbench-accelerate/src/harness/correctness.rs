//! Runs every candidate on identical inputs and compares it with the reference.
//!
//! Candidate failures (construction, dispatch, readback or divergence) are
//! recorded and counted; the run continues with the next candidate. Only a
//! failing reference aborts the run.

use std::sync::Arc;

use serde::Serialize;

use crate::backend::wgpu::context::GpuContext;
use crate::error::{AccelError, Result};
use crate::harness::compare::ensure_matches;
use crate::harness::config::BenchmarkConfig;
use crate::harness::run_variant;
use crate::matrix::{host_add, host_matmul, HostMatrix};
use crate::variant::KernelKind;

pub const HOST_REFERENCE_LABEL: &str = "host-reference";

#[derive(Debug, Clone, Serialize)]
pub struct VariantOutcome {
    pub label: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VariantOutcome {
    fn from_result(label: String, result: Result<()>) -> Self {
        match result {
            Ok(()) => {
                log::info!("{}: matches reference", label);
                Self {
                    label,
                    passed: true,
                    error_kind: None,
                    message: None,
                }
            }
            Err(err) => {
                log::error!("{}: {}", label, err);
                Self {
                    label,
                    passed: false,
                    error_kind: Some(err.kind().to_string()),
                    message: Some(err.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectnessReport {
    pub reference: String,
    pub error_count: usize,
    pub outcomes: Vec<VariantOutcome>,
}

impl CorrectnessReport {
    pub fn passed(&self) -> bool {
        self.error_count == 0
    }
}

pub struct CorrectnessHarness<'a> {
    ctx: &'a Arc<GpuContext>,
    config: &'a BenchmarkConfig,
}

fn host_result(kind: KernelKind, a: &HostMatrix, b: &HostMatrix) -> Result<HostMatrix> {
    match kind {
        KernelKind::Matmul => host_matmul(a, b),
        KernelKind::Add => host_add(a, b),
    }
}

impl<'a> CorrectnessHarness<'a> {
    pub fn new(ctx: &'a Arc<GpuContext>, config: &'a BenchmarkConfig) -> Self {
        Self { ctx, config }
    }

    pub fn run(&self, a: &HostMatrix, b: &HostMatrix) -> Result<CorrectnessReport> {
        let reference_label = self.config.reference.label();
        let _span =
            tracing::info_span!("correctness", reference = reference_label.as_str()).entered();
        let expected = run_variant(self.ctx, &self.config.reference, a, b).map_err(|err| {
            log::error!("reference '{}' failed: {}", reference_label, err);
            err
        })?;

        let mut outcomes = Vec::with_capacity(self.config.candidates.len() + 1);
        if self.config.checks.host_reference {
            let result = host_result(self.config.reference.kind, a, b).and_then(|host| {
                ensure_matches(&reference_label, &host, &expected, &self.config.tolerance)
            });
            outcomes.push(VariantOutcome::from_result(HOST_REFERENCE_LABEL.to_string(), result));
        }
        for spec in &self.config.candidates {
            let label = spec.label();
            let result = if spec.kind != self.config.reference.kind {
                Err(AccelError::config(format!(
                    "{label}: kernel kind differs from the reference"
                )))
            } else {
                run_variant(self.ctx, spec, a, b).and_then(|actual| {
                    ensure_matches(&label, &expected, &actual, &self.config.tolerance)
                })
            };
            outcomes.push(VariantOutcome::from_result(label, result));
        }
        let error_count = outcomes.iter().filter(|o| !o.passed).count();
        log::info!(
            "correctness: {} variant(s) checked, {} error(s)",
            outcomes.len(),
            error_count
        );
        Ok(CorrectnessReport {
            reference: reference_label,
            error_count,
            outcomes,
        })
    }
}
