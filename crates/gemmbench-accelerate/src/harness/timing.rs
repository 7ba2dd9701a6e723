//! Wall-clock timing of candidate dispatches.
//!
//! Each variant gets one untimed dispatch + readback, then `repetitions`
//! dispatches timed from just before submission to observed fence completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

use crate::backend::wgpu::context::GpuContext;
use crate::error::Result;
use crate::harness::config::BenchmarkConfig;
use crate::harness::shape_for;
use crate::matrix::HostMatrix;
use crate::ops::{ComputeOp, VariantOp};
use crate::variant::{KernelKind, VariantSpec};

fn as_millis<S: Serializer>(
    value: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() * 1e3)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingStats {
    pub repetitions: usize,
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: Duration,
    #[serde(rename = "mean_ms", serialize_with = "as_millis")]
    pub mean: Duration,
    #[serde(rename = "min_ms", serialize_with = "as_millis")]
    pub min: Duration,
    #[serde(rename = "max_ms", serialize_with = "as_millis")]
    pub max: Duration,
    #[serde(rename = "median_ms", serialize_with = "as_millis")]
    pub median: Duration,
}

impl TimingStats {
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort();
        let total: Duration = sorted.iter().sum();
        let len = sorted.len();
        let median = if len % 2 == 1 {
            sorted[len / 2]
        } else {
            (sorted[len / 2 - 1] + sorted[len / 2]) / 2
        };
        Some(Self {
            repetitions: len,
            total,
            mean: total / len as u32,
            min: sorted[0],
            max: sorted[len - 1],
            median,
        })
    }

    /// Throughput for `flops` floating point operations per repetition.
    pub fn gflops(&self, flops: f64) -> f64 {
        let secs = self.mean.as_secs_f64();
        if secs > 0.0 {
            flops / secs / 1e9
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantTiming {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<TimingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gflops: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingReport {
    pub repetitions: u32,
    pub entries: Vec<VariantTiming>,
}

impl TimingReport {
    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_some()).count()
    }
}

pub struct TimingHarness<'a> {
    ctx: &'a Arc<GpuContext>,
    config: &'a BenchmarkConfig,
}

impl<'a> TimingHarness<'a> {
    pub fn new(ctx: &'a Arc<GpuContext>, config: &'a BenchmarkConfig) -> Self {
        Self { ctx, config }
    }

    fn time_variant(
        &self,
        spec: &VariantSpec,
        a: &HostMatrix,
        b: &HostMatrix,
    ) -> Result<Vec<Duration>> {
        let shape = shape_for(spec.kind, a, b)?;
        let mut op = VariantOp::construct(self.ctx, spec, &[a.clone(), b.clone()], shape)?;
        let samples = (|| -> Result<Vec<Duration>> {
            op.dispatch()?;
            op.read_result()?;
            let mut samples = Vec::with_capacity(self.config.timing.repetitions as usize);
            for _ in 0..self.config.timing.repetitions {
                let start = Instant::now();
                op.dispatch()?;
                samples.push(start.elapsed());
            }
            Ok(samples)
        })();
        let released = op.release();
        let samples = samples?;
        released?;
        Ok(samples)
    }

    pub fn run(&self, a: &HostMatrix, b: &HostMatrix) -> Result<TimingReport> {
        let _span =
            tracing::info_span!("timing", repetitions = self.config.timing.repetitions).entered();
        let flops = match self.config.kind() {
            KernelKind::Matmul => Some(2.0 * a.rows as f64 * b.cols as f64 * a.cols as f64),
            KernelKind::Add => None,
        };
        let mut entries = Vec::with_capacity(self.config.candidates.len());
        for spec in &self.config.candidates {
            let label = spec.label();
            let entry = match self.time_variant(spec, a, b) {
                Ok(samples) => {
                    let stats = TimingStats::from_samples(&samples);
                    let gflops = stats.zip(flops).map(|(s, f)| s.gflops(f));
                    if let Some(s) = &stats {
                        log::info!(
                            "{}: mean {:.3} ms, median {:.3} ms, min {:.3} ms{}",
                            label,
                            s.mean.as_secs_f64() * 1e3,
                            s.median.as_secs_f64() * 1e3,
                            s.min.as_secs_f64() * 1e3,
                            gflops.map(|g| format!(" ({g:.2} GFLOP/s)")).unwrap_or_default()
                        );
                    }
                    VariantTiming {
                        label,
                        stats,
                        gflops,
                        error: None,
                    }
                }
                Err(err) => {
                    log::error!("{}: timing failed: {}", label, err);
                    VariantTiming {
                        label,
                        stats: None,
                        gflops: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            entries.push(entry);
        }
        Ok(TimingReport {
            repetitions: self.config.timing.repetitions,
            entries,
        })
    }
}
