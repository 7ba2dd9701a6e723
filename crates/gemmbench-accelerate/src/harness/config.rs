//! Benchmark configuration.
//!
//! Replaces hard-wired run toggles: which checks run, which variants are
//! compared, how long timing runs, and how the device is opened.

use serde::{Deserialize, Serialize};

use crate::backend::wgpu::context::DeviceOptions;
use crate::error::{AccelError, Result};
use crate::matrix::ElementType;
use crate::variant::{default_candidates, default_reference, KernelKind, VariantSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Problem sizes, run in order. Each entry is a square size or an `{m, k, n}` table.
    #[serde(default = "default_sizes")]
    pub sizes: Vec<SizeConfig>,
    /// Element type of both operands
    #[serde(default)]
    pub element: ElementType,
    /// Ground-truth variant
    #[serde(default = "default_reference")]
    pub reference: VariantSpec,
    /// Variants compared against the reference and timed
    #[serde(default = "default_candidates")]
    pub candidates: Vec<VariantSpec>,
    /// Which checks run
    #[serde(default)]
    pub checks: ChecksConfig,
    /// Timing parameters
    #[serde(default)]
    pub timing: TimingConfig,
    /// Floating point comparison tolerance
    #[serde(default)]
    pub tolerance: Tolerance,
    /// Adapter and device options
    #[serde(default)]
    pub device: DeviceOptions,
}

/// `A` is `m x k`, `B` is `k x n`. Add uses `m x n` for both operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SizeEntry")]
pub struct SizeConfig {
    pub m: u32,
    pub k: u32,
    pub n: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeEntry {
    Square(u32),
    Dims {
        #[serde(default = "default_dim")]
        m: u32,
        #[serde(default = "default_dim")]
        k: u32,
        #[serde(default = "default_dim")]
        n: u32,
    },
}

impl From<SizeEntry> for SizeConfig {
    fn from(entry: SizeEntry) -> Self {
        match entry {
            SizeEntry::Square(size) => SizeConfig::square(size),
            SizeEntry::Dims { m, k, n } => SizeConfig { m, k, n },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Compare every candidate against the reference
    #[serde(default = "default_true")]
    pub correctness: bool,
    /// Also compare the reference against a host-computed result
    #[serde(default)]
    pub host_reference: bool,
    /// Skip timing when the correctness run recorded errors
    #[serde(default = "default_true")]
    pub stop_timing_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Timed dispatches per variant, after one warm-up
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
}

/// `|expected - actual| <= absolute + relative * |expected|`. Integers compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    #[serde(default = "default_relative")]
    pub relative: f64,
    #[serde(default = "default_absolute")]
    pub absolute: f64,
}

fn default_true() -> bool {
    true
}

fn default_dim() -> u32 {
    256
}

fn default_sizes() -> Vec<SizeConfig> {
    [256, 384, 512, 768, 1024, 2048, 4096]
        .into_iter()
        .map(SizeConfig::square)
        .collect()
}

fn default_repetitions() -> u32 {
    50
}

fn default_relative() -> f64 {
    1e-3
}

fn default_absolute() -> f64 {
    1e-3
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            sizes: default_sizes(),
            element: ElementType::default(),
            reference: default_reference(),
            candidates: default_candidates(),
            checks: ChecksConfig::default(),
            timing: TimingConfig::default(),
            tolerance: Tolerance::default(),
            device: DeviceOptions::default(),
        }
    }
}

impl SizeConfig {
    pub fn square(size: u32) -> Self {
        Self {
            m: size,
            k: size,
            n: size,
        }
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            correctness: true,
            host_reference: false,
            stop_timing_on_error: true,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repetitions: default_repetitions(),
        }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            relative: default_relative(),
            absolute: default_absolute(),
        }
    }
}

impl BenchmarkConfig {
    pub fn kind(&self) -> KernelKind {
        self.reference.kind
    }

    pub fn validate(&self) -> Result<()> {
        if self.sizes.is_empty() {
            return Err(AccelError::config("sizes must list at least one problem size"));
        }
        if let Some(SizeConfig { m, k, n }) =
            self.sizes.iter().copied().find(|s| s.m == 0 || s.k == 0 || s.n == 0)
        {
            return Err(AccelError::config(format!(
                "sizes must be non-zero (m={m}, k={k}, n={n})"
            )));
        }
        if self.timing.enabled && self.timing.repetitions == 0 {
            return Err(AccelError::config("timing.repetitions must be at least 1"));
        }
        if !(self.tolerance.relative >= 0.0 && self.tolerance.absolute >= 0.0) {
            return Err(AccelError::config("tolerance values must be non-negative"));
        }
        if let Some(spec) = self.candidates.iter().find(|c| c.kind != self.reference.kind) {
            return Err(AccelError::config(format!(
                "candidate '{}' is a {:?} kernel but the reference is {:?}",
                spec.label(),
                spec.kind,
                self.reference.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::Encoding;

    #[test]
    fn defaults_are_valid() {
        let config = BenchmarkConfig::default();
        config.validate().unwrap();
        let squares: Vec<u32> = config.sizes.iter().map(|s| s.m).collect();
        assert_eq!(squares, [256, 384, 512, 768, 1024, 2048, 4096]);
        assert!(config.sizes.iter().all(|s| s.m == s.k && s.k == s.n));
        assert_eq!(config.timing.repetitions, 50);
        assert!(config.checks.correctness);
        assert_eq!(config.reference.encoding, Encoding::Buffer);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: BenchmarkConfig = serde_yaml::from_str(
            r#"
sizes:
  - m: 17
  - 64
element: u32
timing:
  repetitions: 5
"#,
        )
        .unwrap();
        assert_eq!(
            config.sizes,
            [SizeConfig { m: 17, k: 256, n: 256 }, SizeConfig::square(64)]
        );
        assert_eq!(config.element, ElementType::U32);
        assert_eq!(config.timing.repetitions, 5);
        assert!(config.timing.enabled);
        assert_eq!(config.candidates, default_candidates());
    }

    #[test]
    fn rejects_zero_sizes_and_mixed_kinds() {
        let mut config = BenchmarkConfig::default();
        config.sizes.push(SizeConfig { m: 8, k: 0, n: 8 });
        assert_eq!(config.validate().unwrap_err().kind(), "config");

        let mut config = BenchmarkConfig::default();
        config.sizes.clear();
        assert_eq!(config.validate().unwrap_err().kind(), "config");

        let mut config = BenchmarkConfig::default();
        config.candidates.push(VariantSpec::add(Encoding::TextureSingleChannel, 8));
        assert!(config.validate().is_err());

        let mut config = BenchmarkConfig::default();
        config.tolerance.relative = -1.0;
        assert!(config.validate().is_err());
    }
}
