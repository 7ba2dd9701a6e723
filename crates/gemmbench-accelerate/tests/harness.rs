use std::sync::{Arc, Mutex};

use gemmbench_accelerate::harness::{
    run_benchmark, BenchmarkConfig, ChecksConfig, SizeConfig, TimingConfig,
};
use gemmbench_accelerate::{DeviceOptions, ElementType, Encoding, GpuContext, VariantSpec};
use once_cell::sync::Lazy;

static TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn context() -> Option<Arc<GpuContext>> {
    match GpuContext::new(&DeviceOptions::default()) {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(err) => {
            eprintln!("skipping: {err}");
            None
        }
    }
}

fn small_config() -> BenchmarkConfig {
    BenchmarkConfig {
        sizes: vec![SizeConfig::square(32)],
        checks: ChecksConfig {
            host_reference: true,
            ..ChecksConfig::default()
        },
        timing: TimingConfig {
            enabled: true,
            repetitions: 3,
        },
        ..BenchmarkConfig::default()
    }
}

#[test]
fn default_candidates_pass_and_are_timed() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let config = small_config();
    let report = run_benchmark(&ctx, &config).unwrap();
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.runs.len(), 1);
    let run = &report.runs[0];
    let correctness = run.correctness.as_ref().unwrap();
    // host reference plus every candidate
    assert_eq!(correctness.outcomes.len(), config.candidates.len() + 1);
    let timing = run.timing.as_ref().unwrap();
    assert_eq!(timing.entries.len(), config.candidates.len());
    for entry in &timing.entries {
        let stats = entry.stats.unwrap();
        assert_eq!(stats.repetitions, 3);
        assert!(stats.min <= stats.median && stats.median <= stats.max);
        assert!(entry.gflops.is_some());
    }
    assert!(report.metrics.submissions > 0);
    serde_json::to_string(&report).unwrap();
}

#[test]
fn default_variants_agree_at_256() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    for element in [ElementType::F32, ElementType::U32] {
        let config = BenchmarkConfig {
            sizes: vec![SizeConfig::square(256)],
            element,
            timing: TimingConfig {
                enabled: false,
                ..TimingConfig::default()
            },
            ..BenchmarkConfig::default()
        };
        let report = run_benchmark(&ctx, &config).unwrap();
        assert_eq!(report.error_count(), 0, "{element}");
        let correctness = report.runs[0].correctness.as_ref().unwrap();
        assert_eq!(correctness.outcomes.len(), config.candidates.len());
        for (outcome, spec) in correctness.outcomes.iter().zip(&config.candidates) {
            assert_eq!(outcome.label, spec.label());
            assert!(outcome.passed, "{}: {:?}", outcome.label, outcome.message);
        }
    }
}

#[test]
fn every_size_in_the_sweep_is_reported() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let mut config = small_config();
    config.sizes = vec![SizeConfig::square(16), SizeConfig { m: 24, k: 8, n: 40 }];
    config.candidates.truncate(2);
    let report = run_benchmark(&ctx, &config).unwrap();
    assert_eq!(report.error_count(), 0);
    let sizes: Vec<SizeConfig> = report.runs.iter().map(|run| run.size).collect();
    assert_eq!(sizes, config.sizes);
    for run in &report.runs {
        assert_eq!(run.timing.as_ref().unwrap().entries.len(), 2);
    }
}

#[test]
fn failing_candidate_is_counted_and_run_continues() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let mut config = small_config();
    config.candidates = vec![
        VariantSpec::matmul(Encoding::Vec4Buffer, 8, (3, 3)),
        VariantSpec::matmul(Encoding::PackedBuffer, 8, (4, 4)),
    ];
    let report = run_benchmark(&ctx, &config).unwrap();
    let run = &report.runs[0];
    let correctness = run.correctness.as_ref().unwrap();
    assert_eq!(correctness.error_count, 1);
    let failed = &correctness.outcomes[1];
    assert!(!failed.passed);
    assert_eq!(failed.error_kind.as_deref(), Some("config"));
    assert!(correctness.outcomes[2].passed);
    assert!(run.timing.is_none());
    assert!(run.timing_skipped.is_some());
}
