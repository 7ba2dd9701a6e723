//! gemmbench: correctness and timing runs for matmul kernel variants on wgpu.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gemmbench_accelerate::harness::run_benchmark;
use gemmbench_accelerate::ops::texture_roundtrip;
use gemmbench_accelerate::{ElementType, GpuContext, HostMatrix, TexelPacking};
use gemmbench_logging::{init_logging, LoggingOptions};
use log::{debug, error, info};
use serde::Serialize;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
use config::{ConfigLoader, GemmbenchConfig, LogLevel};

#[derive(Parser)]
#[command(
    name = "gemmbench",
    version = env!("CARGO_PKG_VERSION"),
    about = "Correctness checks and timings for GPU matrix multiply variants",
    long_about = r#"
Runs a reference matmul kernel and a set of candidate variants (storage buffers,
vec4 buffers, packed textures) on identical inputs, compares every candidate with
the reference and times it.

Configuration is read from .gemmbench.toml / .yaml / .json (or GEMMBENCH_CONFIG),
then GEMMBENCH_* environment variables, then command-line flags.

Environment:
  RUST_LOG / GEMMBENCH_LOG      log filter (default: info)
  GEMMBENCH_SIZE=<n>[,<n>...]   square problem sizes to sweep
  GEMMBENCH_ELEMENT=f32|u32     element type
  GEMMBENCH_REPETITIONS=<n>     timed dispatches per variant
  GEMMBENCH_FENCE_TIMEOUT_MS    bound every fence wait
"#
)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Set log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare every candidate against the reference
    Check(RunArgs),
    /// Correctness check followed by timing
    Bench(RunArgs),
    /// Print adapter information and limits, then round-trip a matrix through
    /// both texture packings
    Probe {
        /// Force the fallback (software) adapter
        #[arg(long)]
        fallback_adapter: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        config_command: ConfigCommand,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = ".gemmbench.yaml")]
        output: PathBuf,
    },
    /// Show configuration file locations
    Paths,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Square problem size; repeat or comma-separate to sweep several
    #[arg(short, long, value_delimiter = ',')]
    size: Vec<u32>,
    /// Pin M on every size in the sweep
    #[arg(long)]
    m: Option<u32>,
    #[arg(long)]
    k: Option<u32>,
    #[arg(long)]
    n: Option<u32>,
    /// Element type (f32 or u32)
    #[arg(long, value_parser = parse_element_arg)]
    element: Option<ElementType>,
    /// Also check the reference against a host-computed result
    #[arg(long)]
    host_reference: bool,
    /// Timed dispatches per variant
    #[arg(short, long)]
    repetitions: Option<u32>,
    /// Time every variant even when the correctness run recorded errors
    #[arg(long)]
    keep_timing_on_error: bool,
    /// Force the fallback (software) adapter
    #[arg(long)]
    fallback_adapter: bool,
    /// Bound every fence wait (milliseconds)
    #[arg(long)]
    fence_timeout_ms: Option<u64>,
    /// Write the JSON report to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Single-line JSON
    #[arg(long)]
    compact: bool,
}

fn parse_element_arg(s: &str) -> Result<ElementType, String> {
    config::parse_element(s)
        .ok_or_else(|| format!("Invalid element type '{s}'. Expected: f32, u32"))
}

fn apply_cli_overrides(config: &mut GemmbenchConfig, cli: &Cli) {
    if cli.debug {
        config.logging.debug = true;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = Some(level);
    }
    let args = match &cli.command {
        Commands::Check(args) | Commands::Bench(args) => args,
        Commands::Probe { fallback_adapter } => {
            if *fallback_adapter {
                config.benchmark.device.force_fallback_adapter = true;
            }
            return;
        }
        Commands::Config { .. } => return,
    };
    let bench = &mut config.benchmark;
    config::override_sizes(&mut bench.sizes, &args.size, args.m, args.k, args.n);
    if let Some(element) = args.element {
        bench.element = element;
    }
    if args.host_reference {
        bench.checks.host_reference = true;
    }
    if let Some(reps) = args.repetitions {
        bench.timing.repetitions = reps;
    }
    if args.keep_timing_on_error {
        bench.checks.stop_timing_on_error = false;
    }
    if args.fallback_adapter {
        bench.device.force_fallback_adapter = true;
    }
    if let Some(ms) = args.fence_timeout_ms {
        bench.device.fence_timeout_ms = Some(ms);
    }
    if let Some(output) = &args.output {
        config.report.output = Some(output.clone());
    }
    if args.compact {
        config.report.compact = true;
    }
    match cli.command {
        Commands::Check(_) => {
            config.benchmark.checks.correctness = true;
            config.benchmark.timing.enabled = false;
        }
        Commands::Bench(_) => config.benchmark.timing.enabled = true,
        _ => {}
    }
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>, compact: bool) -> Result<()> {
    let mut text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    text.push('\n');
    match output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => io::stdout().write_all(text.as_bytes())?,
    }
    Ok(())
}

fn open_context(config: &GemmbenchConfig) -> Result<Arc<GpuContext>> {
    let ctx = GpuContext::new(&config.benchmark.device).context("Failed to open a wgpu device")?;
    Ok(Arc::new(ctx))
}

fn run_harness(config: &GemmbenchConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let report = run_benchmark(&ctx, &config.benchmark).context("Benchmark run failed")?;
    write_json(&report, config.report.output.as_deref(), config.report.compact)?;
    let errors = report.error_count();
    if errors > 0 {
        anyhow::bail!("{errors} variant error(s) recorded");
    }
    Ok(())
}

#[derive(Serialize)]
struct ProbeReport {
    adapter: String,
    backend: String,
    device_type: String,
    driver: String,
    driver_info: String,
    row_pitch_alignment: u32,
    max_compute_workgroup_size_x: u32,
    max_compute_workgroup_size_y: u32,
    max_compute_invocations_per_workgroup: u32,
    max_compute_workgroup_storage_size: u32,
    max_compute_workgroups_per_dimension: u32,
    max_storage_buffer_binding_size: u32,
    max_buffer_size: u64,
    max_texture_dimension_2d: u32,
    roundtrip: Vec<RoundtripCheck>,
}

/// Row and texel padding check for one element type and packing.
#[derive(Serialize)]
struct RoundtripCheck {
    element: ElementType,
    packing: String,
    rows: usize,
    cols: usize,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// 17x5 keeps rows off the copy pitch and leaves a partly filled last texel.
const ROUNDTRIP_ROWS: usize = 17;
const ROUNDTRIP_COLS: usize = 5;

impl RoundtripCheck {
    fn new(
        element: ElementType,
        packing: TexelPacking,
        input: &HostMatrix,
        result: gemmbench_accelerate::Result<HostMatrix>,
    ) -> Self {
        let error = match result {
            Ok(output) if &output == input => None,
            Ok(_) => Some("texture contents changed across upload and readback".to_string()),
            Err(err) => Some(err.to_string()),
        };
        Self {
            element,
            packing: format!("{packing:?}"),
            rows: input.rows,
            cols: input.cols,
            passed: error.is_none(),
            error,
        }
    }
}

fn roundtrip_checks(ctx: &GpuContext) -> Vec<RoundtripCheck> {
    let mut checks = Vec::new();
    for element in [ElementType::F32, ElementType::U32] {
        let input = HostMatrix::sequential(element, ROUNDTRIP_ROWS, ROUNDTRIP_COLS);
        for packing in [TexelPacking::SingleChannel, TexelPacking::FourChannel] {
            let result = texture_roundtrip(ctx, &input, packing);
            let check = RoundtripCheck::new(element, packing, &input, result);
            match &check.error {
                None => info!("texture roundtrip {element} {packing:?}: ok"),
                Some(err) => error!("texture roundtrip {element} {packing:?}: {err}"),
            }
            checks.push(check);
        }
    }
    checks
}

fn probe(config: &GemmbenchConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let info = ctx.adapter_info();
    let limits = ctx.limits();
    let report = ProbeReport {
        adapter: info.name.clone(),
        backend: format!("{:?}", info.backend),
        device_type: format!("{:?}", info.device_type),
        driver: info.driver.clone(),
        driver_info: info.driver_info.clone(),
        row_pitch_alignment: ctx.row_pitch_alignment(),
        max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
        max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
        max_compute_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
        max_compute_workgroup_storage_size: limits.max_compute_workgroup_storage_size,
        max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
        max_buffer_size: limits.max_buffer_size,
        max_texture_dimension_2d: limits.max_texture_dimension_2d,
        roundtrip: roundtrip_checks(&ctx),
    };
    write_json(&report, None, false)?;
    let failed = report.roundtrip.iter().filter(|c| !c.passed).count();
    if failed > 0 {
        anyhow::bail!("{failed} texture roundtrip check(s) failed");
    }
    Ok(())
}

fn handle_config_command(command: &ConfigCommand, config: &GemmbenchConfig) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
            print!("{yaml}");
        }
        ConfigCommand::Generate { output } => {
            ConfigLoader::save_to_file(&GemmbenchConfig::default(), output)?;
            println!("Sample configuration written to {}", output.display());
        }
        ConfigCommand::Paths => {
            for path in ConfigLoader::find_config_files() {
                let marker = if path.is_file() { "found" } else { "-" };
                println!("{marker:>6}  {}", path.display());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);

    let _logging = init_logging(LoggingOptions {
        console: true,
        filter: config.logging.directive().map(str::to_string),
        ansi: io::stderr().is_terminal(),
    });
    info!("gemmbench v{} starting", env!("CARGO_PKG_VERSION"));
    debug!("Configuration loaded: {config:?}");

    match &cli.command {
        Commands::Check(_) | Commands::Bench(_) => run_harness(&config),
        Commands::Probe { .. } => probe(&config),
        Commands::Config { config_command } => handle_config_command(config_command, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmbench_accelerate::harness::SizeConfig;

    #[test]
    fn check_disables_timing_and_applies_sizes() {
        let cli = Cli::parse_from([
            "gemmbench", "check", "--size", "17", "--n", "5", "--element", "u32",
        ]);
        let mut config = GemmbenchConfig::default();
        apply_cli_overrides(&mut config, &cli);
        let bench = &config.benchmark;
        assert_eq!(bench.sizes, [SizeConfig { m: 17, k: 17, n: 5 }]);
        assert_eq!(bench.element, ElementType::U32);
        assert!(!bench.timing.enabled);
        assert!(bench.checks.correctness);
    }

    #[test]
    fn bench_flags_override_config() {
        let cli = Cli::parse_from([
            "gemmbench",
            "--debug",
            "bench",
            "-r",
            "3",
            "--keep-timing-on-error",
            "--fence-timeout-ms",
            "500",
            "-o",
            "report.json",
        ]);
        let mut config = GemmbenchConfig::default();
        config.benchmark.timing.enabled = false;
        apply_cli_overrides(&mut config, &cli);
        assert!(config.benchmark.timing.enabled);
        assert_eq!(config.benchmark.timing.repetitions, 3);
        assert!(!config.benchmark.checks.stop_timing_on_error);
        assert_eq!(config.benchmark.device.fence_timeout_ms, Some(500));
        assert_eq!(config.report.output, Some(PathBuf::from("report.json")));
        assert_eq!(config.logging.directive(), Some("debug"));
    }

    #[test]
    fn repeated_and_listed_sizes_form_the_sweep() {
        let cli = Cli::parse_from(["gemmbench", "bench", "-s", "256,512", "--size", "1024"]);
        let mut config = GemmbenchConfig::default();
        apply_cli_overrides(&mut config, &cli);
        let squares: Vec<u32> = config.benchmark.sizes.iter().map(|s| s.k).collect();
        assert_eq!(squares, [256, 512, 1024]);

        // no --size keeps the configured sweep
        let cli = Cli::parse_from(["gemmbench", "bench"]);
        let mut config = GemmbenchConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.benchmark.sizes, GemmbenchConfig::default().benchmark.sizes);
    }

    #[test]
    fn roundtrip_check_flags_changed_contents() {
        let input = HostMatrix::sequential(ElementType::U32, ROUNDTRIP_ROWS, ROUNDTRIP_COLS);
        let same = RoundtripCheck::new(
            ElementType::U32,
            TexelPacking::FourChannel,
            &input,
            Ok(input.clone()),
        );
        assert!(same.passed);
        assert!(same.error.is_none());

        let mut shifted = input.clone();
        if let gemmbench_accelerate::MatrixData::U32(values) = &mut shifted.data {
            values.rotate_left(1);
        }
        let changed =
            RoundtripCheck::new(ElementType::U32, TexelPacking::SingleChannel, &input, Ok(shifted));
        assert!(!changed.passed);

        let failed = RoundtripCheck::new(
            ElementType::F32,
            TexelPacking::SingleChannel,
            &input,
            Err(gemmbench_accelerate::AccelError::Device("lost".into())),
        );
        assert!(!failed.passed);
        assert!(failed.error.unwrap().contains("lost"));
        assert_eq!((failed.rows, failed.cols), (17, 5));
    }

    #[test]
    fn rejects_unknown_element() {
        assert!(Cli::try_parse_from(["gemmbench", "check", "--element", "f16"]).is_err());
    }
}
