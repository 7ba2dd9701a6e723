//! Configuration for the gemmbench binary
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. Configuration file (.gemmbench.toml, .gemmbench.yaml, .gemmbench.json, ...)
//! 3. Environment variables (`GEMMBENCH_*`)
//! 4. Command-line flags, applied by `main`

use anyhow::{Context, Result};
use clap::ValueEnum;
use gemmbench_accelerate::harness::{BenchmarkConfig, SizeConfig};
use gemmbench_accelerate::{ElementType, PowerPreference};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "GEMMBENCH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GemmbenchConfig {
    /// Problem sizes, variants, checks, timing and device options
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Report output
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level; `RUST_LOG` / `GEMMBENCH_LOG` apply when unset
    #[serde(default)]
    pub level: Option<LogLevel>,
    /// Shorthand for `level = "debug"`
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Write the JSON report here instead of stdout
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Compact single-line JSON
    #[serde(default)]
    pub compact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl LoggingConfig {
    /// Filter directive for the subscriber, if the configuration pins one.
    pub fn directive(&self) -> Option<&'static str> {
        if self.debug {
            return Some(LogLevel::Debug.as_directive());
        }
        self.level.map(LogLevel::as_directive)
    }
}

/// Configuration loader with multiple source support
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the first config file found (or `explicit`), then the environment.
    pub fn load(explicit: Option<&Path>) -> Result<GemmbenchConfig> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(path)?
            }
            None => Self::load_from_files()?,
        };
        Self::apply_environment_variables(&mut config)?;
        Ok(config)
    }

    fn load_from_files() -> Result<GemmbenchConfig> {
        for path in Self::find_config_files() {
            if path.is_file() {
                info!("Loading configuration from: {}", path.display());
                return Self::load_from_file(&path);
            }
        }
        debug!("No configuration file found, using defaults");
        Ok(GemmbenchConfig::default())
    }

    /// Candidate configuration paths in order of preference.
    pub fn find_config_files() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(config_path) = env::var(CONFIG_ENV) {
            if !config_path.trim().is_empty() {
                paths.push(PathBuf::from(config_path));
            }
        }

        let names = [
            ".gemmbench.toml",
            ".gemmbench.yaml",
            ".gemmbench.yml",
            ".gemmbench.json",
            "gemmbench.config.toml",
            "gemmbench.config.yaml",
            "gemmbench.config.json",
        ];
        if let Ok(current_dir) = env::current_dir() {
            paths.extend(names.iter().map(|name| current_dir.join(name)));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".gemmbench.toml"));
            paths.push(home_dir.join(".gemmbench.yaml"));
            paths.push(home_dir.join(".config/gemmbench/config.toml"));
            paths.push(home_dir.join(".config/gemmbench/config.yaml"));
        }

        paths
    }

    pub fn load_from_file(path: &Path) -> Result<GemmbenchConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            _ => {
                if let Ok(config) = toml::from_str(&content) {
                    config
                } else if let Ok(config) = serde_yaml::from_str(&content) {
                    config
                } else if let Ok(config) = serde_json::from_str(&content) {
                    config
                } else {
                    return Err(anyhow::anyhow!(
                        "Could not parse config file {} (tried TOML, YAML, JSON)",
                        path.display()
                    ));
                }
            }
        };

        Ok(config)
    }

    fn apply_environment_variables(config: &mut GemmbenchConfig) -> Result<()> {
        let bench = &mut config.benchmark;

        let squares = match env::var("GEMMBENCH_SIZE") {
            Ok(value) => parse_size_list(&value)
                .with_context(|| format!("GEMMBENCH_SIZE: invalid size list '{value}'"))?,
            Err(_) => Vec::new(),
        };
        override_sizes(
            &mut bench.sizes,
            &squares,
            env_parse::<u32>("GEMMBENCH_M")?,
            env_parse::<u32>("GEMMBENCH_K")?,
            env_parse::<u32>("GEMMBENCH_N")?,
        );
        if let Ok(element) = env::var("GEMMBENCH_ELEMENT") {
            bench.element = parse_element(&element)
                .with_context(|| format!("GEMMBENCH_ELEMENT: unknown element type '{element}'"))?;
        }

        if let Some(flag) = env_bool("GEMMBENCH_CORRECTNESS") {
            bench.checks.correctness = flag;
        }
        if let Some(flag) = env_bool("GEMMBENCH_HOST_REFERENCE") {
            bench.checks.host_reference = flag;
        }
        if let Some(flag) = env_bool("GEMMBENCH_STOP_TIMING_ON_ERROR") {
            bench.checks.stop_timing_on_error = flag;
        }
        if let Some(flag) = env_bool("GEMMBENCH_TIMING") {
            bench.timing.enabled = flag;
        }
        if let Some(reps) = env_parse::<u32>("GEMMBENCH_REPETITIONS")? {
            bench.timing.repetitions = reps;
        }
        if let Some(rel) = env_parse::<f64>("GEMMBENCH_TOLERANCE_RELATIVE")? {
            bench.tolerance.relative = rel;
        }
        if let Some(abs) = env_parse::<f64>("GEMMBENCH_TOLERANCE_ABSOLUTE")? {
            bench.tolerance.absolute = abs;
        }

        if let Ok(power) = env::var("GEMMBENCH_POWER") {
            if let Some(pref) = parse_power_preference(&power) {
                bench.device.power_preference = pref;
            }
        }
        if let Some(flag) = env_bool("GEMMBENCH_FORCE_FALLBACK") {
            bench.device.force_fallback_adapter = flag;
        }
        if let Some(pitch) = env_parse::<u32>("GEMMBENCH_ROW_PITCH")? {
            bench.device.row_pitch_alignment = pitch;
        }
        if let Ok(timeout) = env::var("GEMMBENCH_FENCE_TIMEOUT_MS") {
            let trimmed = timeout.trim();
            bench.device.fence_timeout_ms = if trimmed.is_empty() || trimmed == "0" {
                None
            } else {
                Some(trimmed.parse().with_context(|| {
                    format!("GEMMBENCH_FENCE_TIMEOUT_MS: invalid value '{timeout}'")
                })?)
            };
        }

        if let Some(flag) = env_bool("GEMMBENCH_DEBUG") {
            config.logging.debug = flag;
        }
        if let Ok(level) = env::var("GEMMBENCH_LOG_LEVEL") {
            if let Ok(level) = LogLevel::from_str(&level, true) {
                config.logging.level = Some(level);
            }
        }
        if let Ok(output) = env::var("GEMMBENCH_REPORT") {
            let trimmed = output.trim();
            config.report.output = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
        }

        Ok(())
    }

    pub fn save_to_file(config: &GemmbenchConfig, path: &Path) -> Result<()> {
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(config)
                .context("Failed to serialize config to JSON")?,
            Some("toml") => {
                toml::to_string_pretty(config).context("Failed to serialize config to TOML")?
            }
            _ => serde_yaml::to_string(config).context("Failed to serialize config to YAML")?,
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name}: invalid value '{value}'")),
        _ => Ok(None),
    }
}

/// Replaces the sweep with `squares` when any are given, then pins `m`, `k`
/// and `n` on every entry.
pub fn override_sizes(
    sizes: &mut Vec<SizeConfig>,
    squares: &[u32],
    m: Option<u32>,
    k: Option<u32>,
    n: Option<u32>,
) {
    if !squares.is_empty() {
        *sizes = squares.iter().copied().map(SizeConfig::square).collect();
    }
    for size in sizes.iter_mut() {
        size.m = m.unwrap_or(size.m);
        size.k = k.unwrap_or(size.k);
        size.n = n.unwrap_or(size.n);
    }
}

/// Comma or whitespace separated square sizes, e.g. `256,512,1024`.
pub fn parse_size_list(value: &str) -> Result<Vec<u32>> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u32>().with_context(|| format!("'{part}' is not a size")))
        .collect()
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_bool(&v))
}

/// Parse a boolean value from string with various formats
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enable" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

pub fn parse_element(value: &str) -> Option<ElementType> {
    match value.trim().to_ascii_lowercase().as_str() {
        "f32" | "float" | "float32" => Some(ElementType::F32),
        "u32" | "uint" | "uint32" => Some(ElementType::U32),
        _ => None,
    }
}

pub fn parse_power_preference(value: &str) -> Option<PowerPreference> {
    match value.trim().to_ascii_lowercase().as_str() {
        "none" | "auto" => Some(PowerPreference::None),
        "high" | "highperformance" | "high-performance" => Some(PowerPreference::HighPerformance),
        "low" | "lowpower" | "low-power" => Some(PowerPreference::LowPower),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmbench_accelerate::{Encoding, KernelKind};
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn defaults() {
        let config = GemmbenchConfig::default();
        assert_eq!(config.benchmark.sizes.len(), 7);
        assert_eq!(config.benchmark.sizes[0], SizeConfig::square(256));
        assert_eq!(config.benchmark.kind(), KernelKind::Matmul);
        assert!(config.logging.directive().is_none());
        assert!(config.report.output.is_none());
    }

    #[test]
    fn file_roundtrip_per_format() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = GemmbenchConfig::default();
        config.benchmark.sizes[0].k = 48;
        config.benchmark.sizes.push(SizeConfig { m: 3, k: 5, n: 7 });
        config.benchmark.timing.repetitions = 7;
        config.logging.level = Some(LogLevel::Trace);
        for name in [".gemmbench.yaml", ".gemmbench.json", ".gemmbench.toml"] {
            let path = temp_dir.path().join(name);
            ConfigLoader::save_to_file(&config, &path).unwrap();
            let loaded = ConfigLoader::load_from_file(&path).unwrap();
            assert_eq!(loaded, config, "{name}");
        }
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bench");
        fs::write(
            &path,
            r#"
[benchmark]
element = "u32"

[[benchmark.sizes]]
m = 17

[[benchmark.candidates]]
kind = "matmul"
encoding = "vec4-buffer"
tile_size = 8
work_per_thread = [4, 4]
"#,
        )
        .unwrap();
        let loaded = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(loaded.benchmark.element, ElementType::U32);
        assert_eq!(loaded.benchmark.sizes, [SizeConfig { m: 17, k: 256, n: 256 }]);
        assert_eq!(loaded.benchmark.candidates.len(), 1);
        assert_eq!(loaded.benchmark.candidates[0].encoding, Encoding::Vec4Buffer);
        assert!(loaded.benchmark.checks.correctness);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let _lock = ENV_GUARD.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".gemmbench.yaml");
        let mut config = GemmbenchConfig::default();
        config.benchmark.sizes = vec![SizeConfig::square(32), SizeConfig::square(48)];
        ConfigLoader::save_to_file(&config, &path).unwrap();

        env::set_var("GEMMBENCH_N", "64");
        env::set_var("GEMMBENCH_TIMING", "off");
        env::set_var("GEMMBENCH_FENCE_TIMEOUT_MS", "2500");
        env::set_var("GEMMBENCH_LOG_LEVEL", "DEBUG");
        let loaded = ConfigLoader::load(Some(&path));
        env::remove_var("GEMMBENCH_N");
        env::remove_var("GEMMBENCH_TIMING");
        env::remove_var("GEMMBENCH_FENCE_TIMEOUT_MS");
        env::remove_var("GEMMBENCH_LOG_LEVEL");

        let loaded = loaded.unwrap();
        assert_eq!(
            loaded.benchmark.sizes,
            [SizeConfig { m: 32, k: 32, n: 64 }, SizeConfig { m: 48, k: 48, n: 64 }]
        );
        assert!(!loaded.benchmark.timing.enabled);
        assert_eq!(loaded.benchmark.device.fence_timeout_ms, Some(2500));
        assert_eq!(loaded.logging.level, Some(LogLevel::Debug));
    }

    #[test]
    fn size_list_from_environment_replaces_the_sweep() {
        let _lock = ENV_GUARD.lock().unwrap();
        env::set_var("GEMMBENCH_SIZE", "64, 128,256");
        let mut config = GemmbenchConfig::default();
        let result = ConfigLoader::apply_environment_variables(&mut config);
        env::set_var("GEMMBENCH_SIZE", "64,lots");
        let invalid = ConfigLoader::apply_environment_variables(&mut GemmbenchConfig::default());
        env::remove_var("GEMMBENCH_SIZE");

        result.unwrap();
        let squares: Vec<u32> = config.benchmark.sizes.iter().map(|s| s.m).collect();
        assert_eq!(squares, [64, 128, 256]);
        assert!(format!("{:#}", invalid.unwrap_err()).contains("GEMMBENCH_SIZE"));
    }

    #[test]
    fn invalid_numeric_environment_value_is_reported() {
        let _lock = ENV_GUARD.lock().unwrap();
        env::set_var("GEMMBENCH_REPETITIONS", "many");
        let mut config = GemmbenchConfig::default();
        let result = ConfigLoader::apply_environment_variables(&mut config);
        env::remove_var("GEMMBENCH_REPETITIONS");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("GEMMBENCH_REPETITIONS"));
    }

    #[test]
    fn value_parsers() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_element("Float32"), Some(ElementType::F32));
        assert_eq!(parse_element("i64"), None);
        assert_eq!(parse_power_preference("low"), Some(PowerPreference::LowPower));
        assert_eq!(parse_power_preference("turbo"), None);
    }
}
