//! Configuration loading: multi-format parsing with `${VAR}` / `$VAR`
//! environment substitution, plus the kernel's own recognized options
//! (§6.6).

use std::collections::HashMap;

use config::{Config as Cfg, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or parsing a configuration source.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(String),

    #[error("failed to serialize resolved config: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detects a config file's format from its extension.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Replaces `${VAR}` and bare `$VAR` references with the corresponding
/// environment variable, leaving the original text in place when the
/// variable is unset.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let resolved = braced.replace_all(content, |caps: &regex::Captures| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    let bare = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").unwrap();
    bare.replace_all(&resolved, |caps: &regex::Captures| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Loads and deserializes a single config file, substituting environment
/// variables first.
pub fn load_config<T: DeserializeOwned>(path: &str) -> ConfigResult<T> {
    let format = detect_format(path)?;
    let raw = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&raw);
    from_str(&substituted, format)
}

/// Deserializes config content already held in memory.
pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> ConfigResult<T> {
    let cfg = Cfg::builder()
        .add_source(File::from_str(content, format))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

/// Layers multiple config sources, later entries overriding earlier ones.
pub fn merge_configs<T: DeserializeOwned>(sources: &[(&str, FileFormat)]) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    for (content, format) in sources {
        builder = builder.add_source(File::from_str(content, *format));
    }
    let cfg = builder.build()?;
    Ok(cfg.try_deserialize()?)
}

/// Loads and merges multiple config files by path, in order.
pub fn load_merged<T: DeserializeOwned>(paths: &[&str]) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    for path in paths {
        let format = detect_format(path)?;
        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);
        builder = builder.add_source(File::from_str(&substituted, format));
    }
    let cfg = builder.build()?;
    Ok(cfg.try_deserialize()?)
}

/// Loads a single file and layers environment variables with the given
/// prefix on top (e.g. `TASKWRIGHT__MAX_PARALLEL_WORKERS`).
pub fn load_with_env<T: DeserializeOwned>(path: &str, env_prefix: &str) -> ConfigResult<T> {
    let format = detect_format(path)?;
    let raw = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&raw);
    let cfg = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .add_source(config::Environment::with_prefix(env_prefix).separator("__"))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

/// TTL settings for the two perception-adjacent caches (§6.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_dom_cache_ttl_s")]
    pub dom_cache_ttl_s: u64,
    #[serde(default = "default_llm_cache_ttl_s")]
    pub llm_cache_ttl_s: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_dom_cache_ttl_s() -> u64 {
    30
}
fn default_llm_cache_ttl_s() -> u64 {
    3600
}
fn default_cache_max_entries() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dom_cache_ttl_s: default_dom_cache_ttl_s(),
            llm_cache_ttl_s: default_llm_cache_ttl_s(),
            max_entries: default_cache_max_entries(),
        }
    }
}

/// The kernel's recognized configuration options (§6.6), with the spec's
/// defaults applied via serde when a field is absent from a loaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub max_parallel_workers: u32,
    pub global_timeout_s: u64,
    pub max_iterations_per_task: u32,
    pub verify_confidence_threshold: f64,
    pub stuck_threshold_s: u64,
    pub recovery_task_budget_factor: f64,
    pub skip_satisfies_dependency: bool,
    pub cache: CacheConfig,
    /// Free-form per-deployment overrides not otherwise modeled, kept so
    /// unknown keys in a config file round-trip rather than erroring.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_parallel_workers: 4,
            global_timeout_s: 300,
            max_iterations_per_task: 50,
            verify_confidence_threshold: 0.6,
            stuck_threshold_s: 60,
            recovery_task_budget_factor: 2.0,
            skip_satisfies_dependency: true,
            cache: CacheConfig::default(),
            extra: HashMap::new(),
        }
    }
}

impl KernelConfig {
    pub fn from_file(path: &str) -> ConfigResult<Self> {
        load_config(path)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_parallel_workers == 0 {
            return Err(ConfigError::Parse(config::ConfigError::Message(
                "max_parallel_workers must be >= 1".into(),
            )));
        }
        if !(0.0..=1.0).contains(&self.verify_confidence_threshold) {
            return Err(ConfigError::Parse(config::ConfigError::Message(
                "verify_confidence_threshold must be in [0, 1]".into(),
            )));
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "config"))]
mod tests {
    use super::*;

    #[test]
    fn detect_format_recognizes_known_extensions() {
        assert!(matches!(detect_format("a.toml").unwrap(), FileFormat::Toml));
        assert!(matches!(detect_format("a.yaml").unwrap(), FileFormat::Yaml));
        assert!(matches!(detect_format("a.yml").unwrap(), FileFormat::Yaml));
        assert!(matches!(detect_format("a.json").unwrap(), FileFormat::Json));
        assert!(matches!(detect_format("a.ini").unwrap(), FileFormat::Ini));
        assert!(matches!(detect_format("a.ron").unwrap(), FileFormat::Ron));
        assert!(matches!(detect_format("a.json5").unwrap(), FileFormat::Json5));
        assert!(detect_format("a.xml").is_err());
    }

    #[test]
    fn substitute_env_vars_handles_braced_and_bare() {
        // SAFETY: single-threaded test, no concurrent env access.
        unsafe { std::env::set_var("TW_TEST_VAR", "hello") };
        let input = "url = \"${TW_TEST_VAR}/$TW_TEST_VAR\"";
        let out = substitute_env_vars(input);
        assert_eq!(out, "url = \"hello/hello\"");
        unsafe { std::env::remove_var("TW_TEST_VAR") };
    }

    #[test]
    fn substitute_env_vars_leaves_unset_vars_untouched() {
        let input = "x = \"${TW_DEFINITELY_UNSET_VAR}\"";
        assert_eq!(substitute_env_vars(input), input);
    }

    #[test]
    fn from_str_parses_toml() {
        let toml = "max_parallel_workers = 8\nglobal_timeout_s = 120\n";
        let cfg: KernelConfig = from_str(toml, FileFormat::Toml).unwrap();
        assert_eq!(cfg.max_parallel_workers, 8);
        assert_eq!(cfg.global_timeout_s, 120);
        // untouched fields keep their defaults
        assert_eq!(cfg.verify_confidence_threshold, 0.6);
    }

    #[test]
    fn from_str_parses_yaml_and_json() {
        let yaml = "max_parallel_workers: 2\n";
        let cfg: KernelConfig = from_str(yaml, FileFormat::Yaml).unwrap();
        assert_eq!(cfg.max_parallel_workers, 2);

        let json = r#"{"stuck_threshold_s": 90}"#;
        let cfg: KernelConfig = from_str(json, FileFormat::Json).unwrap();
        assert_eq!(cfg.stuck_threshold_s, 90);
    }

    #[test]
    fn merge_configs_layers_in_order() {
        let base = "max_parallel_workers = 2\nglobal_timeout_s = 60\n";
        let override_ = "max_parallel_workers = 8\n";
        let cfg: KernelConfig =
            merge_configs(&[(base, FileFormat::Toml), (override_, FileFormat::Toml)]).unwrap();
        assert_eq!(cfg.max_parallel_workers, 8);
        assert_eq!(cfg.global_timeout_s, 60);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.global_timeout_s, 300);
        assert_eq!(cfg.max_iterations_per_task, 50);
        assert_eq!(cfg.verify_confidence_threshold, 0.6);
        assert_eq!(cfg.stuck_threshold_s, 60);
        assert_eq!(cfg.recovery_task_budget_factor, 2.0);
        assert!(cfg.skip_satisfies_dependency);
        assert_eq!(cfg.cache.dom_cache_ttl_s, 30);
        assert_eq!(cfg.cache.llm_cache_ttl_s, 3600);
    }

    #[test]
    fn validate_rejects_zero_workers_and_bad_threshold() {
        let mut cfg = KernelConfig::default();
        cfg.max_parallel_workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = KernelConfig::default();
        cfg.verify_confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
