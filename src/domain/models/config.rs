use serde::{Deserialize, Serialize};

/// Main configuration structure for replaygen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Target selection and reconstruction settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Live replay verification settings
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Output packing settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target selection and reconstruction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GenerationConfig {
    /// Package prefixes of the unit under test. Empty means every
    /// non-library type.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Whether values may be replaced by test doubles
    #[serde(default = "default_allow_mocks")]
    pub allow_mocks: bool,

    /// Absolute tolerance for floating point equality assertions
    #[serde(default = "default_float_tolerance")]
    pub float_tolerance: f64,

    /// Additional fully qualified types that must never be mocked
    #[serde(default)]
    pub unmockable_types: Vec<String>,
}

const fn default_allow_mocks() -> bool {
    true
}

const fn default_float_tolerance() -> f64 {
    1e-6
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            namespaces: vec![],
            allow_mocks: default_allow_mocks(),
            float_tolerance: default_float_tolerance(),
            unmockable_types: vec![],
        }
    }
}

impl GenerationConfig {
    /// Whether a type belongs to the configured unit-under-test namespaces.
    /// With no namespaces configured every type qualifies.
    pub fn in_namespace(&self, type_name: &str) -> bool {
        self.namespaces.is_empty()
            || self.namespaces.iter().any(|ns| {
                type_name == ns
                    || type_name
                        .strip_prefix(ns.as_str())
                        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('$'))
            })
    }
}

/// Live replay verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerificationConfig {
    /// Timeout for a single replay in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum concurrent replays
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// External command that replays a test case (case JSON on stdin,
    /// outcome JSON on stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_max_workers() -> usize {
    4
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_workers: default_max_workers(),
            command: None,
        }
    }
}

/// Output packing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OutputConfig {
    /// Directory generated test sources are written to
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Maximum number of test cases per generated file
    #[serde(default = "default_max_cases_per_file")]
    pub max_cases_per_file: usize,

    /// Suffix appended to the class-under-test name
    #[serde(default = "default_class_suffix")]
    pub class_suffix: String,
}

fn default_output_dir() -> String {
    "generated-tests".to_string()
}

const fn default_max_cases_per_file() -> usize {
    200
}

fn default_class_suffix() -> String {
    "ReplayTest".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            max_cases_per_file: default_max_cases_per_file(),
            class_suffix: default_class_suffix(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
