use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project configuration, relative to the project root.
pub const CONFIG_DIR: &str = ".replaygen";

/// Prefix of environment overrides, e.g. `REPLAYGEN_VERIFICATION__TIMEOUT_SECS`.
pub const ENV_PREFIX: &str = "REPLAYGEN_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid timeout_secs: {0}. Must be at least 1")]
    InvalidTimeout(u64),

    #[error("Invalid max_workers: {0}. Must be at least 1")]
    InvalidMaxWorkers(usize),

    #[error("Invalid max_cases_per_file: {0}. Must be at least 1")]
    InvalidMaxCasesPerFile(usize),

    #[error("Invalid float_tolerance: {0}. Must be a non-negative number")]
    InvalidTolerance(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the project in the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .replaygen/config.yaml (created by init)
    /// 3. .replaygen/local.yaml (optional local overrides)
    /// 4. Environment variables (REPLAYGEN_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        Self::load_layered(Path::new("."), None)
    }

    /// Load the project layers below `root`, with an optional explicit file
    /// merged above them. Environment variables still win.
    pub fn load_layered(root: &Path, explicit: Option<&Path>) -> Result<Config> {
        let dir = root.join(CONFIG_DIR);
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")));
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.verification.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(config.verification.timeout_secs));
        }
        if config.verification.max_workers == 0 {
            return Err(ConfigError::InvalidMaxWorkers(config.verification.max_workers));
        }
        if config
            .verification
            .command
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            return Err(ConfigError::ValidationFailed(
                "verification.command cannot be empty".to_string(),
            ));
        }

        if config.output.max_cases_per_file == 0 {
            return Err(ConfigError::InvalidMaxCasesPerFile(config.output.max_cases_per_file));
        }
        if config.output.dir.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output.dir cannot be empty".to_string(),
            ));
        }

        let tolerance = config.generation.float_tolerance;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }
        if let Some(ns) = config.generation.namespaces.iter().find(|ns| ns.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "generation.namespaces contains an empty entry: {ns:?}"
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }

    /// YAML written by `replaygen init`.
    pub fn default_yaml() -> Result<String> {
        serde_yaml::to_string(&Config::default()).context("Failed to serialize default config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.verification.timeout_secs, 5);
        assert_eq!(config.output.max_cases_per_file, 200);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.verification.timeout_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTimeout(0))
        ));
    }

    #[test]
    fn test_validate_zero_workers_and_cases() {
        let mut config = Config::default();
        config.verification.max_workers = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxWorkers(0))
        ));

        let mut config = Config::default();
        config.output.max_cases_per_file = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxCasesPerFile(0))
        ));
    }

    #[test]
    fn test_validate_tolerance() {
        let mut config = Config::default();
        config.generation.float_tolerance = f64::NAN;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTolerance(_))
        ));
        config.generation.float_tolerance = -1.0;
        assert!(ConfigLoader::validate(&config).is_err());
        config.generation.float_tolerance = 0.0;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(ref level) if level == "loud"));
        assert!(err.to_string().contains("trace, debug, info, warn, error"));
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "generation:\n  namespaces: [com.acme]\noutput:\n  max_cases_per_file: 50"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.generation.namespaces, vec!["com.acme".to_string()]);
        assert_eq!(config.output.max_cases_per_file, 50);
        assert_eq!(config.output.class_suffix, "ReplayTest");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "verification:\n  max_workers: 0").unwrap();
        file.flush().unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_hierarchical_merging() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.yaml"),
            "verification:\n  timeout_secs: 9\n  max_workers: 2\nlogging:\n  format: json\n",
        )
        .unwrap();
        std::fs::write(dir.join("local.yaml"), "verification:\n  timeout_secs: 3\n").unwrap();

        temp_env::with_vars(
            [
                ("REPLAYGEN_VERIFICATION__MAX_WORKERS", Some("7")),
                ("REPLAYGEN_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_layered(root.path(), None).unwrap();
                assert_eq!(config.verification.timeout_secs, 3, "local.yaml should win");
                assert_eq!(config.verification.max_workers, 7, "environment should win");
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.logging.format, "json", "base value should persist");
            },
        );
    }

    #[test]
    fn test_explicit_file_sits_above_project_layers() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.yaml"), "output:\n  dir: from-project\n").unwrap();
        let explicit = root.path().join("ci.yaml");
        std::fs::write(&explicit, "output:\n  dir: from-ci\n").unwrap();

        temp_env::with_vars_unset(["REPLAYGEN_OUTPUT__DIR"], || {
            let config = ConfigLoader::load_layered(root.path(), Some(&explicit)).unwrap();
            assert_eq!(config.output.dir, "from-ci");
        });
        assert!(ConfigLoader::load_layered(root.path(), Some(&root.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_default_yaml_round_trips_through_loader() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", ConfigLoader::default_yaml().unwrap()).unwrap();
        file.flush().unwrap();
        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.verification.max_workers, 4);
    }
}
