//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources, lowest
//! precedence first:
//!
//! 1. [`TaskRunnerConfig::default`]
//! 2. `<dir>/taskrunner.toml`
//! 3. `<dir>/taskrunner.<environment>.toml`
//! 4. `TASKRUNNER__<SECTION>__<KEY>` environment variables

use super::error::ConfigResult;
use super::{ConfigurationError, TaskRunnerConfig};
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE: &str = "taskrunner";
const ENV_PREFIX: &str = "TASKRUNNER";

#[derive(Debug)]
pub struct ConfigManager {
    config: TaskRunnerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful in tests that must not touch process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));
        if config_directory.exists() && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound(config_directory));
        }

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            worker_concurrency = config.dispatcher.worker_concurrency,
            unit_delay_ms = config.dispatcher.unit_delay_ms,
            orphan_policy = ?config.reconciliation.orphan_policy,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first.
    pub fn from_config(config: TaskRunnerConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<TaskRunnerConfig> {
        let base = config_directory.join(format!("{BASE_FILE}.toml"));
        let overrides = config_directory.join(format!("{BASE_FILE}.{environment}.toml"));

        let settings = Config::builder()
            .add_source(Config::try_from(&TaskRunnerConfig::default())?)
            .add_source(File::new(&base.to_string_lossy(), FileFormat::Toml).required(false))
            .add_source(File::new(&overrides.to_string_lossy(), FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &TaskRunnerConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// TASKRUNNER_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("TASKRUNNER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
