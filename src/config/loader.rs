//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate: `payroll.yaml`, then `payroll.<environment>.yaml`, then
//! `PAYROLL__SECTION__KEY` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::PayrollConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "payroll";
const ENV_PREFIX: &str = "PAYROLL";

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: PayrollConfig,
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
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading payroll configuration"
        );

        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        let config = Self::build_layered(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            max_connections = config.database.max_connections,
            max_concurrent_employees = config.orchestration.max_concurrent_employees,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (embedding, tests)
    pub fn from_config(config: PayrollConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &PayrollConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `PAYROLL_ENV`, then `APP_ENV`, else `development`
    pub fn detect_environment() -> String {
        env::var("PAYROLL_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("PAYROLL_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build_layered(directory: &Path, environment: &str) -> ConfigResult<PayrollConfig> {
        let base = directory.join(format!("{BASE_FILE_STEM}.yaml"));
        let overlay = directory.join(format!("{BASE_FILE_STEM}.{environment}.yaml"));

        let settings = Config::builder()
            .add_source(File::from(base.as_path()).format(FileFormat::Yaml).required(false))
            .add_source(
                File::from(overlay.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::build_error(environment, e))?;

        settings
            .try_deserialize::<PayrollConfig>()
            .map_err(|e| ConfigurationError::build_error(environment, e))
    }
}
