use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

const APP_DIR_NAME: &str = "Hotwork Permit Client";
const ENDPOINT_ENV: &str = "HOTWORK_API_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_endpoint: String,
    pub max_width: u32,
    pub jpeg_quality: f64,
    pub min_quality: f64,
    pub quality_step: f64,
    pub retry_count: u32,
    pub retry_delay_base_ms: u64,
    pub max_concurrent_uploads: usize,
    pub compression_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: "https://fire-management-api.firework202511.workers.dev".to_string(),
            max_width: 1024,
            jpeg_quality: 0.75,
            min_quality: 0.5,
            quality_step: 0.1,
            retry_count: 3,
            retry_delay_base_ms: 500,
            max_concurrent_uploads: 5,
            compression_timeout_ms: 8000,
            request_timeout_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

/// Settings the image compressor needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    pub max_width: u32,
    pub timeout: Duration,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Config::default().compressor_settings()
    }
}

/// Settings the resilient uploader needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    pub retry_count: u32,
    pub default_quality: f64,
    pub min_quality: f64,
    pub quality_step: f64,
    pub base_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Config::default().retry_settings()
    }
}

impl Config {
    pub fn compressor_settings(&self) -> CompressorSettings {
        CompressorSettings {
            max_width: self.max_width,
            timeout: Duration::from_millis(self.compression_timeout_ms),
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            retry_count: self.retry_count,
            default_quality: self.jpeg_quality,
            min_quality: self.min_quality,
            quality_step: self.quality_step,
            base_delay: Duration::from_millis(self.retry_delay_base_ms),
            exponential_base: 1.5,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

/// Outcome of loading the configuration. Loading happens before the logger
/// exists, so anything worth reporting is kept here for `log_notices`.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
    pub created: bool,
    pub parse_error: Option<String>,
    pub endpoint_from_env: bool,
}

impl LoadedConfig {
    pub fn log_notices(&self) {
        if self.created {
            log::info!("Created default configuration at {}", self.path.display());
        }
        if let Some(e) = &self.parse_error {
            log::warn!(
                "Failed to parse config file {}: {}. Using defaults.",
                self.path.display(),
                e
            );
        }
        if self.endpoint_from_env {
            log::debug!("Using API endpoint from {}", ENDPOINT_ENV);
        }
    }
}

/// Load the configuration from `path`, or from the per-user config directory.
/// A missing file is created with defaults. An unparsable file falls back to
/// defaults and the parse error is kept in `parse_error`.
pub fn load_config(path: Option<&Path>) -> AppResult<LoadedConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };

    let mut created = false;
    let mut parse_error = None;

    let mut config = if config_path.exists() {
        let config_str = fs::read_to_string(&config_path)?;
        serde_json::from_str::<Config>(&config_str).unwrap_or_else(|e| {
            parse_error = Some(e.to_string());
            Config::default()
        })
    } else {
        let default_config = Config::default();
        save_config(&config_path, &default_config)?;
        created = true;
        default_config
    };

    let mut endpoint_from_env = false;
    if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
        if !endpoint.trim().is_empty() {
            config.api_endpoint = endpoint.trim().to_string();
            endpoint_from_env = true;
        }
    }

    validate_config(&config)?;
    Ok(LoadedConfig {
        config,
        path: config_path,
        created,
        parse_error,
        endpoint_from_env,
    })
}

pub fn save_config(path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_endpoint_url(&config.api_endpoint)?;

    if config.max_width == 0 {
        return Err(AppError::validation("max_width", "Must be greater than 0"));
    }

    if !(config.jpeg_quality > 0.0 && config.jpeg_quality <= 1.0) {
        return Err(AppError::validation("jpeg_quality", "Must be in (0, 1]"));
    }

    if !(config.min_quality > 0.0 && config.min_quality <= config.jpeg_quality) {
        return Err(AppError::validation(
            "min_quality",
            "Must be in (0, jpeg_quality]",
        ));
    }

    if !(config.quality_step >= 0.0 && config.quality_step < 1.0) {
        return Err(AppError::validation("quality_step", "Must be in [0, 1)"));
    }

    if config.retry_count == 0 || config.retry_count > 10 {
        return Err(AppError::validation("retry_count", "Must be between 1 and 10"));
    }

    if config.max_concurrent_uploads == 0 {
        return Err(AppError::validation(
            "max_concurrent_uploads",
            "Must be at least 1",
        ));
    }

    if config.compression_timeout_ms == 0 {
        return Err(AppError::validation(
            "compression_timeout_ms",
            "Must be greater than 0",
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be greater than 0",
        ));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}
