//! Configuration module for subscription-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub extractor: ExtractorConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// The spreadsheet extraction service.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_upload_bytes: usize,
}

const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "subscription-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            },
            extractor: ExtractorConfig {
                url: env::var("EXTRACTOR_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("EXTRACTOR_URL is required"))
                })?,
                timeout_secs: parse_env("EXTRACTOR_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_EXTRACTOR_TIMEOUT_SECS),
            },
            upload: UploadConfig {
                max_upload_bytes: parse_env("MAX_UPLOAD_BYTES")
                    .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
