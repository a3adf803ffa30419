use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::collections::HashSet;
use thiserror::Error;

use crate::domain::models::config::{Config, RendererMode};
use crate::domain::models::AcceptancePolicy;
use crate::services::ProposalCovariance;

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Task needs at least one category")]
    NoCategories,

    #[error("Duplicate category: {0}")]
    DuplicateCategory(String),

    #[error("Invalid dim: {0}. Must be at least 1")]
    InvalidDim(usize),

    #[error("Expected {expected} ranges (one per dimension), got {actual}")]
    RangeCount { expected: usize, actual: usize },

    #[error("Invalid range ({0}, {1}): min must be below max")]
    InvalidRange(f64, f64),

    #[error("Invalid n_chain: {0}. Must be at least 1")]
    InvalidChainCount(u32),

    #[error("proposal_variance must hold one value or one per dimension ({dim}), got {actual}")]
    VarianceCount { dim: usize, actual: usize },

    #[error("Invalid proposal variance: {0}. Must be positive")]
    InvalidVariance(f64),

    #[error("Invalid proposal_covariance: {0}")]
    InvalidCovariance(String),

    #[error("Invalid resolution: {0}. Slice trials need at least 2 points")]
    InvalidResolution(usize),

    #[error("Invalid {name}: {value}. Must be between 0 and 1")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("Invalid temperature: {0}. Must be positive")]
    InvalidTemperature(f64),

    #[error("Invalid gatekeeper bandwidth: {0}. Must be positive")]
    InvalidBandwidth(f64),

    #[error("Invalid renderer max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid renderer rate limit: {requests_per_second} requests/s, burst {burst_size}")]
    InvalidRateLimit { requests_per_second: u32, burst_size: u32 },

    #[error("Renderer base_url cannot be empty in http mode")]
    EmptyBaseUrl,

    #[error("Invalid team_size: {0}. Must be at least 1")]
    InvalidTeamSize(u32),

    #[error("Invalid poll_interval_ms: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .mcmcp/config.yaml (task config)
    /// 3. .mcmcp/local.yaml (local overrides, optional)
    /// 4. Environment variables (MCMCP_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".mcmcp/config.yaml"))
            .merge(Yaml::file(".mcmcp/local.yaml"))
            .merge(Env::prefixed("MCMCP_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring environment overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("MCMCP_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        // Database
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        // Renderer
        let renderer = &config.renderer;
        if renderer.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(renderer.max_attempts));
        }
        if renderer.requests_per_second == 0 || renderer.burst_size == 0 {
            return Err(ConfigError::InvalidRateLimit {
                requests_per_second: renderer.requests_per_second,
                burst_size: renderer.burst_size,
            });
        }
        if renderer.mode == RendererMode::Http && renderer.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }

        Self::validate_task(config)?;

        // Gatekeeper
        let gatekeeper = &config.gatekeeper;
        if !(gatekeeper.temperature.is_finite() && gatekeeper.temperature > 0.0) {
            return Err(ConfigError::InvalidTemperature(gatekeeper.temperature));
        }
        if let Some(bandwidth) = gatekeeper.bandwidth {
            if !(bandwidth.is_finite() && bandwidth > 0.0) {
                return Err(ConfigError::InvalidBandwidth(bandwidth));
            }
        }
        if gatekeeper.min_proposal_distance.is_nan() {
            return Err(ConfigError::ValidationFailed("min_proposal_distance is NaN".to_string()));
        }
        if let AcceptancePolicy::GatekeeperScreen { rate } = gatekeeper.acceptance {
            check_probability("gatekeeper.acceptance.rate", rate)?;
        }

        // Attention checks
        check_probability("attention_check.rate", config.attention_check.rate)?;
        if config.attention_check.max_failures == 0 {
            return Err(ConfigError::ValidationFailed(
                "attention_check.max_failures must be at least 1".to_string(),
            ));
        }

        // Consensus
        if config.consensus.team_size == 0 {
            return Err(ConfigError::InvalidTeamSize(config.consensus.team_size));
        }
        if config.consensus.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.consensus.poll_interval_ms));
        }

        Ok(())
    }

    fn validate_task(config: &Config) -> Result<(), ConfigError> {
        let task = &config.task;
        if task.name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("task name cannot be empty".to_string()));
        }
        if task.categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        let mut seen = HashSet::new();
        for category in &task.categories {
            if !seen.insert(category.as_str()) {
                return Err(ConfigError::DuplicateCategory(category.clone()));
            }
        }
        if task.dim == 0 {
            return Err(ConfigError::InvalidDim(task.dim));
        }
        if task.n_chain == 0 {
            return Err(ConfigError::InvalidChainCount(task.n_chain));
        }

        if !task.ranges.is_empty() && task.ranges.len() != task.dim {
            return Err(ConfigError::RangeCount {
                expected: task.dim,
                actual: task.ranges.len(),
            });
        }
        for (min, max) in task.effective_ranges() {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(ConfigError::InvalidRange(min, max));
            }
        }

        if task.proposal_variance.len() != 1 && task.proposal_variance.len() != task.dim {
            return Err(ConfigError::VarianceCount {
                dim: task.dim,
                actual: task.proposal_variance.len(),
            });
        }
        if let Some(bad) = task.proposal_variance.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(ConfigError::InvalidVariance(*bad));
        }
        if task.proposal_covariance.is_some() {
            ProposalCovariance::for_task(task).map_err(|err| ConfigError::InvalidCovariance(err.to_string()))?;
        }

        if task.variant.is_slice_sampler() {
            if task.resolution < 2 {
                return Err(ConfigError::InvalidResolution(task.resolution));
            }
            if task.max_samples_per_class == 0 {
                return Err(ConfigError::ValidationFailed(
                    "max_samples_per_class must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}
