//! Setup and wiring
//!
//! Handles project initialization:
//! - Configuration directory and default config file
//! - Gatekeeper and attention-check directories
//! - Database migrations
//!
//! and builds the engine (trial controller, consensus coordinator,
//! diagnostics) from a loaded configuration.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::adapters::renderer::{build_renderer, ResilientRenderer};
use crate::adapters::sqlite::{initialize_database, SqliteChainLog, SqliteParticipantLedger};
use crate::domain::errors::DomainError;
use crate::domain::models::{AcceptancePolicy, Config, DatabaseConfig};
use crate::domain::ports::{ChainLog, ParticipantLedger};
use crate::services::{AttentionCheckBank, ConsensusCoordinator, DiagnosticsService, GatekeeperRegistry, TrialController};

/// Default configuration template content
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# MCMCP Configuration
# Override settings by editing this file, .mcmcp/local.yaml, or environment
# variables with the MCMCP_ prefix (use __ for nesting)
#
# Example environment variables:
#   export MCMCP_TASK__MAX_TRIAL=200
#   export MCMCP_DATABASE__PATH=/custom/path/mcmcp.db
#   export MCMCP_LOGGING__LEVEL=debug

database:
  path: ".mcmcp/mcmcp.db"
  max_connections: 5

logging:
  # trace, debug, info, warn, error
  level: "info"
  # json, pretty
  format: "json"

server:
  host: "127.0.0.1"
  port: 8080

renderer:
  # http (stimulus service) or raw (latent vectors sent to the client)
  mode: "http"
  base_url: "http://127.0.0.1:8000"
  max_attempts: 3
  retry_delay_ms: 500

task:
  name: "mcmcp"
  # independent, blockwise, gsp, gsp_prior, consensus
  variant: "blockwise"
  categories: ["happy", "sad"]
  dim: 3
  bounds: [-30.0, 30.0]
  n_chain: 2
  max_trial: 10
  proposal_variance: [1.0]
  # Full dim x dim covariance; replaces proposal_variance when set
  # proposal_covariance: [[1.0, 0.5, 0.0], [0.5, 1.0, 0.0], [0.0, 0.0, 1.0]]
  n_rest: 5
  # rendered_prediction or uniform_other
  prior_proposal: "rendered_prediction"
  resolution: 10
  max_samples_per_class: 5

gatekeeper:
  enabled: false
  dir: ".mcmcp/gatekeepers"
  temperature: 2.0
  stuck_patience: 1000
  min_proposal_distance: 2.0
  max_auto_decisions: 100
  acceptance:
    policy: "human"

attention_check:
  enabled: false
  dir: ".mcmcp/attention_checks"
  rate: 0.005
  max_failures: 2

consensus:
  team_size: 3
  poll_interval_ms: 2000
"#;

/// Setup paths and directories
pub struct SetupPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
    pub gatekeeper_dir: PathBuf,
    pub attention_dir: PathBuf,
}

impl SetupPaths {
    /// Get setup paths for the current directory
    pub fn new() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::in_dir(current_dir))
    }

    pub fn in_dir(root: PathBuf) -> Self {
        let config_dir = root.join(".mcmcp");
        Self {
            config_file: config_dir.join("config.yaml"),
            database_file: config_dir.join("mcmcp.db"),
            gatekeeper_dir: config_dir.join("gatekeepers"),
            attention_dir: config_dir.join("attention_checks"),
            config_dir,
        }
    }

    /// Check if the project is already initialized
    pub fn is_initialized(&self) -> bool {
        self.config_file.exists() && self.database_file.exists()
    }
}

/// Create the configuration directory and the model directories
pub fn create_config_dir(paths: &SetupPaths) -> Result<()> {
    for dir in [&paths.config_dir, &paths.gatekeeper_dir, &paths.attention_dir] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

/// Create the default configuration file
pub fn create_config_file(paths: &SetupPaths, force: bool) -> Result<()> {
    if paths.config_file.exists() && !force {
        return Ok(());
    }

    fs::write(&paths.config_file, DEFAULT_CONFIG_TEMPLATE).context("Failed to write config file")?;

    Ok(())
}

/// Run database migrations
pub async fn run_migrations(paths: &SetupPaths) -> Result<()> {
    let config = DatabaseConfig {
        path: paths.database_file.display().to_string(),
        max_connections: 1,
    };
    let pool = initialize_database(&config)
        .await
        .context("Failed to run migrations")?;
    pool.close().await;
    Ok(())
}

/// Initialize a project directory; existing files are kept unless `force`.
pub async fn initialize_project(paths: &SetupPaths, force: bool) -> Result<()> {
    create_config_dir(paths)?;
    create_config_file(paths, force)?;
    run_migrations(paths).await?;
    info!(config_dir = %paths.config_dir.display(), "project initialized");
    Ok(())
}

/// Everything the HTTP server and the CLI need.
pub struct Engine {
    pub config: Config,
    pub chain_log: Arc<dyn ChainLog>,
    pub trials: Arc<TrialController>,
    pub consensus: Arc<ConsensusCoordinator>,
    pub diagnostics: Arc<DiagnosticsService>,
}

/// Open the database and build the engine.
pub async fn build_engine(config: Config) -> Result<Engine> {
    let pool = initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    build_engine_with_pool(config, pool)
}

/// Build the engine on an existing, migrated pool.
///
/// Gatekeeper models are loaded whenever the task proposes from them or
/// screens with them; a missing or malformed model aborts start-up.
pub fn build_engine_with_pool(config: Config, pool: SqlitePool) -> Result<Engine> {
    let chain_log: Arc<dyn ChainLog> = Arc::new(SqliteChainLog::new(pool.clone()));
    let ledger: Arc<dyn ParticipantLedger> = Arc::new(SqliteParticipantLedger::new(pool));

    let inner = build_renderer(&config.renderer).context("Failed to build stimulus renderer")?;
    let renderer = Arc::new(ResilientRenderer::new(
        inner,
        config.task.categories.clone(),
        &config.renderer,
    ));

    let mut trials = TrialController::new(&config, Arc::clone(&chain_log), Arc::clone(&ledger), Arc::clone(&renderer))?;

    let screening = matches!(config.gatekeeper.acceptance, AcceptancePolicy::GatekeeperScreen { .. });
    if config.gatekeeper.enabled || screening {
        let registry = load_gatekeepers(&config)?;
        trials = trials.with_gatekeepers(Arc::new(registry));
    }

    if config.attention_check.enabled {
        let bank = AttentionCheckBank::load(&config.attention_check.dir)
            .context("Failed to load attention checks")?;
        trials = trials.with_attention_checks(Arc::new(bank));
    }

    let consensus = ConsensusCoordinator::new(&config, Arc::clone(&chain_log), ledger, renderer)?;
    let diagnostics = DiagnosticsService::new(Arc::clone(&chain_log), config.task.variant);

    info!(
        task = %config.task.name,
        variant = config.task.variant.as_str(),
        gatekeeper = config.gatekeeper.enabled,
        "engine ready"
    );

    Ok(Engine {
        config,
        chain_log,
        trials: Arc::new(trials),
        consensus: Arc::new(consensus),
        diagnostics: Arc::new(diagnostics),
    })
}

/// Load one density model per category and check it matches the task.
pub fn load_gatekeepers(config: &Config) -> Result<GatekeeperRegistry> {
    let registry = GatekeeperRegistry::load(
        &config.gatekeeper.dir,
        &config.task.categories,
        config.gatekeeper.bandwidth,
    )?;
    for category in &config.task.categories {
        let model = registry.get(category)?;
        if model.dimensionality() != config.task.dim {
            return Err(DomainError::GatekeeperLoad {
                category: category.clone(),
                reason: format!(
                    "model has {} dimensions, task has {}",
                    model.dimensionality(),
                    config.task.dim
                ),
            }
            .into());
        }
    }
    Ok(registry)
}
