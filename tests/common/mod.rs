//! Common test utilities for integration tests
//!
//! Provides shared fixtures: an in-memory migrated database, a trial
//! controller wired to a mock stimulus service, and gatekeeper models with
//! known centers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcmcp::adapters::renderer::{MockStimulusRenderer, ResilientRenderer};
use mcmcp::adapters::sqlite::{create_migrated_test_pool, SqliteChainLog, SqliteParticipantLedger};
use mcmcp::domain::models::{Choice, ChoiceRegistration, Config, TrialType};
use mcmcp::services::{ConsensusCoordinator, GatekeeperParameters, GatekeeperRegistry, GaussianKde, TrialController};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Everything a trial-controller test needs to inspect.
pub struct Harness {
    pub controller: TrialController,
    pub chain_log: Arc<SqliteChainLog>,
    pub ledger: Arc<SqliteParticipantLedger>,
    pub renderer: Arc<MockStimulusRenderer>,
}

/// Resilient wrapper around a shared mock, retrying once with no delay.
pub fn resilient(config: &Config, mock: Arc<MockStimulusRenderer>) -> Arc<ResilientRenderer> {
    Arc::new(
        ResilientRenderer::new(mock, config.task.categories.clone(), &config.renderer).with_retry(1, Duration::ZERO),
    )
}

/// A trial controller on a fresh in-memory database.
pub async fn harness(config: &Config, mock: MockStimulusRenderer, registry: Option<GatekeeperRegistry>) -> Harness {
    let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
    let chain_log = Arc::new(SqliteChainLog::new(pool.clone()));
    let ledger = Arc::new(SqliteParticipantLedger::new(pool));
    let renderer = Arc::new(mock);

    let mut controller = TrialController::new(
        config,
        chain_log.clone(),
        ledger.clone(),
        resilient(config, renderer.clone()),
    )
    .expect("Failed to build trial controller");
    if let Some(registry) = registry {
        controller = controller.with_gatekeepers(Arc::new(registry));
    }

    Harness {
        controller,
        chain_log,
        ledger,
        renderer,
    }
}

/// A consensus coordinator on a fresh in-memory database.
pub async fn coordinator(config: &Config) -> Arc<ConsensusCoordinator> {
    let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
    Arc::new(
        ConsensusCoordinator::new(
            config,
            Arc::new(SqliteChainLog::new(pool.clone())),
            Arc::new(SqliteParticipantLedger::new(pool)),
            resilient(config, Arc::new(MockStimulusRenderer::new())),
        )
        .expect("Failed to build consensus coordinator"),
    )
}

/// A density model concentrated on a single point.
pub fn point_model(center: Vec<f64>, bandwidth: f64) -> GaussianKde {
    let dimensionality = center.len();
    GaussianKde::new(
        GatekeeperParameters {
            tree_data: vec![center],
            bandwidth,
            dimensionality,
            n_samples: 1,
        },
        None,
    )
    .expect("Failed to build density model")
}

/// One point model per category.
pub fn point_registry(models: &[(&str, Vec<f64>)], bandwidth: f64) -> GatekeeperRegistry {
    let models: HashMap<String, GaussianKde> = models
        .iter()
        .map(|(category, center)| ((*category).to_string(), point_model(center.clone(), bandwidth)))
        .collect();
    GatekeeperRegistry::from_models(models)
}

/// A registration for a participant's chain.
pub fn registration(
    participant: &str,
    category: Option<&str>,
    replica: u32,
    trial_type: TrialType,
    choice: Choice,
) -> ChoiceRegistration {
    ChoiceRegistration {
        participant: participant.to_string(),
        category: category.map(str::to_string),
        replica,
        trial_type,
        current_dim: None,
        trial_index: None,
        choice,
    }
}

pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}
