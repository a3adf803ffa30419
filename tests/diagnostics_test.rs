//! Convergence diagnostics over chains stored in SQLite.

mod common;

use std::sync::Arc;

use common::{harness, registration};
use mcmcp::adapters::renderer::MockStimulusRenderer;
use mcmcp::adapters::sqlite::{create_migrated_test_pool, SqliteChainLog};
use mcmcp::domain::models::{ChainKey, Choice, Config, NewSample, SamplingVariant, TrialRequest, TrialType};
use mcmcp::domain::ports::ChainLog;
use mcmcp::services::convergence::DEFAULT_THRESHOLD;
use mcmcp::services::DiagnosticsService;

async fn fill(chain_log: &SqliteChainLog, key: &ChainKey, states: impl IntoIterator<Item = Vec<f64>>) {
    // Seed rows are not picked and never count
    chain_log.append(key, &NewSample::new(0, vec![99.0, 99.0])).await.unwrap();
    for (trial, state) in states.into_iter().enumerate() {
        let row = NewSample::new(trial as u32 + 1, state).with_category("happy").picked();
        chain_log.append(key, &row).await.unwrap();
    }
}

async fn service() -> (DiagnosticsService, Arc<SqliteChainLog>) {
    let pool = create_migrated_test_pool().await.unwrap();
    let chain_log = Arc::new(SqliteChainLog::new(pool));
    (DiagnosticsService::new(chain_log.clone(), SamplingVariant::Independent), chain_log)
}

#[tokio::test]
async fn test_identical_constant_chains_have_unit_r_hat() {
    let (diagnostics, chain_log) = service().await;
    let a = ChainKey::new("p1", "happy", 1);
    let b = ChainKey::new("p1", "happy", 2);
    fill(&chain_log, &a, (0..20).map(|_| vec![1.0, 2.0])).await;
    fill(&chain_log, &b, (0..20).map(|_| vec![1.0, 2.0])).await;

    let comparison = diagnostics.compare(&a, &b, DEFAULT_THRESHOLD).await.unwrap();
    assert_eq!(comparison.samples, 20);
    assert_eq!(comparison.r_hat, vec![1.0, 1.0]);
    let geweke = comparison.geweke_a.as_ref().unwrap();
    assert!(geweke.dimensions.iter().all(|d| d.z_score == Some(0.0)));
    assert!(comparison.converged(1.1));
}

#[tokio::test]
async fn test_drifting_chain_is_not_converged() {
    let (diagnostics, chain_log) = service().await;
    let key = ChainKey::new("p1", "happy", 1);
    fill(&chain_log, &key, (0..40).map(|i| vec![f64::from(i), 0.0])).await;

    let verdict = diagnostics.geweke(&key, DEFAULT_THRESHOLD).await.unwrap();
    assert!(!verdict.converged);
    assert!(!verdict.dimensions[0].converged);
    assert!(verdict.dimensions[0].z_score.unwrap() < -DEFAULT_THRESHOLD);
    assert!(verdict.dimensions[1].converged);
}

#[tokio::test]
async fn test_unequal_chains_are_compared_over_common_tail() {
    let (diagnostics, chain_log) = service().await;
    let a = ChainKey::new("p1", "happy", 1);
    let b = ChainKey::new("p1", "happy", 2);
    fill(&chain_log, &a, (0..30).map(|i| vec![f64::from(i % 3)])).await;
    fill(&chain_log, &b, (0..12).map(|i| vec![f64::from(i % 3)])).await;

    let comparison = diagnostics.compare(&a, &b, DEFAULT_THRESHOLD).await.unwrap();
    assert_eq!(comparison.samples, 12);
    assert_eq!(comparison.r_hat.len(), 1);
    assert!(comparison.r_hat[0].is_finite());
}

#[tokio::test]
async fn test_short_chain_is_a_validation_error() {
    let (diagnostics, chain_log) = service().await;
    let key = ChainKey::new("p1", "happy", 1);
    fill(&chain_log, &key, (0..3).map(|_| vec![0.0])).await;
    assert!(diagnostics.geweke(&key, DEFAULT_THRESHOLD).await.is_err());
}

#[tokio::test]
async fn test_blockwise_steps_count_each_accepted_state_once() {
    let mut config = Config::default();
    config.task.variant = SamplingVariant::Blockwise;
    config.task.n_chain = 1;
    config.task.dim = 2;
    config.task.max_trial = 5;
    let h = harness(&config, MockStimulusRenderer::new(), None).await;
    h.controller.set_up("p1").await.unwrap();
    let request = TrialRequest::new("p1").with_replica(1);

    let mut chosen = Vec::new();
    for _ in 0..2 {
        let likelihood = h.controller.next_trial(&request).await.unwrap();
        assert_eq!(likelihood.trial_type, TrialType::Likelihood);
        let state = likelihood.proposal_state.clone().unwrap();
        h.controller
            .register_choice(&registration("p1", None, 1, TrialType::Likelihood, Choice::State(state.clone())))
            .await
            .unwrap();
        chosen.push(state);

        let prior = h.controller.next_trial(&request).await.unwrap();
        assert_eq!(prior.trial_type, TrialType::Prior);
        let label = prior.proposal.clone().unwrap();
        h.controller
            .register_choice(&registration("p1", None, 1, TrialType::Prior, Choice::Category(label)))
            .await
            .unwrap();
    }

    let diagnostics = DiagnosticsService::new(h.chain_log.clone(), SamplingVariant::Blockwise);
    let key = ChainKey::new("p1", "mcmcp", 1);
    assert_eq!(diagnostics.accepted_states(&key).await.unwrap(), chosen);
}

#[tokio::test]
async fn test_gsp_prior_category_picks_are_not_states() {
    let pool = create_migrated_test_pool().await.unwrap();
    let chain_log = Arc::new(SqliteChainLog::new(pool));
    let diagnostics = DiagnosticsService::new(chain_log.clone(), SamplingVariant::GspPrior);
    let key = ChainKey::new("p1", "mcmcp", 1);

    chain_log.append(&key, &NewSample::new(0, vec![0.0, 0.0]).with_dim(0)).await.unwrap();
    for (trial, (state, dim)) in [(vec![1.0, 0.0], 1), (vec![1.0, 2.0], 2)].into_iter().enumerate() {
        let row = NewSample::new(trial as u32 + 1, state).with_category("happy").with_dim(dim).picked();
        chain_log.append(&key, &row).await.unwrap();
    }
    let category_pick = NewSample::new(3, vec![1.0, 2.0]).with_category("sad").with_dim(0).picked();
    chain_log.append(&key, &category_pick).await.unwrap();

    assert_eq!(
        diagnostics.accepted_states(&key).await.unwrap(),
        vec![vec![1.0, 0.0], vec![1.0, 2.0]]
    );
}
