//! Convergence diagnostics over chains stored in the chain log.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChainKey, Sample, SamplingVariant};
use crate::domain::ports::{ChainLog, SampleQuery};
use crate::services::convergence::{self, GewekeVerdict};

/// Diagnostics for a pair of chains.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainComparison {
    /// Samples compared per chain (the common tail length)
    pub samples: usize,
    /// R-hat per dimension
    pub r_hat: Vec<f64>,
    pub geweke_a: Option<GewekeVerdict>,
    pub geweke_b: Option<GewekeVerdict>,
}

impl ChainComparison {
    /// Whether both chains mixed: every R-hat below `r_hat_threshold` and
    /// both Geweke verdicts converged.
    pub fn converged(&self, r_hat_threshold: f64) -> bool {
        self.r_hat.iter().all(|r| *r < r_hat_threshold)
            && self.geweke_a.as_ref().is_some_and(|v| v.converged)
            && self.geweke_b.as_ref().is_some_and(|v| v.converged)
    }
}

pub struct DiagnosticsService {
    chain_log: Arc<dyn ChainLog>,
    variant: SamplingVariant,
}

impl DiagnosticsService {
    pub fn new(chain_log: Arc<dyn ChainLog>, variant: SamplingVariant) -> Self {
        Self { chain_log, variant }
    }

    /// States a participant accepted on a chain, in log order.
    ///
    /// Rows written by a prior or category choice carry the tip state over
    /// unchanged and are skipped, so each accepted state counts once.
    pub async fn accepted_states(&self, key: &ChainKey) -> DomainResult<Vec<Vec<f64>>> {
        let samples = self.chain_log.samples(key, SampleQuery::accepted_by_people()).await?;
        Ok(samples
            .into_iter()
            .filter(|sample| self.is_state_choice(sample))
            .map(|sample| sample.state)
            .collect())
    }

    fn is_state_choice(&self, sample: &Sample) -> bool {
        match self.variant {
            SamplingVariant::Blockwise => sample.for_prior,
            // Category picks restart the sweep at dimension 0; slice picks never land there
            SamplingVariant::GspPrior => sample.current_dim != Some(0),
            SamplingVariant::Independent | SamplingVariant::Gsp | SamplingVariant::Consensus => true,
        }
    }

    /// Geweke verdict for one chain.
    pub async fn geweke(&self, key: &ChainKey, threshold: f64) -> DomainResult<GewekeVerdict> {
        let states = self.accepted_states(key).await?;
        convergence::geweke_verdict(&states, threshold).map_err(|e| DomainError::ValidationFailed(e.to_string()))
    }

    /// R-hat and Geweke for two chains.
    ///
    /// Chains of unequal length are compared over their common tail.
    /// A chain too short for Geweke gets no verdict rather than an error.
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub async fn compare(&self, a: &ChainKey, b: &ChainKey, threshold: f64) -> DomainResult<ChainComparison> {
        let states_a = self.accepted_states(a).await?;
        let states_b = self.accepted_states(b).await?;
        let samples = states_a.len().min(states_b.len());

        let tail = |states: &[Vec<f64>]| -> Vec<Vec<Vec<f64>>> {
            states[states.len() - samples..].iter().map(|s| vec![s.clone()]).collect()
        };
        let r_hat = convergence::gelman_rubin(&tail(&states_a), &tail(&states_b))
            .map_err(|e| DomainError::ValidationFailed(e.to_string()))?
            .into_iter()
            .flatten()
            .collect();

        let geweke_a = convergence::geweke_verdict(&states_a, threshold).ok();
        let geweke_b = convergence::geweke_verdict(&states_b, threshold).ok();
        debug!(samples, "compared chains");

        Ok(ChainComparison {
            samples,
            r_hat,
            geweke_a,
            geweke_b,
        })
    }
}
