//! Trial controller.
//!
//! One state machine serves the independent, blockwise, GSP and GSP-prior
//! variants. The chain tip decides what comes next; the sampling strategy
//! resolved from configuration decides where proposals come from and who
//! decides them. Every registration appends exactly one row, so a failed
//! request leaves nothing half-committed and can be retried whole.

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::renderer::ResilientRenderer;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AcceptancePolicy, AttentionCheckConfig, AttentionCheckOutcome, ChainKey, ChainSummary, Choice,
    ChoiceRegistration, Config, GatekeeperConfig, LikelihoodProposal, NewSample, PriorProposal,
    RegistrationOutcome, Sample, SamplingStrategy, SamplingVariant, SetUpResponse, TaskConfig, TrialPayload,
    TrialRequest, TrialType,
};
use crate::domain::ports::{ChainLog, ParticipantLedger, SampleQuery};
use crate::services::attention_check::AttentionCheckBank;
use crate::services::gatekeeper::GatekeeperRegistry;
use crate::services::proposal::{euclidean_distance, slice_grid, ProposalCovariance, ProposalGenerator};
use crate::services::stuck_counter::StuckCounters;

/// What the chain tip asks for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Likelihood,
    Prior,
    Slice(usize),
    CategorySelection,
}

impl Phase {
    const fn trial_type(self) -> TrialType {
        match self {
            Self::Likelihood => TrialType::Likelihood,
            Self::Prior => TrialType::Prior,
            Self::Slice(_) => TrialType::Slice,
            Self::CategorySelection => TrialType::CategorySelection,
        }
    }
}

/// Outcome of one pass of the next-trial loop.
enum Step {
    Present(TrialPayload),
    /// The gatekeeper decided and appended this row; look again.
    Decided(Sample),
}

pub struct TrialController {
    task: TaskConfig,
    gatekeeper: GatekeeperConfig,
    attention: AttentionCheckConfig,
    strategy: SamplingStrategy,
    generator: ProposalGenerator,
    chain_log: Arc<dyn ChainLog>,
    ledger: Arc<dyn ParticipantLedger>,
    renderer: Arc<ResilientRenderer>,
    gatekeepers: Option<Arc<GatekeeperRegistry>>,
    attention_checks: Option<Arc<AttentionCheckBank>>,
    stuck: StuckCounters,
}

impl TrialController {
    pub fn new(
        config: &Config,
        chain_log: Arc<dyn ChainLog>,
        ledger: Arc<dyn ParticipantLedger>,
        renderer: Arc<ResilientRenderer>,
    ) -> DomainResult<Self> {
        let task = config.task.clone();
        if task.categories.is_empty() {
            return Err(DomainError::ValidationFailed("a task needs at least one category".to_string()));
        }
        let covariance = ProposalCovariance::for_task(&task)?;
        let generator = ProposalGenerator::new(task.effective_ranges(), covariance)?;
        if generator.dim() != task.dim {
            return Err(DomainError::DimensionMismatch {
                expected: task.dim,
                actual: generator.dim(),
            });
        }

        Ok(Self {
            strategy: SamplingStrategy::from_config(&task, &config.gatekeeper),
            stuck: StuckCounters::new(config.gatekeeper.stuck_patience),
            task,
            gatekeeper: config.gatekeeper.clone(),
            attention: config.attention_check.clone(),
            generator,
            chain_log,
            ledger,
            renderer,
            gatekeepers: None,
            attention_checks: None,
        })
    }

    pub fn with_gatekeepers(mut self, registry: Arc<GatekeeperRegistry>) -> Self {
        self.gatekeepers = Some(registry);
        self
    }

    pub fn with_attention_checks(mut self, bank: Arc<AttentionCheckBank>) -> Self {
        self.attention_checks = Some(bank);
        self
    }

    pub fn strategy(&self) -> &SamplingStrategy {
        &self.strategy
    }

    pub fn stuck_counters(&self) -> &StuckCounters {
        &self.stuck
    }

    // ------------------------------------------------------------------
    // Set-up
    // ------------------------------------------------------------------

    /// Register a participant and seed every chain they will work on.
    ///
    /// Chains that already have rows are left alone, so set-up is idempotent.
    #[instrument(skip(self))]
    pub async fn set_up(&self, participant: &str) -> DomainResult<SetUpResponse> {
        self.ledger.register(participant).await?;

        for (key, category) in self.chain_plan(participant) {
            if self.chain_log.latest(&key).await?.is_none() {
                let row = self.seed_row(category)?;
                self.chain_log.append(&key, &row).await?;
                debug!(chain = %key, "seeded chain");
            }
        }

        info!(participant, variant = self.strategy.variant.as_str(), "participant set up");
        Ok(SetUpResponse {
            participant: participant.to_string(),
            categories: self.task.categories.clone(),
            class_questions: self.task.class_questions.clone(),
            n_chain: self.task.n_chain,
            n_rest: self.task.n_rest,
            max_trial: self.strategy.termination.limit(),
        })
    }

    /// Every chain of a participant with the category its first row gets.
    fn chain_plan(&self, participant: &str) -> Vec<(ChainKey, Option<String>)> {
        let replicas = 1..=self.task.n_chain;
        if self.strategy.variant.is_per_category() {
            return self
                .task
                .categories
                .iter()
                .flat_map(|category| {
                    replicas
                        .clone()
                        .map(move |replica| (ChainKey::new(participant, category.clone(), replica), Some(category.clone())))
                })
                .collect();
        }

        let mut rng = rand::thread_rng();
        let mut shuffled = self.task.categories.clone();
        shuffled.shuffle(&mut rng);
        replicas
            .map(|replica| {
                let category = match self.strategy.variant {
                    SamplingVariant::GspPrior => self.task.categories.choose(&mut rng).cloned(),
                    _ => shuffled.get((replica as usize - 1) % shuffled.len()).cloned(),
                };
                (ChainKey::new(participant, self.task.name.clone(), replica), category)
            })
            .collect()
    }

    /// First row of a chain: a uniform draw, or a density-model draw in
    /// gatekeeper mode.
    fn seed_row(&self, category: Option<String>) -> DomainResult<NewSample> {
        let state = match (&category, self.strategy.likelihood) {
            (Some(category), LikelihoodProposal::Gatekeeper) => self.sample_from(category)?,
            _ => self.generator.initial_state()?,
        };
        let row = NewSample::new(0, state).with_optional_category(category);
        Ok(if self.strategy.variant.is_slice_sampler() {
            row.with_dim(0)
        } else {
            row
        })
    }

    // ------------------------------------------------------------------
    // Next trial
    // ------------------------------------------------------------------

    /// The next trial for a participant's chain.
    #[instrument(skip(self, request), fields(participant = %request.participant, trial_index = ?request.trial_index))]
    pub async fn next_trial(&self, request: &TrialRequest) -> DomainResult<TrialPayload> {
        let replica = match request.replica {
            Some(replica) => replica,
            None => self.random_replica(),
        };
        let key = self.chain_key(&request.participant, request.category.as_deref(), replica)?;
        let mut tip = self.tip(&key).await?;

        let completed = self.chain_log.completed_trials(&key.owner, &key.task).await?;
        if self.strategy.termination.is_finished(completed) {
            return Ok(TrialPayload::done(replica));
        }
        let progress = self.strategy.termination.progress(completed);

        if let Some(payload) = self.attention_check(&key, &tip, progress) {
            return Ok(payload);
        }

        let mut decisions = 0;
        loop {
            let step = match self.phase(&tip) {
                Phase::Likelihood => self.likelihood_step(&key, &tip, progress).await?,
                Phase::Prior => self.prior_step(&key, &tip, progress).await?,
                Phase::Slice(dim_index) => Step::Present(self.slice_trial(&key, &tip, dim_index, progress).await?),
                Phase::CategorySelection => Step::Present(self.category_trial(&key, &tip, progress).await?),
            };

            match step {
                Step::Present(payload) => {
                    debug!(chain = %key, trial_type = payload.trial_type.as_str(), decisions, "presenting trial");
                    return Ok(payload);
                }
                Step::Decided(row) => {
                    decisions += 1;
                    if decisions > self.gatekeeper.max_auto_decisions {
                        warn!(chain = %key, decisions, "gatekeeper kept deciding trials");
                        return Err(DomainError::GatekeeperRejectionLoop {
                            chain: key.to_string(),
                            attempts: decisions,
                        });
                    }
                    tip = row;
                }
            }
        }
    }

    fn phase(&self, tip: &Sample) -> Phase {
        let dim = self.generator.dim();
        match self.strategy.variant {
            SamplingVariant::Gsp => Phase::Slice(tip.current_dim.unwrap_or(0) % dim.max(1)),
            SamplingVariant::GspPrior => match tip.current_dim {
                Some(dim_index) if dim_index < dim => Phase::Slice(dim_index),
                _ => Phase::CategorySelection,
            },
            _ if tip.for_prior => Phase::Prior,
            _ => Phase::Likelihood,
        }
    }

    async fn likelihood_step(&self, key: &ChainKey, tip: &Sample, progress: f64) -> DomainResult<Step> {
        let mut category = self.presented_category(key, tip);

        let proposal = match self.strategy.likelihood {
            LikelihoodProposal::Gatekeeper => {
                if self.stuck.take_if_stuck(key) {
                    if let Some(other) = self.other_category(&category) {
                        info!(
                            chain = %key,
                            from = %category,
                            to = %other,
                            patience = self.stuck.patience(),
                            "chain stuck in one category, forcing a switch"
                        );
                        self.stuck.record_switch(key, &other);
                        category = other;
                    }
                }

                let proposal = self.sample_from(&category)?;
                let distance = euclidean_distance(&tip.state, &proposal)?;
                if distance <= self.gatekeeper.min_proposal_distance {
                    let chosen = coin_flip(tip.state.clone(), proposal);
                    let row = self.chain_log.append(key, &self.gatekeeper_row(tip, chosen, &category)).await?;
                    self.stuck.clear_switch(key);
                    debug!(chain = %key, distance, "proposal too close to current state, decided automatically");
                    return Ok(Step::Decided(row));
                }
                proposal
            }
            LikelihoodProposal::RandomWalk => self.generator.propose(&tip.state)?,
        };

        if let Some(accepted) = self.screen(&category, &tip.state, &proposal)? {
            let chosen = if accepted { proposal } else { tip.state.clone() };
            let row = self.chain_log.append(key, &self.gatekeeper_row(tip, chosen, &category)).await?;
            self.stuck.clear_switch(key);
            debug!(chain = %key, accepted, "likelihood trial decided by gatekeeper");
            return Ok(Step::Decided(row));
        }

        let mut images = self
            .renderer
            .render_batch(&[tip.state.clone(), proposal.clone()])
            .await
            .into_iter();
        let current_image = images.next().unwrap_or_default();
        let proposal_image = images.next().unwrap_or_default();

        Ok(Step::Present(TrialPayload::likelihood(
            key.replica,
            Some(category),
            (tip.state.clone(), current_image),
            (proposal, proposal_image),
            progress,
        )))
    }

    async fn prior_step(&self, key: &ChainKey, tip: &Sample, progress: f64) -> DomainResult<Step> {
        let current = self.chain_category(key, tip);
        let gatekeeper_mode = self.strategy.likelihood == LikelihoodProposal::Gatekeeper;

        let (proposed, stimulus) = match self.strategy.prior {
            PriorProposal::RenderedPrediction => {
                let rendered_state = if gatekeeper_mode {
                    tip.state.clone()
                } else {
                    self.generator.propose(&tip.state)?
                };
                let rendered = self.renderer.render(&rendered_state).await;
                // Outside gatekeeper mode an unchanged label is no proposal at all
                let proposed = match rendered.predicted_label {
                    Some(label) if self.task.category_index(&label).is_some() && (gatekeeper_mode || label != current) => {
                        label
                    }
                    _ => self.other_category(&current).unwrap_or_else(|| current.clone()),
                };
                (proposed, gatekeeper_mode.then_some(rendered.image))
            }
            PriorProposal::UniformOther => (self.other_category(&current).unwrap_or_else(|| current.clone()), None),
        };

        if gatekeeper_mode {
            if proposed == current {
                let stuck = self.stuck.record_same(key);
                let row = NewSample::new(tip.trial, tip.state.clone())
                    .with_category(current.clone())
                    .picked()
                    .by_gatekeeper();
                let row = self.chain_log.append(key, &row).await?;
                debug!(chain = %key, category = %current, stuck, "predicted category unchanged, back to likelihood phase");
                return Ok(Step::Decided(row));
            }
            self.stuck.reset(key);
        }

        let stimulus = match stimulus {
            Some(image) => image,
            None => self.renderer.render(&tip.state).await.image,
        };
        Ok(Step::Present(TrialPayload::prior(
            key.replica,
            tip.state.clone(),
            stimulus,
            current,
            proposed,
            progress,
        )))
    }

    async fn slice_trial(&self, key: &ChainKey, tip: &Sample, dim_index: usize, progress: f64) -> DomainResult<TrialPayload> {
        let range = self
            .generator
            .ranges()
            .get(dim_index)
            .copied()
            .ok_or(DomainError::DimensionMismatch {
                expected: self.generator.dim(),
                actual: dim_index + 1,
            })?;
        let grid = slice_grid(&tip.state, dim_index, range, self.task.resolution)?;
        let stimuli = self.renderer.render_batch(&grid.states).await;

        Ok(TrialPayload::slice(
            key.replica,
            tip.category.clone(),
            tip.state.clone(),
            dim_index,
            grid.values,
            stimuli,
            progress,
        ))
    }

    async fn category_trial(&self, key: &ChainKey, tip: &Sample, progress: f64) -> DomainResult<TrialPayload> {
        let stimulus = self.renderer.render(&tip.state).await.image;
        Ok(TrialPayload::category_selection(
            key.replica,
            tip.state.clone(),
            stimulus,
            tip.category.clone(),
            progress,
        ))
    }

    fn attention_check(&self, key: &ChainKey, tip: &Sample, progress: f64) -> Option<TrialPayload> {
        if !self.attention.enabled {
            return None;
        }
        let bank = self.attention_checks.as_ref()?;
        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() >= self.attention.rate {
            return None;
        }
        let category = self.chain_category(key, tip);
        let pair = bank.choose(&mut rng, &category)?;
        debug!(chain = %key, labels = ?pair.labels, "injecting attention check");
        Some(TrialPayload::attention_check(
            key.replica,
            pair.images.clone(),
            pair.labels.clone(),
            progress,
        ))
    }

    /// With the screening policy, maybe let the gatekeeper decide a
    /// likelihood trial. `Some(true)` accepts the proposal.
    fn screen(&self, category: &str, current: &[f64], proposal: &[f64]) -> DomainResult<Option<bool>> {
        let AcceptancePolicy::GatekeeperScreen { rate } = self.strategy.acceptance else {
            return Ok(None);
        };
        let Some(registry) = self.gatekeepers.as_deref() else {
            return Ok(None);
        };
        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() >= rate {
            return Ok(None);
        }
        let acceptance = registry
            .get(category)?
            .acceptance(current, proposal, self.gatekeeper.temperature)?;
        Ok(Some(rng.gen::<f64>() < acceptance))
    }

    fn gatekeeper_row(&self, tip: &Sample, state: Vec<f64>, category: &str) -> NewSample {
        NewSample::new(tip.trial, state)
            .with_category(category)
            .for_prior(self.strategy.variant.has_prior_phase())
            .picked()
            .by_gatekeeper()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Record a participant's choice on the chain tip.
    #[instrument(
        skip(self, registration),
        fields(
            participant = %registration.participant,
            trial_type = registration.trial_type.as_str(),
            trial_index = ?registration.trial_index
        )
    )]
    pub async fn register_choice(&self, registration: &ChoiceRegistration) -> DomainResult<RegistrationOutcome> {
        let key = self.chain_key(
            &registration.participant,
            registration.category.as_deref(),
            registration.replica,
        )?;
        let tip = self
            .chain_log
            .latest(&key)
            .await?
            .ok_or_else(|| DomainError::ChainNotFound(key.to_string()))?;

        let completed = self.chain_log.completed_trials(&key.owner, &key.task).await?;
        if self.strategy.termination.is_finished(completed) {
            return Ok(RegistrationOutcome {
                finished: true,
                progress: 1.0,
                summary: None,
            });
        }

        let phase = self.phase(&tip);
        let row = self.registration_row(&key, &tip, phase, registration)?;
        let row = self.chain_log.append(&key, &row).await?;

        match phase {
            Phase::Likelihood => {
                self.stuck.clear_switch(&key);
                if let Some(category) = &row.category {
                    self.ledger.increment_success(&registration.participant, category).await?;
                }
            }
            Phase::Prior if row.category == tip.category => {
                self.stuck.record_same(&key);
            }
            Phase::Prior => self.stuck.reset(&key),
            _ => {}
        }

        let completed = self.chain_log.completed_trials(&key.owner, &key.task).await?;
        let finished = self.strategy.termination.is_finished(completed);
        let summary = if finished {
            info!(chain = %key, completed, "participant finished");
            self.summary(&key, phase).await?
        } else {
            None
        };

        Ok(RegistrationOutcome {
            finished,
            progress: self.strategy.termination.progress(completed),
            summary,
        })
    }

    fn registration_row(
        &self,
        key: &ChainKey,
        tip: &Sample,
        phase: Phase,
        registration: &ChoiceRegistration,
    ) -> DomainResult<NewSample> {
        let expected = phase.trial_type();
        if registration.trial_type != expected {
            return Err(DomainError::InvalidChoice(format!(
                "chain {key} expects a {} choice, got {}",
                expected.as_str(),
                registration.trial_type.as_str()
            )));
        }

        match (phase, &registration.choice) {
            (Phase::Likelihood, Choice::State(state)) => {
                let state = self.checked_state(state)?;
                let category = match &registration.category {
                    Some(category) => Some(self.known_category(category)?),
                    None => Some(self.presented_category(key, tip)),
                };
                let row = if self.strategy.variant.has_prior_phase() {
                    NewSample::new(tip.trial, state).for_prior(true)
                } else {
                    NewSample::new(tip.trial + 1, state)
                };
                Ok(row.with_optional_category(category).picked())
            }
            (Phase::Prior, Choice::Category(label)) => Ok(NewSample::new(tip.trial + 1, tip.state.clone())
                .with_category(self.known_category(label)?)
                .picked()),
            (Phase::Slice(dim_index), Choice::State(state)) => {
                if let Some(claimed) = registration.current_dim {
                    if claimed != dim_index {
                        return Err(DomainError::InvalidChoice(format!(
                            "chain {key} is on dimension {dim_index}, choice was for {claimed}"
                        )));
                    }
                }
                let state = self.checked_state(state)?;
                let next_dim = match self.strategy.variant {
                    SamplingVariant::Gsp => (dim_index + 1) % self.generator.dim(),
                    _ => dim_index + 1,
                };
                Ok(NewSample::new(tip.trial + 1, state)
                    .with_optional_category(tip.category.clone())
                    .with_dim(next_dim)
                    .picked())
            }
            (Phase::CategorySelection, Choice::Category(label)) => Ok(NewSample::new(tip.trial + 1, tip.state.clone())
                .with_category(self.known_category(label)?)
                .with_dim(0)
                .picked()),
            (_, choice) => Err(DomainError::InvalidChoice(format!(
                "{choice:?} does not answer a {} trial",
                expected.as_str()
            ))),
        }
    }

    /// Summary over all of the participant's chains for the task.
    async fn summary(&self, key: &ChainKey, phase: Phase) -> DomainResult<Option<ChainSummary>> {
        let mut accepted = Vec::new();
        for replica in self.chain_log.replicas(&key.owner, &key.task).await? {
            let chain = ChainKey::new(key.owner.clone(), key.task.clone(), replica);
            accepted.extend(self.chain_log.samples(&chain, SampleQuery::accepted_by_people()).await?);
        }

        Ok(match phase {
            Phase::Likelihood => {
                let states: Vec<Vec<f64>> = accepted.into_iter().map(|sample| sample.state).collect();
                ChainSummary::mean_of(&states)
            }
            Phase::Prior => {
                let labels: Vec<String> = accepted
                    .into_iter()
                    .filter(|sample| !sample.for_prior)
                    .filter_map(|sample| sample.category)
                    .collect();
                ChainSummary::mode_of(&labels)
            }
            Phase::Slice(_) | Phase::CategorySelection => None,
        })
    }

    /// Record an attention-check answer.
    #[instrument(skip(self))]
    pub async fn register_attention_check(&self, participant: &str, passed: bool) -> DomainResult<AttentionCheckOutcome> {
        let fail_count = if passed {
            self.ledger.attention_failures(participant).await?
        } else {
            self.ledger.record_attention_failure(participant).await?
        };
        let terminate_early = fail_count >= self.attention.max_failures;
        if terminate_early {
            warn!(participant, fail_count, "participant failed too many attention checks");
        }
        Ok(AttentionCheckOutcome {
            fail_count,
            terminate_early,
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn chain_key(&self, participant: &str, category: Option<&str>, replica: u32) -> DomainResult<ChainKey> {
        if replica == 0 || replica > self.task.n_chain {
            return Err(DomainError::ValidationFailed(format!(
                "replica must be between 1 and {}, got {replica}",
                self.task.n_chain
            )));
        }
        if !self.strategy.variant.is_per_category() {
            return Ok(ChainKey::new(participant, self.task.name.clone(), replica));
        }
        let category = category.ok_or_else(|| {
            DomainError::ValidationFailed(format!(
                "{} tasks need a category per request",
                self.strategy.variant.as_str()
            ))
        })?;
        Ok(ChainKey::new(participant, self.known_category(category)?, replica))
    }

    /// The chain tip, seeding the chain first if the participant skipped set-up.
    async fn tip(&self, key: &ChainKey) -> DomainResult<Sample> {
        if let Some(tip) = self.chain_log.latest(key).await? {
            return Ok(tip);
        }
        let category = if self.strategy.variant.is_per_category() {
            Some(key.task.clone())
        } else {
            self.random_category()
        };
        let row = self.seed_row(category)?;
        debug!(chain = %key, "seeding chain on first request");
        self.chain_log.append(key, &row).await
    }

    fn chain_category(&self, key: &ChainKey, tip: &Sample) -> String {
        tip.category.clone().unwrap_or_else(|| key.task.clone())
    }

    /// The category a likelihood trial is shown under: a pending forced
    /// switch wins over the tip's label.
    fn presented_category(&self, key: &ChainKey, tip: &Sample) -> String {
        self.stuck
            .switched_category(key)
            .unwrap_or_else(|| self.chain_category(key, tip))
    }

    fn known_category(&self, category: &str) -> DomainResult<String> {
        self.task
            .category_index(category)
            .map(|_| category.to_string())
            .ok_or_else(|| DomainError::UnknownCategory(category.to_string()))
    }

    fn other_category(&self, current: &str) -> Option<String> {
        let others: Vec<&String> = self.task.categories.iter().filter(|c| *c != current).collect();
        others.choose(&mut rand::thread_rng()).map(|c| (*c).clone())
    }

    fn random_category(&self) -> Option<String> {
        self.task.categories.choose(&mut rand::thread_rng()).cloned()
    }

    fn random_replica(&self) -> u32 {
        rand::thread_rng().gen_range(1..=self.task.n_chain.max(1))
    }

    fn checked_state(&self, state: &[f64]) -> DomainResult<Vec<f64>> {
        if state.len() != self.generator.dim() {
            return Err(DomainError::DimensionMismatch {
                expected: self.generator.dim(),
                actual: state.len(),
            });
        }
        if state.iter().any(|value| !value.is_finite()) {
            return Err(DomainError::InvalidChoice("state has non-finite values".to_string()));
        }
        self.generator.wrap(state)
    }

    fn sample_from(&self, category: &str) -> DomainResult<Vec<f64>> {
        let registry = self.gatekeepers.as_deref().ok_or_else(|| {
            DomainError::ValidationFailed("gatekeeper mode needs loaded density models".to_string())
        })?;
        let sample = registry.get(category)?.sample(&mut rand::thread_rng());
        self.generator.wrap(&sample)
    }
}

fn coin_flip(first: Vec<f64>, second: Vec<f64>) -> Vec<f64> {
    if rand::thread_rng().gen_bool(0.5) {
        first
    } else {
        second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::renderer::MockStimulusRenderer;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteChainLog, SqliteParticipantLedger};
    use std::time::Duration;

    async fn controller(config: &Config) -> (TrialController, Arc<SqliteChainLog>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let chain_log = Arc::new(SqliteChainLog::new(pool.clone()));
        let ledger = Arc::new(SqliteParticipantLedger::new(pool));
        let renderer = Arc::new(
            ResilientRenderer::new(
                Arc::new(MockStimulusRenderer::with_label("sad")),
                config.task.categories.clone(),
                &config.renderer,
            )
            .with_retry(1, Duration::ZERO),
        );
        let controller = TrialController::new(config, chain_log.clone(), ledger, renderer).unwrap();
        (controller, chain_log)
    }

    fn independent_config() -> Config {
        let mut config = Config::default();
        config.task.variant = SamplingVariant::Independent;
        config.task.n_chain = 1;
        config.task.max_trial = 2;
        config
    }

    #[tokio::test]
    async fn test_set_up_is_idempotent() {
        let config = independent_config();
        let (controller, chain_log) = controller(&config).await;

        let response = controller.set_up("p1").await.unwrap();
        assert_eq!(response.categories, vec!["happy", "sad"]);
        controller.set_up("p1").await.unwrap();

        let key = ChainKey::new("p1", "happy", 1);
        let rows = chain_log.samples(&key, SampleQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category.as_deref(), Some("happy"));
        assert_eq!(rows[0].state.len(), config.task.dim);
    }

    #[tokio::test]
    async fn test_per_category_variant_needs_category() {
        let (controller, _) = controller(&independent_config()).await;
        let result = controller.next_trial(&TrialRequest::new("p1").with_replica(1)).await;
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));

        let result = controller
            .next_trial(&TrialRequest::new("p1").with_category("angry").with_replica(1))
            .await;
        assert!(matches!(result, Err(DomainError::UnknownCategory(_))));
    }

    #[tokio::test]
    async fn test_replica_out_of_range() {
        let (controller, _) = controller(&independent_config()).await;
        let result = controller
            .next_trial(&TrialRequest::new("p1").with_category("happy").with_replica(2))
            .await;
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_independent_chain_runs_to_completion() {
        let (controller, chain_log) = controller(&independent_config()).await;
        controller.set_up("p1").await.unwrap();
        let request = TrialRequest::new("p1").with_category("happy").with_replica(1);

        let mut last = None;
        for round in 0..2 {
            let payload = controller.next_trial(&request).await.unwrap();
            assert_eq!(payload.trial_type, TrialType::Likelihood);
            assert_eq!(payload.current_class.as_deref(), Some("happy"));
            let proposal = payload.proposal_state.clone().unwrap();

            let outcome = controller
                .register_choice(&ChoiceRegistration {
                    participant: "p1".into(),
                    category: Some("happy".into()),
                    replica: 1,
                    trial_type: TrialType::Likelihood,
                    current_dim: None,
                    trial_index: Some(round),
                    choice: Choice::State(proposal),
                })
                .await
                .unwrap();
            assert_eq!(outcome.finished, round == 1);
            last = Some(outcome);
        }

        let outcome = last.unwrap();
        assert!((outcome.progress - 1.0).abs() < f64::EPSILON);
        assert!(matches!(outcome.summary, Some(ChainSummary::Mean(ref mean)) if mean.len() == 3));

        let key = ChainKey::new("p1", "happy", 1);
        let accepted = chain_log.samples(&key, SampleQuery::accepted_by_people()).await.unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(controller.next_trial(&request).await.unwrap().trial_type, TrialType::Done);
    }

    #[tokio::test]
    async fn test_wrong_trial_type_is_rejected() {
        let (controller, _) = controller(&independent_config()).await;
        controller.set_up("p1").await.unwrap();
        let result = controller
            .register_choice(&ChoiceRegistration {
                participant: "p1".into(),
                category: Some("happy".into()),
                replica: 1,
                trial_type: TrialType::Prior,
                current_dim: None,
                trial_index: None,
                choice: Choice::Category("sad".into()),
            })
            .await;
        assert!(matches!(result, Err(DomainError::InvalidChoice(_))));
    }

    #[tokio::test]
    async fn test_short_state_is_a_dimension_mismatch() {
        let (controller, _) = controller(&independent_config()).await;
        controller.set_up("p1").await.unwrap();
        let result = controller
            .register_choice(&ChoiceRegistration {
                participant: "p1".into(),
                category: Some("happy".into()),
                replica: 1,
                trial_type: TrialType::Likelihood,
                current_dim: None,
                trial_index: None,
                choice: Choice::State(vec![0.0]),
            })
            .await;
        assert!(matches!(
            result,
            Err(DomainError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn test_register_without_chain_is_not_found() {
        let (controller, _) = controller(&independent_config()).await;
        let result = controller
            .register_choice(&ChoiceRegistration {
                participant: "ghost".into(),
                category: Some("happy".into()),
                replica: 1,
                trial_type: TrialType::Likelihood,
                current_dim: None,
                trial_index: None,
                choice: Choice::State(vec![0.0, 0.0, 0.0]),
            })
            .await;
        assert!(matches!(result, Err(DomainError::ChainNotFound(_))));
    }

    #[tokio::test]
    async fn test_attention_check_failures_terminate_early() {
        let (controller, _) = controller(&independent_config()).await;
        let first = controller.register_attention_check("p1", false).await.unwrap();
        assert_eq!(first.fail_count, 1);
        assert!(!first.terminate_early);

        let passed = controller.register_attention_check("p1", true).await.unwrap();
        assert_eq!(passed.fail_count, 1);

        let second = controller.register_attention_check("p1", false).await.unwrap();
        assert_eq!(second.fail_count, 2);
        assert!(second.terminate_early);
    }
}
