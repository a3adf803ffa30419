//! Consensus chains shared by a team.
//!
//! A team walks each (category, replica) chain together. The tip row carries
//! a readiness map with exactly one member marked ready; that member judges
//! the current/proposal pair and either keeps the turn (rejecting the
//! proposal) or passes it on (accepting). Clients poll; in-process callers
//! can also wait on a per-chain notifier.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, instrument};

use crate::adapters::renderer::ResilientRenderer;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    next_in_order, turn_order, ChainKey, ChainMeta, ChainSummary, Config, ConsensusChoice, ConsensusConfig,
    ConsensusRegistration, ConsensusTrial, NewSample, PollOutcome, Readiness, Sample, TaskConfig, TeamAssignment,
};
use crate::domain::ports::{ChainLog, ParticipantLedger, SampleQuery};
use crate::services::proposal::{ProposalCovariance, ProposalGenerator};

/// Identifies one consensus chain from a participant's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusSeat {
    pub participant: String,
    pub team_id: u32,
    pub category: String,
    pub replica: u32,
}

impl ConsensusSeat {
    pub fn new(participant: impl Into<String>, team_id: u32, category: impl Into<String>, replica: u32) -> Self {
        Self {
            participant: participant.into(),
            team_id,
            category: category.into(),
            replica,
        }
    }

    pub fn key(&self) -> ChainKey {
        ChainKey::team(self.team_id, self.category.clone(), self.replica)
    }
}

pub struct ConsensusCoordinator {
    task: TaskConfig,
    consensus: ConsensusConfig,
    generator: ProposalGenerator,
    chain_log: Arc<dyn ChainLog>,
    ledger: Arc<dyn ParticipantLedger>,
    renderer: Arc<ResilientRenderer>,
    notifiers: DashMap<ChainKey, Arc<Notify>>,
}

impl ConsensusCoordinator {
    pub fn new(
        config: &Config,
        chain_log: Arc<dyn ChainLog>,
        ledger: Arc<dyn ParticipantLedger>,
        renderer: Arc<ResilientRenderer>,
    ) -> DomainResult<Self> {
        let covariance = ProposalCovariance::for_task(&config.task)?;
        let generator = ProposalGenerator::new(config.task.effective_ranges(), covariance)?;
        Ok(Self {
            task: config.task.clone(),
            consensus: config.consensus.clone(),
            generator,
            chain_log,
            ledger,
            renderer,
            notifiers: DashMap::new(),
        })
    }

    /// Accepted proposals after which a chain is finished.
    pub fn trials_per_chain(&self) -> u32 {
        (self.task.max_trial / self.task.n_chain.max(1)).max(1)
    }

    fn progress(&self, trial: u32) -> f64 {
        (f64::from(trial) / f64::from(self.trials_per_chain())).min(1.0)
    }

    /// Put a participant on a team. When the team fills, every chain's turn
    /// order is recorded.
    #[instrument(skip(self))]
    pub async fn join(&self, participant: &str) -> DomainResult<TeamAssignment> {
        let assignment = self.ledger.assign_team(participant, self.consensus.team_size).await?;
        if assignment.is_complete() {
            for (index, category) in self.task.categories.iter().enumerate() {
                for replica in 1..=self.task.n_chain {
                    let key = ChainKey::team(assignment.team_id, category.clone(), replica);
                    let order = turn_order(&assignment.members, index, self.task.n_chain, replica);
                    self.chain_log.create_meta(&key, &order).await?;
                }
            }
            info!(team_id = assignment.team_id, members = ?assignment.members, "team complete");
        }
        Ok(assignment)
    }

    /// Check whether a participant may act on a chain.
    #[instrument(skip(self), fields(participant = %seat.participant, team = seat.team_id))]
    pub async fn poll(&self, seat: &ConsensusSeat) -> DomainResult<PollOutcome> {
        let key = self.checked_key(seat)?;
        let Some(meta) = self.chain_log.meta(&key).await? else {
            // Team still filling
            return Ok(PollOutcome::NotReady);
        };
        if !meta.turn_order.contains(&seat.participant) {
            return Err(DomainError::NotYourTurn {
                participant: seat.participant.clone(),
                chain: key.to_string(),
            });
        }
        if meta.finished {
            self.forget(&key);
            return Ok(PollOutcome::Finished);
        }

        let Some((current, proposal)) = self.chain_log.latest_pair(&key).await? else {
            if meta.turn_order.first() == Some(&seat.participant) {
                self.seed(&key, &meta, &seat.participant).await?;
            }
            return Ok(PollOutcome::NotReady);
        };

        let ready = proposal
            .readiness
            .as_ref()
            .is_some_and(|readiness| readiness.is_ready(&seat.participant));
        if !ready {
            return Ok(PollOutcome::NotReady);
        }

        Ok(PollOutcome::Ready(self.trial(&key, current, proposal).await))
    }

    /// Poll until the participant's turn comes up or the chain finishes.
    ///
    /// Wakes on registrations made through this coordinator, and otherwise
    /// re-polls every poll interval. Dropping the future stops waiting.
    pub async fn wait_until_ready(&self, seat: &ConsensusSeat) -> DomainResult<PollOutcome> {
        let key = self.checked_key(seat)?;
        let interval = Duration::from_millis(self.consensus.poll_interval_ms);
        loop {
            let notify = self.notifier(&key);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll(seat).await? {
                PollOutcome::NotReady => {}
                outcome => return Ok(outcome),
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Register the ready participant's decision.
    #[instrument(skip(self), fields(participant = %seat.participant, team = seat.team_id))]
    pub async fn register(&self, seat: &ConsensusSeat, choice: ConsensusChoice) -> DomainResult<ConsensusRegistration> {
        let key = self.checked_key(seat)?;
        let meta = self
            .chain_log
            .meta(&key)
            .await?
            .ok_or_else(|| DomainError::ChainNotFound(key.to_string()))?;
        if meta.finished {
            return Err(DomainError::InvalidChoice(format!("chain {key} is finished")));
        }
        let (current, proposal) = self
            .chain_log
            .latest_pair(&key)
            .await?
            .ok_or_else(|| DomainError::ChainNotFound(key.to_string()))?;

        let readiness = proposal.readiness.clone().unwrap_or_default();
        if !readiness.is_ready(&seat.participant) {
            return Err(DomainError::NotYourTurn {
                participant: seat.participant.clone(),
                chain: key.to_string(),
            });
        }

        let registration = match choice {
            ConsensusChoice::KeepCurrent => {
                let rows = self.pair(&seat.category, current.trial, current.state.clone(), readiness)?;
                self.chain_log.commit(&key, Some(current.id), &rows).await?;
                debug!(chain = %key, "proposal rejected, turn kept");
                ConsensusRegistration {
                    finished: false,
                    progress: self.progress(current.trial),
                    next_participant: Some(seat.participant.clone()),
                    summary: None,
                }
            }
            ConsensusChoice::TakeProposal => {
                let trial = proposal.trial + 1;
                if trial >= self.trials_per_chain() {
                    self.chain_log.finish(&key, Some(proposal.id)).await?;
                    info!(chain = %key, trial, "consensus chain finished");
                    ConsensusRegistration {
                        finished: true,
                        progress: 1.0,
                        next_participant: None,
                        summary: self.summary(&key).await?,
                    }
                } else {
                    let next = next_in_order(&meta.turn_order, &seat.participant)
                        .cloned()
                        .unwrap_or_else(|| seat.participant.clone());
                    let readiness = Readiness::only(&meta.turn_order, &next);
                    let rows = self.pair(&seat.category, trial, proposal.state.clone(), readiness)?;
                    self.chain_log.commit(&key, Some(proposal.id), &rows).await?;
                    debug!(chain = %key, next = %next, "proposal accepted, turn passed");
                    ConsensusRegistration {
                        finished: false,
                        progress: self.progress(trial),
                        next_participant: Some(next),
                        summary: None,
                    }
                }
            }
        };

        self.wake(&key);
        if registration.finished {
            self.forget(&key);
        }
        Ok(registration)
    }

    /// First pair of an empty chain. The seeder's turn is spent.
    async fn seed(&self, key: &ChainKey, meta: &ChainMeta, seeder: &str) -> DomainResult<()> {
        let next = next_in_order(&meta.turn_order, seeder)
            .cloned()
            .unwrap_or_else(|| seeder.to_string());
        let initial = self.generator.initial_state()?;
        let rows = self.pair(&key.task, 0, initial, Readiness::only(&meta.turn_order, &next))?;
        if self.chain_log.seed(key, &rows).await?.is_none() {
            debug!(chain = %key, seeder, "chain already seeded");
            return Ok(());
        }
        info!(chain = %key, seeder, next = %next, "seeded consensus chain");
        self.wake(key);
        Ok(())
    }

    /// A current row and a fresh proposal from it, both carrying `readiness`.
    fn pair(&self, category: &str, trial: u32, current: Vec<f64>, readiness: Readiness) -> DomainResult<[NewSample; 2]> {
        let proposal = self.generator.propose(&current)?;
        Ok([
            NewSample::new(trial, current)
                .with_category(category)
                .with_readiness(readiness.clone()),
            NewSample::new(trial, proposal)
                .with_category(category)
                .proposal(true)
                .with_readiness(readiness),
        ])
    }

    async fn trial(&self, key: &ChainKey, current: Sample, proposal: Sample) -> ConsensusTrial {
        let mut images = self
            .renderer
            .render_batch(&[current.state.clone(), proposal.state.clone()])
            .await
            .into_iter();
        ConsensusTrial {
            table_no: key.replica,
            current_class: key.task.clone(),
            current: images.next().unwrap_or_default(),
            proposal: images.next().unwrap_or_default(),
            current_state: current.state,
            proposal_state: proposal.state,
            progress: self.progress(proposal.trial),
        }
    }

    async fn summary(&self, key: &ChainKey) -> DomainResult<Option<ChainSummary>> {
        let picked = self.chain_log.samples(key, SampleQuery::accepted_by_people()).await?;
        let states: Vec<Vec<f64>> = picked.into_iter().map(|sample| sample.state).collect();
        Ok(ChainSummary::mean_of(&states))
    }

    fn checked_key(&self, seat: &ConsensusSeat) -> DomainResult<ChainKey> {
        if self.task.category_index(&seat.category).is_none() {
            return Err(DomainError::UnknownCategory(seat.category.clone()));
        }
        if seat.replica == 0 || seat.replica > self.task.n_chain {
            return Err(DomainError::ValidationFailed(format!(
                "replica must be between 1 and {}, got {}",
                self.task.n_chain, seat.replica
            )));
        }
        Ok(seat.key())
    }

    fn notifier(&self, key: &ChainKey) -> Arc<Notify> {
        Arc::clone(self.notifiers.entry(key.clone()).or_default().value())
    }

    fn wake(&self, key: &ChainKey) {
        if let Some(notify) = self.notifiers.get(key) {
            notify.notify_waiters();
        }
    }

    /// Drop a finished chain's notifier. Waiters already holding it keep their Arc.
    fn forget(&self, key: &ChainKey) {
        self.notifiers.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::renderer::MockStimulusRenderer;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteChainLog, SqliteParticipantLedger};

    async fn coordinator(team_size: u32) -> Arc<ConsensusCoordinator> {
        let mut config = Config::default();
        config.task.n_chain = 1;
        config.task.max_trial = 2;
        config.consensus.team_size = team_size;
        config.consensus.poll_interval_ms = 20;

        let pool = create_migrated_test_pool().await.unwrap();
        let renderer = Arc::new(ResilientRenderer::new(
            Arc::new(MockStimulusRenderer::new()),
            config.task.categories.clone(),
            &config.renderer,
        ));
        Arc::new(
            ConsensusCoordinator::new(
                &config,
                Arc::new(SqliteChainLog::new(pool.clone())),
                Arc::new(SqliteParticipantLedger::new(pool)),
                renderer,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_poll_before_team_fills() {
        let coordinator = coordinator(2).await;
        let assignment = coordinator.join("a").await.unwrap();
        assert!(!assignment.is_complete());
        let outcome = coordinator.poll(&ConsensusSeat::new("a", 1, "happy", 1)).await.unwrap();
        assert_eq!(outcome, PollOutcome::NotReady);
    }

    #[tokio::test]
    async fn test_solo_team_gets_turn_back() {
        let coordinator = coordinator(1).await;
        coordinator.join("a").await.unwrap();
        let seat = ConsensusSeat::new("a", 1, "happy", 1);

        assert_eq!(coordinator.poll(&seat).await.unwrap(), PollOutcome::NotReady);
        assert!(matches!(coordinator.poll(&seat).await.unwrap(), PollOutcome::Ready(_)));

        let kept = coordinator.register(&seat, ConsensusChoice::KeepCurrent).await.unwrap();
        assert_eq!(kept.next_participant.as_deref(), Some("a"));
        assert!(!kept.finished);
    }

    #[tokio::test]
    async fn test_unknown_category_and_replica() {
        let coordinator = coordinator(1).await;
        let result = coordinator.poll(&ConsensusSeat::new("a", 1, "angry", 1)).await;
        assert!(matches!(result, Err(DomainError::UnknownCategory(_))));
        let result = coordinator.poll(&ConsensusSeat::new("a", 1, "happy", 3)).await;
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_wait_until_ready_wakes_on_registration() {
        let coordinator = coordinator(2).await;
        coordinator.join("a").await.unwrap();
        coordinator.join("b").await.unwrap();

        let seat_a = ConsensusSeat::new("a", 1, "happy", 1);
        let seat_b = ConsensusSeat::new("b", 1, "happy", 1);
        assert_eq!(coordinator.poll(&seat_a).await.unwrap(), PollOutcome::NotReady);

        let ready = coordinator.wait_until_ready(&seat_b).await.unwrap();
        assert!(matches!(ready, PollOutcome::Ready(_)));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let seat_a = seat_a.clone();
            tokio::spawn(async move { coordinator.wait_until_ready(&seat_a).await })
        };
        coordinator.register(&seat_b, ConsensusChoice::TakeProposal).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, PollOutcome::Ready(_)));
    }

    #[tokio::test]
    async fn test_concurrent_first_polls_seed_once() {
        let coordinator = coordinator(1).await;
        coordinator.join("a").await.unwrap();
        let seat = ConsensusSeat::new("a", 1, "happy", 1);

        let (first, second) = tokio::join!(coordinator.poll(&seat), coordinator.poll(&seat));
        first.unwrap();
        second.unwrap();

        let rows = coordinator.chain_log.samples(&seat.key(), SampleQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].is_proposal);
    }

    #[tokio::test]
    async fn test_finished_chain_releases_notifier() {
        let coordinator = coordinator(1).await;
        coordinator.join("a").await.unwrap();
        let seat = ConsensusSeat::new("a", 1, "happy", 1);

        let mut finished = false;
        for _ in 0..coordinator.trials_per_chain() {
            let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.wait_until_ready(&seat))
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(outcome, PollOutcome::Ready(_)));
            assert!(coordinator.notifiers.contains_key(&seat.key()));
            finished = coordinator
                .register(&seat, ConsensusChoice::TakeProposal)
                .await
                .unwrap()
                .finished;
        }
        assert!(finished);
        assert!(coordinator.notifiers.is_empty());

        let outcome = coordinator.wait_until_ready(&seat).await.unwrap();
        assert_eq!(outcome, PollOutcome::Finished);
        assert!(coordinator.notifiers.is_empty());
    }
}
