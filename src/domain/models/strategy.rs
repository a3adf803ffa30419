//! Sampling strategies selected by task configuration.
//!
//! One trial controller serves every single-participant variant; the
//! variant plus the gatekeeper settings pick the likelihood proposal source,
//! the prior proposal source, the acceptance policy and the termination rule.

use serde::{Deserialize, Serialize};

use super::config::{GatekeeperConfig, TaskConfig};

/// Coordination strategy of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingVariant {
    /// One chain per category and replica, likelihood trials only.
    Independent,
    /// Chains alternate likelihood and prior (category) trials.
    Blockwise,
    /// Gibbs sampling with people: one dimension swept at a time.
    Gsp,
    /// GSP sweeps preceded by a category pick.
    GspPrior,
    /// Team-shared chains with turn-taking.
    Consensus,
}

impl SamplingVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Blockwise => "blockwise",
            Self::Gsp => "gsp",
            Self::GspPrior => "gsp_prior",
            Self::Consensus => "consensus",
        }
    }

    /// Whether each chain belongs to one category (task = category name).
    pub const fn is_per_category(&self) -> bool {
        matches!(self, Self::Independent | Self::Gsp | Self::Consensus)
    }

    /// Whether accepted likelihood choices are followed by a prior trial.
    pub const fn has_prior_phase(&self) -> bool {
        matches!(self, Self::Blockwise)
    }

    pub const fn is_slice_sampler(&self) -> bool {
        matches!(self, Self::Gsp | Self::GspPrior)
    }
}

impl Default for SamplingVariant {
    fn default() -> Self {
        Self::Blockwise
    }
}

/// Where likelihood proposals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodProposal {
    /// Gaussian step from the tip, wrapped into range.
    RandomWalk,
    /// Independence sample from the category's density model.
    Gatekeeper,
}

/// Where prior (category) proposals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorProposal {
    /// A uniformly random category other than the current one.
    UniformOther,
    /// The stimulus service's predicted label for a rendered state.
    RenderedPrediction,
}

impl Default for PriorProposal {
    fn default() -> Self {
        Self::RenderedPrediction
    }
}

/// Who decides likelihood trials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Every likelihood trial is shown to the participant.
    Human,
    /// With probability `rate` the gatekeeper decides the trial itself.
    GatekeeperScreen { rate: f64 },
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self::Human
    }
}

/// When a participant's work on a task (or a category) is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationRule {
    /// Completed trials summed over the participant's chains.
    MaxTrials(u32),
    /// GSP sweeps: `samples` accepted samples of `steps_per_sample` trials each.
    SweepCount { samples: u32, steps_per_sample: u32 },
}

impl TerminationRule {
    pub const fn limit(&self) -> u32 {
        match self {
            Self::MaxTrials(n) => *n,
            Self::SweepCount { samples, steps_per_sample } => *samples * *steps_per_sample,
        }
    }

    pub const fn is_finished(&self, completed: u32) -> bool {
        completed >= self.limit()
    }

    /// Fraction of work done, in `[0, 1]`.
    pub fn progress(&self, completed: u32) -> f64 {
        let limit = self.limit();
        if limit == 0 {
            return 1.0;
        }
        (f64::from(completed) / f64::from(limit)).min(1.0)
    }
}

/// The resolved set of strategies a trial controller runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingStrategy {
    pub variant: SamplingVariant,
    pub likelihood: LikelihoodProposal,
    pub prior: PriorProposal,
    pub acceptance: AcceptancePolicy,
    pub termination: TerminationRule,
}

impl SamplingStrategy {
    pub fn from_config(task: &TaskConfig, gatekeeper: &GatekeeperConfig) -> Self {
        let likelihood = if gatekeeper.enabled {
            LikelihoodProposal::Gatekeeper
        } else {
            LikelihoodProposal::RandomWalk
        };

        let termination = match task.variant {
            SamplingVariant::Gsp => TerminationRule::SweepCount {
                samples: task.max_samples_per_class,
                steps_per_sample: task.dim as u32,
            },
            SamplingVariant::GspPrior => TerminationRule::SweepCount {
                samples: task.max_samples_per_class,
                steps_per_sample: task.dim as u32 + 1,
            },
            _ => TerminationRule::MaxTrials(task.max_trial),
        };

        Self {
            variant: task.variant,
            likelihood,
            prior: task.prior_proposal,
            acceptance: gatekeeper.acceptance,
            termination,
        }
    }
}
