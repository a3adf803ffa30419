pub mod chain;
pub mod config;
pub mod strategy;
pub mod team;
pub mod trial;

pub use chain::{team_owner, ChainKey, ChainMeta, ChainSummary, NewSample, Readiness, Sample};
pub use config::{
    AttentionCheckConfig, Config, ConsensusConfig, DatabaseConfig, GatekeeperConfig, LoggingConfig,
    RendererConfig, RendererMode, ServerConfig, TaskConfig,
};
pub use strategy::{
    AcceptancePolicy, LikelihoodProposal, PriorProposal, SamplingStrategy, SamplingVariant,
    TerminationRule,
};
pub use team::{
    next_in_order, turn_order, ConsensusChoice, ConsensusRegistration, ConsensusTrial, PollOutcome,
    TeamAssignment,
};
pub use trial::{
    AttentionCheckOutcome, Choice, ChoiceRegistration, RegistrationOutcome, SetUpResponse,
    TrialPayload, TrialRequest, TrialState, TrialType,
};
