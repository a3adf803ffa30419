//! Sampling services: proposals, gatekeeping, trial control, consensus and
//! convergence diagnostics.

pub mod attention_check;
pub mod consensus;
pub mod convergence;
pub mod diagnostics;
pub mod gatekeeper;
pub mod proposal;
pub mod stuck_counter;
pub mod trial_controller;

pub use attention_check::{AttentionCheckBank, AttentionPair};
pub use consensus::{ConsensusCoordinator, ConsensusSeat};
pub use convergence::{
    batch_means_variance, gelman_rubin, geweke, geweke_verdict, DiagnosticsError, DimensionVerdict, GewekeVerdict,
};
pub use diagnostics::{ChainComparison, DiagnosticsService};
pub use gatekeeper::{GatekeeperParameters, GatekeeperRegistry, GaussianKde};
pub use proposal::{
    clamp_wrap, euclidean_distance, gaussian_step, init_uniform, slice_grid, ProposalCovariance, ProposalGenerator,
};
pub use stuck_counter::StuckCounters;
pub use trial_controller::TrialController;
