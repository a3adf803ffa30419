//! MCMCP - Markov Chain Monte Carlo with People
//!
//! Runs Metropolis-Hastings chains whose accept step is a human choice:
//! participants pick between the current and a proposed stimulus, and the
//! accepted states sample their internal category representations.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): chain, trial and team models, ports, errors
//! - **Service Layer** (`services`): trial controller, consensus coordinator,
//!   gatekeeper density models, proposals and convergence diagnostics
//! - **Adapters** (`adapters`): SQLite chain log, stimulus renderers, HTTP API
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, setup
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    ChainKey, ChainSummary, Choice, ChoiceRegistration, Config, SamplingStrategy, SamplingVariant, TrialPayload,
    TrialRequest, TrialType,
};
pub use domain::ports::{ChainLog, ParticipantLedger, StimulusRenderer};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::setup::{build_engine, Engine};
pub use services::{ConsensusCoordinator, DiagnosticsService, GatekeeperRegistry, TrialController};
