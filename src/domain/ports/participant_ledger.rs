//! Participant ledger port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::TeamAssignment;

/// Per-participant counters and team membership.
#[async_trait]
pub trait ParticipantLedger: Send + Sync {
    /// Register a participant; idempotent.
    async fn register(&self, participant: &str) -> DomainResult<()>;

    /// Increment and return the participant's success count for a category.
    async fn increment_success(&self, participant: &str, category: &str) -> DomainResult<u32>;

    async fn success_count(&self, participant: &str, category: &str) -> DomainResult<u32>;

    /// Increment and return the participant's attention-check failures.
    async fn record_attention_failure(&self, participant: &str) -> DomainResult<u32>;

    async fn attention_failures(&self, participant: &str) -> DomainResult<u32>;

    /// Assign the participant to a team of `team_size`, in arrival order.
    ///
    /// Returns the existing assignment for participants already on a team.
    async fn assign_team(&self, participant: &str, team_size: u32) -> DomainResult<TeamAssignment>;

    /// Members of a team in arrival order.
    async fn team_members(&self, team_id: u32) -> DomainResult<Vec<String>>;
}
