//! Chain log port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ChainKey, ChainMeta, NewSample, Sample};

/// Filter for listing a chain's samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleQuery {
    /// Only rows chosen by a participant or the gatekeeper
    pub picked_only: bool,
    /// Exclude rows written by the gatekeeper
    pub human_only: bool,
}

impl SampleQuery {
    /// Rows a participant accepted.
    pub const fn accepted_by_people() -> Self {
        Self {
            picked_only: true,
            human_only: true,
        }
    }
}

/// Append-only, ordered record of samples per chain.
///
/// Rows are written once; only the `picked` flag may be set afterwards.
#[async_trait]
pub trait ChainLog: Send + Sync {
    /// The chain tip.
    async fn latest(&self, key: &ChainKey) -> DomainResult<Option<Sample>>;

    /// The two most recent rows as `(current, proposal)`.
    async fn latest_pair(&self, key: &ChainKey) -> DomainResult<Option<(Sample, Sample)>>;

    /// Append one row and return it with its log id.
    async fn append(&self, key: &ChainKey, sample: &NewSample) -> DomainResult<Sample>;

    /// Mark `picked` (if any) and append `rows`, atomically.
    async fn commit(&self, key: &ChainKey, picked: Option<i64>, rows: &[NewSample]) -> DomainResult<Vec<Sample>>;

    /// Samples of a chain in log order.
    async fn samples(&self, key: &ChainKey, query: SampleQuery) -> DomainResult<Vec<Sample>>;

    /// Sum over the owner's replicas of each replica's highest trial index.
    async fn completed_trials(&self, owner: &str, task: &str) -> DomainResult<u32>;

    /// Replicas of `(owner, task)` that have at least one row.
    async fn replicas(&self, owner: &str, task: &str) -> DomainResult<Vec<u32>>;

    /// Record the turn order of a team-shared chain; no-op if already recorded.
    async fn create_meta(&self, key: &ChainKey, turn_order: &[String]) -> DomainResult<()>;

    async fn meta(&self, key: &ChainKey) -> DomainResult<Option<ChainMeta>>;

    /// Append the first rows of a team-shared chain, atomically claiming
    /// the chain's seed. Returns `None` when the chain was already seeded.
    async fn seed(&self, key: &ChainKey, rows: &[NewSample]) -> DomainResult<Option<Vec<Sample>>>;

    /// Mark `picked` (if any) and flag the chain finished, atomically.
    async fn finish(&self, key: &ChainKey, picked: Option<i64>) -> DomainResult<()>;
}
