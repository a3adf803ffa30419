//! Chain identity and the rows of the chain log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Chain key
// ============================================================================

/// Identifies one Markov chain: `(owner, task, replica)`.
///
/// The owner is a participant id, or `team-<n>` for team-shared chains. The
/// task is a category name for per-category chains and the task name for
/// blockwise and GSP-prior chains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainKey {
    pub owner: String,
    pub task: String,
    pub replica: u32,
}

impl ChainKey {
    pub fn new(owner: impl Into<String>, task: impl Into<String>, replica: u32) -> Self {
        Self {
            owner: owner.into(),
            task: task.into(),
            replica,
        }
    }

    /// Key of a team-shared chain.
    pub fn team(team_id: u32, category: impl Into<String>, replica: u32) -> Self {
        Self::new(team_owner(team_id), category, replica)
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.task, self.replica)
    }
}

/// Owner string for a team id.
pub fn team_owner(team_id: u32) -> String {
    format!("team-{team_id}")
}

// ============================================================================
// Readiness
// ============================================================================

/// Which team member may act on a consensus chain.
///
/// Stored on the chain tip; exactly one member is ready while the chain is
/// in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Readiness(BTreeMap<String, bool>);

impl Readiness {
    /// All members not ready except `ready`.
    pub fn only(members: &[String], ready: &str) -> Self {
        Self(
            members
                .iter()
                .map(|member| (member.clone(), member == ready))
                .collect(),
        )
    }

    pub fn is_ready(&self, participant: &str) -> bool {
        self.0.get(participant).copied().unwrap_or(false)
    }

    /// The member currently holding the turn.
    pub fn holder(&self) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, ready)| **ready)
            .map(|(member, _)| member.as_str())
    }
}

// ============================================================================
// Samples
// ============================================================================

/// One persisted row of the chain log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub key: ChainKey,
    /// Completed trials on this chain when the row was written
    pub trial: u32,
    pub state: Vec<f64>,
    pub category: Option<String>,
    /// True when the next trial on this chain is a prior (category) trial
    pub for_prior: bool,
    pub is_proposal: bool,
    pub picked: bool,
    /// Written by the gatekeeper rather than a participant
    pub gatekeeper: bool,
    pub current_dim: Option<usize>,
    pub readiness: Option<Readiness>,
    pub created_at: DateTime<Utc>,
}

/// A row about to be appended to the chain log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub trial: u32,
    pub state: Vec<f64>,
    pub category: Option<String>,
    pub for_prior: bool,
    pub is_proposal: bool,
    pub picked: bool,
    pub gatekeeper: bool,
    pub current_dim: Option<usize>,
    pub readiness: Option<Readiness>,
}

impl NewSample {
    pub fn new(trial: u32, state: Vec<f64>) -> Self {
        Self {
            trial,
            state,
            category: None,
            for_prior: false,
            is_proposal: false,
            picked: false,
            gatekeeper: false,
            current_dim: None,
            readiness: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_optional_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn for_prior(mut self, for_prior: bool) -> Self {
        self.for_prior = for_prior;
        self
    }

    pub fn proposal(mut self, is_proposal: bool) -> Self {
        self.is_proposal = is_proposal;
        self
    }

    pub fn picked(mut self) -> Self {
        self.picked = true;
        self
    }

    pub fn by_gatekeeper(mut self) -> Self {
        self.gatekeeper = true;
        self
    }

    pub fn with_dim(mut self, current_dim: usize) -> Self {
        self.current_dim = Some(current_dim);
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = Some(readiness);
        self
    }
}

/// Bookkeeping for team-shared chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMeta {
    pub turn_order: Vec<String>,
    pub finished: bool,
}

/// Final summary of a chain or a participant's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSummary {
    /// Mean of accepted state vectors.
    Mean(Vec<f64>),
    /// Most frequently accepted category.
    Mode(String),
}

impl ChainSummary {
    /// Component-wise mean; `None` when `states` is empty.
    pub fn mean_of(states: &[Vec<f64>]) -> Option<Self> {
        let first = states.first()?;
        let mut sums = vec![0.0; first.len()];
        for state in states {
            for (sum, value) in sums.iter_mut().zip(state) {
                *sum += value;
            }
        }
        let n = states.len() as f64;
        Some(Self::Mean(sums.into_iter().map(|s| s / n).collect()))
    }

    /// Most frequent label; ties go to the label reached first.
    pub fn mode_of(labels: &[String]) -> Option<Self> {
        let mut counts: Vec<(&String, usize)> = Vec::new();
        for label in labels {
            match counts.iter_mut().find(|(seen, _)| *seen == label) {
                Some((_, count)) => *count += 1,
                None => counts.push((label, 1)),
            }
        }
        let mut best: Option<(&String, usize)> = None;
        for (label, count) in counts {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((label, count));
            }
        }
        best.map(|(label, _)| Self::Mode(label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_key_display() {
        let key = ChainKey::team(4, "happy", 2);
        assert_eq!(key.owner, "team-4");
        assert_eq!(key.to_string(), "team-4/happy#2");
    }

    #[test]
    fn test_readiness_only_one_holder() {
        let members = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let readiness = Readiness::only(&members, "b");
        assert!(readiness.is_ready("b"));
        assert!(!readiness.is_ready("a"));
        assert!(!readiness.is_ready("stranger"));
        assert_eq!(readiness.holder(), Some("b"));
    }

    #[test]
    fn test_readiness_serializes_as_map() {
        let members = vec!["a".to_string(), "b".to_string()];
        let json = serde_json::to_string(&Readiness::only(&members, "a")).unwrap();
        assert_eq!(json, r#"{"a":true,"b":false}"#);
    }

    #[test]
    fn test_mean_summary() {
        let summary = ChainSummary::mean_of(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(summary, ChainSummary::Mean(vec![2.0, 4.0]));
        assert!(ChainSummary::mean_of(&[]).is_none());
    }

    #[test]
    fn test_mode_summary_prefers_first_on_tie() {
        let labels: Vec<String> = ["sad", "happy", "happy", "sad"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ChainSummary::mode_of(&labels), Some(ChainSummary::Mode("sad".into())));
        let labels: Vec<String> = ["sad", "happy", "happy"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ChainSummary::mode_of(&labels), Some(ChainSummary::Mode("happy".into())));
    }
}
