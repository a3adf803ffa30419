//! Teams sharing consensus chains.

use serde::{Deserialize, Serialize};

use super::chain::ChainSummary;
use super::trial::serialize_flag;

/// A participant's team, as assigned on join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamAssignment {
    pub participant: String,
    pub team_id: u32,
    /// Members in arrival order
    pub members: Vec<String>,
    pub team_size: u32,
}

impl TeamAssignment {
    pub fn is_complete(&self) -> bool {
        self.members.len() >= self.team_size as usize
    }
}

/// Turn order of one (category, replica) chain.
///
/// The member list rotated left by `category_index * n_chain + replica - 1`,
/// so every member starts some chain.
pub fn turn_order(members: &[String], category_index: usize, n_chain: u32, replica: u32) -> Vec<String> {
    if members.is_empty() {
        return Vec::new();
    }
    let shift = (category_index * n_chain as usize + replica.saturating_sub(1) as usize) % members.len();
    let mut order = members.to_vec();
    order.rotate_left(shift);
    order
}

/// The member after `participant` in turn order, wrapping around.
pub fn next_in_order<'a>(order: &'a [String], participant: &str) -> Option<&'a String> {
    let position = order.iter().position(|member| member == participant)?;
    order.get((position + 1) % order.len())
}

/// A decision on a consensus chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusChoice {
    /// Reject the proposal; the same participant judges a fresh proposal.
    KeepCurrent,
    /// Accept the proposal; the turn passes on.
    TakeProposal,
}

/// A consensus trial ready for the polling participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusTrial {
    pub table_no: u32,
    pub current_class: String,
    pub current: String,
    pub proposal: String,
    pub current_state: Vec<f64>,
    pub proposal_state: Vec<f64>,
    pub progress: f64,
}

/// Result of polling a consensus chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready(ConsensusTrial),
    NotReady,
    Finished,
}

/// Response to a consensus registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusRegistration {
    #[serde(serialize_with = "serialize_flag")]
    pub finished: bool,
    pub progress: f64,
    /// Member holding the turn after this registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_participant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ChainSummary>,
}
