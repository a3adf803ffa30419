//! Trials presented to participants and the choices they register.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

use super::chain::ChainSummary;

/// What a participant is asked to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialType {
    /// Pick between the current and a proposed stimulus.
    Likelihood,
    /// Pick between the current and a proposed category for a stimulus.
    Prior,
    /// A pre-authored pair with a known answer.
    AttentionCheck,
    /// Pick one point along a single dimension (GSP).
    Slice,
    /// Pick the category a stimulus belongs to before a GSP sweep.
    CategorySelection,
    /// Nothing left for this participant.
    Done,
}

impl TrialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Likelihood => "likelihood",
            Self::Prior => "prior",
            Self::AttentionCheck => "attention_check",
            Self::Slice => "slice",
            Self::CategorySelection => "category_selection",
            Self::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "likelihood" => Some(Self::Likelihood),
            "prior" => Some(Self::Prior),
            "attention_check" => Some(Self::AttentionCheck),
            "slice" | "gsp" => Some(Self::Slice),
            "category_selection" | "gsp_prior" => Some(Self::CategorySelection),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// The trial-controller state this trial belongs to.
    pub const fn state(&self) -> TrialState {
        match self {
            Self::Likelihood | Self::Slice => TrialState::AwaitingLikelihoodChoice,
            Self::Prior | Self::CategorySelection => TrialState::AwaitingPriorChoice,
            Self::AttentionCheck => TrialState::AttentionCheck,
            Self::Done => TrialState::Done,
        }
    }
}

/// State of a participant's chain as seen by the trial controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    AwaitingLikelihoodChoice,
    AwaitingPriorChoice,
    AttentionCheck,
    Done,
}

/// A request for the next trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRequest {
    pub participant: String,
    /// Required for per-category variants
    pub category: Option<String>,
    /// Picked at random among the participant's replicas when absent
    pub replica: Option<u32>,
    /// Client-side counter; logged only
    pub trial_index: Option<u32>,
}

impl TrialRequest {
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            category: None,
            replica: None,
            trial_index: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_replica(mut self, replica: u32) -> Self {
        self.replica = Some(replica);
        self
    }
}

/// Payload of a trial. Fields present depend on the variant and phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialPayload {
    pub trial_type: TrialType,
    /// Replica the trial belongs to
    pub table_no: u32,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_state: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stimuli: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_values: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_dim: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_labels: Option<[String; 2]>,
}

impl TrialPayload {
    fn empty(trial_type: TrialType, table_no: u32, progress: f64) -> Self {
        Self {
            trial_type,
            table_no,
            progress,
            current: None,
            proposal: None,
            current_class: None,
            current_state: None,
            proposal_state: None,
            stimuli: None,
            proposed_values: None,
            current_dim: None,
            attention_labels: None,
        }
    }

    pub fn done(table_no: u32) -> Self {
        Self::empty(TrialType::Done, table_no, 1.0)
    }

    /// Current and proposed stimuli for one category.
    pub fn likelihood(
        table_no: u32,
        category: Option<String>,
        current: (Vec<f64>, String),
        proposal: (Vec<f64>, String),
        progress: f64,
    ) -> Self {
        let mut payload = Self::empty(TrialType::Likelihood, table_no, progress);
        payload.current_class = category;
        payload.current_state = Some(current.0);
        payload.current = Some(current.1);
        payload.proposal_state = Some(proposal.0);
        payload.proposal = Some(proposal.1);
        payload
    }

    /// One stimulus and two candidate labels.
    pub fn prior(
        table_no: u32,
        state: Vec<f64>,
        stimulus: String,
        current_category: String,
        proposed_category: String,
        progress: f64,
    ) -> Self {
        let mut payload = Self::empty(TrialType::Prior, table_no, progress);
        payload.current_state = Some(state);
        payload.current = Some(stimulus);
        payload.current_class = Some(current_category);
        payload.proposal = Some(proposed_category);
        payload
    }

    pub fn attention_check(table_no: u32, images: [String; 2], labels: [String; 2], progress: f64) -> Self {
        let [first, second] = images;
        let mut payload = Self::empty(TrialType::AttentionCheck, table_no, progress);
        payload.current = Some(first);
        payload.proposal = Some(second);
        payload.attention_labels = Some(labels);
        payload
    }

    pub fn slice(
        table_no: u32,
        category: Option<String>,
        state: Vec<f64>,
        current_dim: usize,
        proposed_values: Vec<f64>,
        stimuli: Vec<String>,
        progress: f64,
    ) -> Self {
        let mut payload = Self::empty(TrialType::Slice, table_no, progress);
        payload.current_class = category;
        payload.current_state = Some(state);
        payload.current_dim = Some(current_dim);
        payload.proposed_values = Some(proposed_values);
        payload.stimuli = Some(stimuli);
        payload
    }

    pub fn category_selection(
        table_no: u32,
        state: Vec<f64>,
        stimulus: String,
        current_category: Option<String>,
        progress: f64,
    ) -> Self {
        let mut payload = Self::empty(TrialType::CategorySelection, table_no, progress);
        payload.current_state = Some(state);
        payload.current = Some(stimulus);
        payload.current_class = current_category;
        payload
    }

    pub fn state(&self) -> TrialState {
        self.trial_type.state()
    }
}

/// What a participant chose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Choice {
    /// A state vector (likelihood and slice trials).
    State(Vec<f64>),
    /// A category label (prior and category-selection trials).
    Category(String),
}

/// A registered choice for a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRegistration {
    pub participant: String,
    /// Category the trial was shown with
    pub category: Option<String>,
    pub replica: u32,
    pub trial_type: TrialType,
    pub current_dim: Option<usize>,
    /// Client-side counter; logged only
    pub trial_index: Option<u32>,
    pub choice: Choice,
}

/// Response to a registered choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationOutcome {
    #[serde(serialize_with = "serialize_flag")]
    pub finished: bool,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ChainSummary>,
}

/// Result of an attention check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttentionCheckOutcome {
    pub fail_count: u32,
    pub terminate_early: bool,
}

/// Returned when a participant is set up for a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetUpResponse {
    pub participant: String,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub class_questions: BTreeMap<String, String>,
    pub n_chain: u32,
    pub n_rest: u32,
    pub max_trial: u32,
}

/// Clients read `finished` as `0 | 1`.
pub fn serialize_flag<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_type_round_trip_names() {
        for trial_type in [
            TrialType::Likelihood,
            TrialType::Prior,
            TrialType::AttentionCheck,
            TrialType::Slice,
            TrialType::CategorySelection,
            TrialType::Done,
        ] {
            assert_eq!(TrialType::from_str(trial_type.as_str()), Some(trial_type));
        }
        assert_eq!(TrialType::from_str("gsp_prior"), Some(TrialType::CategorySelection));
        assert_eq!(TrialType::from_str("bogus"), None);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(TrialType::Slice.state(), TrialState::AwaitingLikelihoodChoice);
        assert_eq!(TrialType::CategorySelection.state(), TrialState::AwaitingPriorChoice);
        assert_eq!(TrialPayload::done(1).state(), TrialState::Done);
    }

    #[test]
    fn test_choice_is_untagged() {
        let state: Choice = serde_json::from_str("[1.0, 2.5]").unwrap();
        assert_eq!(state, Choice::State(vec![1.0, 2.5]));
        let label: Choice = serde_json::from_str(r#""happy""#).unwrap();
        assert_eq!(label, Choice::Category("happy".into()));
    }

    #[test]
    fn test_outcome_serializes_flag() {
        let outcome = RegistrationOutcome {
            finished: true,
            progress: 1.0,
            summary: Some(ChainSummary::Mode("sad".into())),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["finished"], 1);
        assert_eq!(json["summary"]["mode"], "sad");
    }

    #[test]
    fn test_payload_omits_absent_fields() {
        let payload = TrialPayload::prior(2, vec![0.5], "img".into(), "happy".into(), "sad".into(), 0.5);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["trial_type"], "prior");
        assert_eq!(json["proposal"], "sad");
        assert!(json.get("stimuli").is_none());
    }
}
