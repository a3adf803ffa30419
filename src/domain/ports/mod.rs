pub mod chain_log;
pub mod participant_ledger;
pub mod renderer;

pub use chain_log::{ChainLog, SampleQuery};
pub use participant_ledger::ParticipantLedger;
pub use renderer::{RenderError, RenderedStimulus, StimulusRenderer};
