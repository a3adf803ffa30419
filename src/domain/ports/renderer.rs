//! Stimulus renderer port.
//!
//! Turns latent states into displayable stimuli. Rendering happens in a
//! remote service; failures are absorbed by `ResilientRenderer` and never
//! reach participants.

use async_trait::async_trait;
use thiserror::Error;

/// A rendered stimulus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStimulus {
    /// `data:image/png;base64,...`, or the raw latent in raw mode
    pub image: String,
    /// The service's classification of the stimulus, when it provides one
    pub predicted_label: Option<String>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Stimulus service unreachable: {0}")]
    Unreachable(String),

    #[error("Stimulus service returned status {status}")]
    Status { status: u16 },

    #[error("Malformed stimulus payload: {0}")]
    MalformedPayload(String),
}

#[async_trait]
pub trait StimulusRenderer: Send + Sync {
    /// Render one latent state, with its predicted label.
    async fn render(&self, latent: &[f64]) -> Result<RenderedStimulus, RenderError>;

    /// Render several states in one call, in order.
    async fn render_batch(&self, latents: &[Vec<f64>]) -> Result<Vec<String>, RenderError>;
}
