//! Renderer that hands the latent vector itself to the client.
//!
//! For piloting a task without a stimulus service; the client draws the
//! stimulus from the numbers.

use async_trait::async_trait;

use crate::domain::ports::{RenderError, RenderedStimulus, StimulusRenderer};

#[derive(Debug, Clone, Copy, Default)]
pub struct RawStimulusRenderer;

fn encode(latent: &[f64]) -> Result<String, RenderError> {
    serde_json::to_string(latent).map_err(|e| RenderError::MalformedPayload(e.to_string()))
}

#[async_trait]
impl StimulusRenderer for RawStimulusRenderer {
    async fn render(&self, latent: &[f64]) -> Result<RenderedStimulus, RenderError> {
        Ok(RenderedStimulus {
            image: encode(latent)?,
            predicted_label: None,
        })
    }

    async fn render_batch(&self, latents: &[Vec<f64>]) -> Result<Vec<String>, RenderError> {
        latents.iter().map(|latent| encode(latent)).collect()
    }
}
