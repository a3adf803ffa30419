//! Stimulus renderer adapters.

pub mod http;
pub mod mock;
pub mod noise;
pub mod raw;
pub mod resilient;

pub use http::HttpStimulusRenderer;
pub use mock::MockStimulusRenderer;
pub use raw::RawStimulusRenderer;
pub use resilient::ResilientRenderer;

use std::sync::Arc;

use crate::domain::models::{RendererConfig, RendererMode};
use crate::domain::ports::{RenderError, StimulusRenderer};

/// Build the configured renderer.
pub fn build_renderer(config: &RendererConfig) -> Result<Arc<dyn StimulusRenderer>, RenderError> {
    Ok(match config.mode {
        RendererMode::Http => Arc::new(HttpStimulusRenderer::new(config)?),
        RendererMode::Raw => Arc::new(RawStimulusRenderer),
    })
}
