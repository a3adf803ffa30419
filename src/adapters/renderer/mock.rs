//! Mock stimulus renderer for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use crate::domain::ports::{RenderError, RenderedStimulus, StimulusRenderer};

/// Renders `mock:<json>` stimuli with a configurable predicted label and
/// an optional number of leading failures.
#[derive(Debug, Default)]
pub struct MockStimulusRenderer {
    predicted_label: RwLock<Option<String>>,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl MockStimulusRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            predicted_label: RwLock::new(Some(label.into())),
            ..Self::default()
        }
    }

    /// Fail the next `count` calls.
    pub fn failing(count: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(count),
            ..Self::default()
        }
    }

    pub async fn set_label(&self, label: Option<String>) {
        *self.predicted_label.write().await = label;
    }

    /// Calls made so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) -> Result<(), RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(RenderError::Unreachable("mock failure".to_string()))
        } else {
            Ok(())
        }
    }
}

fn mock_image(latent: &[f64]) -> String {
    format!("mock:{}", serde_json::to_string(latent).unwrap_or_default())
}

#[async_trait]
impl StimulusRenderer for MockStimulusRenderer {
    async fn render(&self, latent: &[f64]) -> Result<RenderedStimulus, RenderError> {
        self.tick()?;
        Ok(RenderedStimulus {
            image: mock_image(latent),
            predicted_label: self.predicted_label.read().await.clone(),
        })
    }

    async fn render_batch(&self, latents: &[Vec<f64>]) -> Result<Vec<String>, RenderError> {
        self.tick()?;
        Ok(latents.iter().map(|latent| mock_image(latent)).collect())
    }
}
