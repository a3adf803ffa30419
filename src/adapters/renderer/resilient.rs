//! Retrying renderer decorator with a noise fallback.
//!
//! Every render is attempted a fixed number of times with a constant delay.
//! When all attempts fail the participant still gets a stimulus: a noise
//! image, and a uniformly random category as the predicted label.

use backoff::backoff::Backoff;
use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::seq::SliceRandom;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::noise::noise_image;
use crate::domain::models::RendererConfig;
use crate::domain::ports::{RenderError, RenderedStimulus, StimulusRenderer};

pub struct ResilientRenderer {
    inner: Arc<dyn StimulusRenderer>,
    categories: Vec<String>,
    max_attempts: u32,
    retry_delay: Duration,
    noise_size: u32,
}

impl ResilientRenderer {
    pub fn new(inner: Arc<dyn StimulusRenderer>, categories: Vec<String>, config: &RendererConfig) -> Self {
        Self {
            inner,
            categories,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            noise_size: config.noise_size,
        }
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Constant-interval schedule; attempts are bounded by the operation.
    fn schedule(&self) -> ExponentialBackoff {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_delay)
            .with_max_interval(self.retry_delay)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        schedule.reset();
        schedule
    }

    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RenderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RenderError>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0;
        backoff::future::retry_notify(
            self.schedule(),
            move || {
                attempt += 1;
                let current = attempt;
                let pending = call();
                async move {
                    pending.await.map_err(|err| {
                        if current >= max_attempts {
                            BackoffError::permanent(err)
                        } else {
                            BackoffError::transient(err)
                        }
                    })
                }
            },
            |err: RenderError, delay: Duration| {
                warn!(operation, error = %err, retry_in_ms = delay.as_millis() as u64, "stimulus render failed, retrying");
            },
        )
        .await
    }

    fn noise(&self) -> String {
        noise_image(&mut rand::thread_rng(), self.noise_size)
    }

    fn random_label(&self) -> Option<String> {
        self.categories.choose(&mut rand::thread_rng()).cloned()
    }

    /// Render one state. Never fails.
    pub async fn render(&self, latent: &[f64]) -> RenderedStimulus {
        match self.with_retries("generate", || self.inner.render(latent)).await {
            Ok(stimulus) => stimulus,
            Err(err) => {
                warn!(error = %err, attempts = self.max_attempts, "stimulus service unavailable, using noise fallback");
                RenderedStimulus {
                    image: self.noise(),
                    predicted_label: self.random_label(),
                }
            }
        }
    }

    /// Render several states in order. Never fails.
    pub async fn render_batch(&self, latents: &[Vec<f64>]) -> Vec<String> {
        match self.with_retries("generate_batch", || self.inner.render_batch(latents)).await {
            Ok(images) => images,
            Err(err) => {
                warn!(error = %err, attempts = self.max_attempts, "stimulus service unavailable, using noise fallback");
                latents.iter().map(|_| self.noise()).collect()
            }
        }
    }
}
