//! HTTP client for the remote stimulus service.
//!
//! `POST /generate {vector}` returns `{image, pred_label?}`;
//! `POST /generate_batch {vector: [[..]]}` returns `{images: [...]}`.
//! Images come back as bare base64 PNG and are handed to clients as data URLs.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use crate::domain::models::RendererConfig;
use crate::domain::ports::{RenderError, RenderedStimulus, StimulusRenderer};

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Prefix a base64 PNG as a data URL unless it already is one.
pub fn as_data_url(image: String) -> String {
    if image.starts_with("data:") {
        image
    } else {
        format!("{PNG_DATA_URL_PREFIX}{image}")
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    vector: &'a [f64],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    image: String,
    #[serde(default)]
    pred_label: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateBatchRequest<'a> {
    vector: &'a [Vec<f64>],
}

#[derive(Debug, Deserialize)]
struct GenerateBatchResponse {
    images: Vec<String>,
}

/// Rate-limited client for the stimulus service.
pub struct HttpStimulusRenderer {
    base_url: String,
    client: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
}

impl HttpStimulusRenderer {
    pub fn new(config: &RendererConfig) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RenderError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(per_second);
        let limiter = RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst));

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            limiter,
        })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R, RenderError> {
        self.limiter.until_ready().await;

        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RenderError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Status { status: status.as_u16() });
        }

        response
            .json()
            .await
            .map_err(|e| RenderError::MalformedPayload(e.to_string()))
    }
}

#[async_trait]
impl StimulusRenderer for HttpStimulusRenderer {
    async fn render(&self, latent: &[f64]) -> Result<RenderedStimulus, RenderError> {
        let response: GenerateResponse = self.post("/generate", &GenerateRequest { vector: latent }).await?;
        debug!(predicted = ?response.pred_label, "rendered stimulus");
        Ok(RenderedStimulus {
            image: as_data_url(response.image),
            predicted_label: response.pred_label,
        })
    }

    async fn render_batch(&self, latents: &[Vec<f64>]) -> Result<Vec<String>, RenderError> {
        let response: GenerateBatchResponse = self
            .post("/generate_batch", &GenerateBatchRequest { vector: latents })
            .await?;
        if response.images.len() != latents.len() {
            return Err(RenderError::MalformedPayload(format!(
                "expected {} images, got {}",
                latents.len(),
                response.images.len()
            )));
        }
        Ok(response.images.into_iter().map(as_data_url).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn renderer_for(server: &MockServer) -> HttpStimulusRenderer {
        let config = RendererConfig {
            base_url: server.uri(),
            ..RendererConfig::default()
        };
        HttpStimulusRenderer::new(&config).unwrap()
    }

    #[test]
    fn test_as_data_url() {
        assert_eq!(as_data_url("abc".into()), "data:image/png;base64,abc");
        assert_eq!(as_data_url("data:image/png;base64,abc".into()), "data:image/png;base64,abc");
    }

    #[tokio::test]
    async fn test_render_single() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(body_json(json!({"vector": [0.5, -1.0]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image": "AAAA", "pred_label": "happy"})))
            .expect(1)
            .mount(&server)
            .await;

        let stimulus = renderer_for(&server).render(&[0.5, -1.0]).await.unwrap();
        assert_eq!(stimulus.image, "data:image/png;base64,AAAA");
        assert_eq!(stimulus.predicted_label.as_deref(), Some("happy"));
    }

    #[tokio::test]
    async fn test_render_batch_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": ["one", "two"]})))
            .mount(&server)
            .await;

        let images = renderer_for(&server)
            .render_batch(&[vec![0.0], vec![1.0]])
            .await
            .unwrap();
        assert_eq!(images, vec!["data:image/png;base64,one", "data:image/png;base64,two"]);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = renderer_for(&server).render(&[0.0]).await;
        assert!(matches!(result, Err(RenderError::Status { status: 503 })));
    }

    #[tokio::test]
    async fn test_short_batch_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": ["one"]})))
            .mount(&server)
            .await;

        let result = renderer_for(&server).render_batch(&[vec![0.0], vec![1.0]]).await;
        assert!(matches!(result, Err(RenderError::MalformedPayload(_))));
    }
}
