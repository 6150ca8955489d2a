use super::{ImageProvider, ImageRef, SubmissionError};
use crate::core::cancel::CancelToken;
use crate::core::config::GatewayConfig;
use crate::core::model::GenerationRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NAME: &str = "gateway";

#[derive(Serialize)]
struct GatewayRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    error: Option<String>,
}

/// Rate-limited generator behind the application's HTTP gateway.
pub struct GatewayProvider {
    client: Client,
    config: GatewayConfig,
}

impl GatewayProvider {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build gateway HTTP client")?;
        Ok(Self { client, config })
    }

    fn err_transport(source: reqwest::Error) -> SubmissionError {
        SubmissionError::Transport {
            provider: NAME.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ImageProvider for GatewayProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<ImageRef, SubmissionError> {
        cancel.check()?;
        let body = GatewayRequest {
            prompt: &request.prompt,
            width: request.width,
            height: request.height,
            seed: request.seed,
            model: self.config.model.as_deref(),
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(
            "Submitting page {}/{} to gateway (seed {})",
            request.page_number, request.total_pages, request.seed
        );
        let response = cancel
            .run(builder.send())
            .await?
            .map_err(Self::err_transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SubmissionError::RateLimited {
                provider: NAME.to_string(),
            });
        }
        if !status.is_success() {
            let body = cancel
                .run(response.text())
                .await?
                .unwrap_or_default();
            return Err(SubmissionError::Status {
                provider: NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GatewayResponse = cancel
            .run(response.json())
            .await?
            .map_err(|e| SubmissionError::Malformed {
                provider: NAME.to_string(),
                reason: e.to_string(),
            })?;

        match parsed.image_url.filter(|url| !url.is_empty()) {
            Some(url) if parsed.success => Ok(url),
            _ => Err(SubmissionError::Rejected {
                provider: NAME.to_string(),
                reason: parsed
                    .error
                    .unwrap_or_else(|| "no image URL in response".to_string()),
            }),
        }
    }
}
