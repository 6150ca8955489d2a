use super::{ImageProvider, ImageRef, SubmissionError};
use crate::core::cancel::CancelToken;
use crate::core::config::PollinationsConfig;
use crate::core::model::GenerationRequest;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const NAME: &str = "pollinations";

/// On-demand generator addressed purely by URL.
///
/// The reference is returned straight away; the provider renders the image
/// when the URL is first fetched, which can take minutes.
pub struct PollinationsProvider {
    client: Client,
    base: Url,
    config: PollinationsConfig,
}

impl PollinationsProvider {
    pub fn new(config: PollinationsConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid pollinations base_url: {}", config.base_url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("pollinations base_url cannot be a base: {}", base));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build pollinations HTTP client")?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    pub fn image_url(&self, request: &GenerationRequest) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("prompt").push(&request.prompt);
        }
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("width", &request.width.to_string())
                .append_pair("height", &request.height.to_string())
                .append_pair("seed", &request.seed.to_string());
            if let Some(model) = &self.config.model {
                query.append_pair("model", model);
            }
            if self.config.nologo {
                query.append_pair("nologo", "true");
            }
            if self.config.enhance {
                query.append_pair("enhance", "true");
            }
        }
        url
    }

    async fn health_check(&self, cancel: &CancelToken) -> Result<(), SubmissionError> {
        let response = cancel
            .run(self.client.get(self.base.clone()).send())
            .await?
            .map_err(|source| SubmissionError::Transport {
                provider: NAME.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SubmissionError::Status {
                provider: NAME.to_string(),
                status: status.as_u16(),
                body: "health check failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<ImageRef, SubmissionError> {
        cancel.check()?;
        if self.config.health_check {
            self.health_check(cancel).await?;
        }
        let url = self.image_url(request);
        debug!("Pollinations URL: {:.100}...", url.as_str());
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            width: 512,
            height: 683,
            seed: 4200,
            page_number: 1,
            total_pages: 1,
            mood: None,
            narrative_purpose: None,
        }
    }

    #[test]
    fn test_image_url_encodes_prompt_and_parameters() {
        let provider = PollinationsProvider::new(PollinationsConfig::default()).unwrap();
        let url = provider.image_url(&request("a fox, in the woods / at night?"));
        let text = url.as_str();
        assert!(text.starts_with("https://image.pollinations.ai/prompt/a%20fox,%20in%20the%20woods%20%2F%20at%20night%3F?"));
        assert!(text.contains("width=512"));
        assert!(text.contains("height=683"));
        assert!(text.contains("seed=4200"));
        assert!(text.ends_with("nologo=true&enhance=true"));
    }

    #[test]
    fn test_trailing_slash_and_model() {
        let provider = PollinationsProvider::new(PollinationsConfig {
            base_url: "https://images.example/".to_string(),
            model: Some("flux".to_string()),
            enhance: false,
            nologo: false,
            ..Default::default()
        })
        .unwrap();
        let url = provider.image_url(&request("fox"));
        assert_eq!(
            url.as_str(),
            "https://images.example/prompt/fox?width=512&height=683&seed=4200&model=flux"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let result = PollinationsProvider::new(PollinationsConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_health_check_failure_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = PollinationsProvider::new(PollinationsConfig {
            base_url: server.uri(),
            health_check: true,
            ..Default::default()
        })
        .unwrap();
        let err = provider
            .submit(&request("fox"), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Status { status: 503, .. }));
    }
}
