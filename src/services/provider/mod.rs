use crate::core::cancel::{CancelToken, Cancelled};
use crate::core::config::Config;
use crate::core::model::GenerationRequest;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use thiserror::Error;

pub mod gateway;
pub mod pollinations;

pub use gateway::GatewayProvider;
pub use pollinations::PollinationsProvider;

/// Reference to a (possibly not yet rendered) image, usually a URL.
pub type ImageRef = String;

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("{provider} is rate limiting requests")]
    RateLimited { provider: String },
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("malformed response from {provider}: {reason}")]
    Malformed { provider: String, reason: String },
    #[error("{provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl SubmissionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SubmissionError::Cancelled(_))
    }
}

/// Something that accepts a generation request and hands back a reference.
///
/// A returned reference does not mean the image exists yet; readiness is
/// decided by the poller.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<ImageRef, SubmissionError>;
}

/// Primary and secondary providers, in fallback order.
pub struct ProviderPair {
    pub primary: Box<dyn ImageProvider>,
    pub secondary: Box<dyn ImageProvider>,
}

pub fn create_providers(config: &Config) -> Result<ProviderPair> {
    let primary = &config.providers.primary;
    let secondary = &config.providers.secondary;
    info!(
        "Initializing image providers: primary={}, secondary={}",
        primary.endpoint, secondary.base_url
    );
    Ok(ProviderPair {
        primary: Box::new(GatewayProvider::new(primary.clone())?),
        secondary: Box::new(PollinationsProvider::new(secondary.clone())?),
    })
}
