//! One page, start to finish: submit to the primary provider, fall back to
//! the secondary once, poll for readiness, and settle on a status.

use crate::core::cancel::{CancelToken, Cancelled};
use crate::core::config::{Config, PacingConfig, PollerPreset, PollingConfig};
use crate::core::model::{GenerationRequest, GenerationResult, GenerationStatus, ProgressCallback};
use crate::services::poller::{HttpFetcher, ImageFetcher, ReadinessPoller};
use crate::services::provider::{create_providers, ImageProvider, ProviderPair, SubmissionError};
use anyhow::Result;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage<'a> {
    PromptBuilt,
    Submitted(&'a str),
    SubmissionFailed(&'a str),
    Polling(&'a str),
    Finished(GenerationStatus),
}

impl fmt::Display for Stage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PromptBuilt => write!(f, "PromptBuilt"),
            Stage::Submitted(p) => write!(f, "Submitted({})", p),
            Stage::SubmissionFailed(p) => write!(f, "SubmissionFailed({})", p),
            Stage::Polling(p) => write!(f, "Polling({})", p),
            Stage::Finished(status) => write!(f, "{:?}", status),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Primary,
    Secondary,
}

pub struct GenerationOrchestrator {
    providers: ProviderPair,
    poller: ReadinessPoller,
    primary_preset: PollerPreset,
    secondary_preset: PollerPreset,
    inter_page_delay: Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        providers: ProviderPair,
        poller: ReadinessPoller,
        polling: &PollingConfig,
        pacing: &PacingConfig,
    ) -> Self {
        Self {
            providers,
            poller,
            primary_preset: polling.primary,
            secondary_preset: polling.secondary,
            inter_page_delay: pacing.inter_page_delay(),
        }
    }

    /// Real HTTP providers and fetcher as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpFetcher::from_config(&config.polling)?);
        Self::from_config_with_fetcher(config, fetcher)
    }

    pub fn from_config_with_fetcher(config: &Config, fetcher: Arc<dyn ImageFetcher>) -> Result<Self> {
        let providers = create_providers(config)?;
        let poller = ReadinessPoller::from_config(fetcher, &config.polling);
        Ok(Self::new(providers, poller, &config.polling, &config.pacing))
    }

    fn provider(&self, slot: Slot) -> &dyn ImageProvider {
        match slot {
            Slot::Primary => self.providers.primary.as_ref(),
            Slot::Secondary => self.providers.secondary.as_ref(),
        }
    }

    fn preset(&self, slot: Slot) -> PollerPreset {
        match slot {
            Slot::Primary => self.primary_preset,
            Slot::Secondary => self.secondary_preset,
        }
    }

    fn transition(request: &GenerationRequest, stage: Stage<'_>) {
        debug!(
            "Page {}/{} -> {}",
            request.page_number, request.total_pages, stage
        );
    }

    /// Submits to one provider. Cancellation is split out from ordinary failures.
    async fn try_submit(
        &self,
        slot: Slot,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<Result<String, SubmissionError>, Cancelled> {
        let provider = self.provider(slot);
        Self::transition(request, Stage::Submitted(provider.name()));
        match provider.submit(request, cancel).await {
            Err(SubmissionError::Cancelled(c)) => Err(c),
            other => Ok(other),
        }
    }

    /// Runs one page through submission and polling.
    ///
    /// Never fails for provider reasons; those end up in the result status.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<GenerationResult, Cancelled> {
        Self::transition(request, Stage::PromptBuilt);
        cancel.check()?;

        let (slot, image_ref) = match self.try_submit(Slot::Primary, request, cancel).await? {
            Ok(image_ref) => (Slot::Primary, image_ref),
            Err(primary_err) => {
                let primary = self.provider(Slot::Primary).name();
                Self::transition(request, Stage::SubmissionFailed(primary));
                warn!(
                    "Page {}: {} failed ({}), falling back to {}",
                    request.page_number,
                    primary,
                    primary_err,
                    self.provider(Slot::Secondary).name()
                );
                match self.try_submit(Slot::Secondary, request, cancel).await? {
                    Ok(image_ref) => (Slot::Secondary, image_ref),
                    Err(secondary_err) => {
                        warn!(
                            "Page {}: {} also failed ({}), giving up on this page",
                            request.page_number,
                            self.provider(Slot::Secondary).name(),
                            secondary_err
                        );
                        Self::transition(request, Stage::Finished(GenerationStatus::Failed));
                        return Ok(GenerationResult::failed());
                    }
                }
            }
        };

        let provider_name = self.provider(slot).name().to_string();
        Self::transition(request, Stage::Polling(&provider_name));
        let outcome = self
            .poller
            .wait_until_ready(&image_ref, self.preset(slot), cancel, on_progress)
            .await?;

        let status = if outcome.ready {
            GenerationStatus::Ready
        } else {
            warn!(
                "Page {}: image from {} not confirmed after {} attempts, using it anyway",
                request.page_number, provider_name, outcome.attempts
            );
            GenerationStatus::DegradedReady
        };
        Self::transition(request, Stage::Finished(status));

        Ok(GenerationResult {
            status,
            image_ref: Some(image_ref),
            attempts_used: outcome.attempts,
            observed_size_bytes: outcome.last_size,
            provider: Some(provider_name),
        })
    }

    /// Fixed pause between pages to stay under provider rate limits.
    pub async fn cool_down(&self, cancel: &CancelToken) -> Result<(), Cancelled> {
        if !self.inter_page_delay.is_zero() {
            info!(
                "Waiting {}s before the next page",
                self.inter_page_delay.as_secs()
            );
        }
        cancel.sleep(self.inter_page_delay).await
    }
}
