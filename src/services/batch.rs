use crate::core::cancel::CancelToken;
use crate::core::config::{Config, ImageConfig};
use crate::core::error::PipelineError;
use crate::core::model::{
    derive_seed, GenerationRequest, GenerationResult, ProgressCallback, StoryIllustrationSet,
    StoryPage,
};
use crate::services::orchestrator::GenerationOrchestrator;
use crate::services::prompt::{ArtStyle, PagePrompt, PromptBuilder, StyleCatalog};
use crate::services::variety::CompositionVarietyEngine;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

/// Story-level inputs shared by every page.
#[derive(Debug, Clone, Copy)]
pub struct StoryContext<'a> {
    pub style: ArtStyle,
    pub character: Option<&'a str>,
    pub color_scheme: Option<&'a str>,
}

/// Runs every page of a story through the orchestrator, strictly in order.
pub struct BatchCoordinator {
    orchestrator: Arc<GenerationOrchestrator>,
    prompts: Arc<PromptBuilder>,
    engine: CompositionVarietyEngine,
    page_width: u32,
    page_height: u32,
}

impl BatchCoordinator {
    pub fn new(
        orchestrator: Arc<GenerationOrchestrator>,
        prompts: Arc<PromptBuilder>,
        image: &ImageConfig,
    ) -> Self {
        Self {
            orchestrator,
            prompts,
            engine: CompositionVarietyEngine::new(),
            page_width: image.page_width,
            page_height: image.page_height,
        }
    }

    /// Replaces the variety engine, e.g. with a seeded one.
    pub fn with_engine(mut self, engine: CompositionVarietyEngine) -> Self {
        self.engine = engine;
        self
    }

    fn build_prompt(
        &mut self,
        page: &StoryPage,
        page_number: usize,
        total_pages: usize,
        story: &StoryContext<'_>,
    ) -> Result<String, PipelineError> {
        if let Some(prompt) = page.image_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(prompt.to_string());
        }
        let composition = self
            .engine
            .next(page_number, total_pages, page.mood.as_deref());
        self.prompts.build(&PagePrompt {
            description: &page.description,
            style: story.style,
            character: story.character,
            composition: Some(&composition),
            color_scheme: story.color_scheme,
            narrative_purpose: page.narrative_purpose.as_deref(),
            mood: page.mood.as_deref(),
        })
    }

    async fn generate_page(
        &mut self,
        page: &StoryPage,
        index: usize,
        total_pages: usize,
        story: &StoryContext<'_>,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, PipelineError> {
        let page_number = index + 1;
        let has_prompt = page.image_prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        if page.description.trim().is_empty() && !has_prompt {
            warn!("Page {} has no description, skipping", page_number);
            return Ok(GenerationResult::failed());
        }

        let prompt = self.build_prompt(page, page_number, total_pages, story)?;
        let request = GenerationRequest {
            prompt,
            width: self.page_width,
            height: self.page_height,
            seed: derive_seed(story.character, index),
            page_number,
            total_pages,
            mood: page.mood.clone(),
            narrative_purpose: page.narrative_purpose.clone(),
        };
        Ok(self.orchestrator.generate(&request, cancel, None).await?)
    }

    /// One result per page, in page order, whatever happens to individual pages.
    ///
    /// On cancellation the remaining pages are recorded as failed and the set
    /// is flagged `cancelled`. Only configuration problems are errors.
    pub async fn run(
        &mut self,
        pages: &[StoryPage],
        story: StoryContext<'_>,
        cancel: &CancelToken,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<StoryIllustrationSet, PipelineError> {
        self.prompts.catalog().ensure_usable()?;
        self.engine.reset();

        let total = pages.len();
        info!(
            "Generating {} illustration(s) in {} style",
            total, story.style
        );
        let mut results = Vec::with_capacity(total);

        for (index, page) in pages.iter().enumerate() {
            let page_number = index + 1;
            if cancel.is_cancelled() {
                break;
            }
            if let Some(report) = on_progress {
                report(
                    page_number,
                    total,
                    &format!("Generating illustration {} of {}", page_number, total),
                );
            }

            match self
                .generate_page(page, index, total, &story, cancel)
                .await
            {
                Ok(result) => {
                    info!(
                        "Page {}/{} finished: {:?}",
                        page_number, total, result.status
                    );
                    results.push(result);
                }
                Err(PipelineError::Cancelled(_)) => break,
                Err(e) => return Err(e),
            }

            if page_number < total && self.orchestrator.cool_down(cancel).await.is_err() {
                break;
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(
                "Story run cancelled after {} of {} page(s)",
                results.len(),
                total
            );
        }
        results.resize_with(total, GenerationResult::failed);
        Ok(StoryIllustrationSet { results, cancelled })
    }
}

/// Generates every page with providers built from `config`.
///
/// Returns one entry per page; failed pages are `None`.
pub async fn generate_story_illustrations(
    config: &Config,
    pages: &[StoryPage],
    style: &str,
    character: Option<&str>,
    color_scheme: Option<&str>,
) -> Result<Vec<Option<String>>> {
    let orchestrator = Arc::new(GenerationOrchestrator::from_config(config)?);
    let prompts = Arc::new(PromptBuilder::new(StyleCatalog::from_config(config)));
    let mut batch = BatchCoordinator::new(orchestrator, prompts, &config.image);
    let set = batch
        .run(
            pages,
            StoryContext {
                style: ArtStyle::parse(style),
                character,
                color_scheme,
            },
            &CancelToken::new(),
            None,
        )
        .await?;
    Ok(set.image_refs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::GenerationStatus;
    use crate::services::orchestrator::tests::{fast_config, orchestrator, MockFetcher, MockProvider};
    use std::sync::Mutex;

    fn coordinator(primary_fails: bool, secondary_fails: bool) -> BatchCoordinator {
        let orch = orchestrator(
            MockProvider::new("primary", primary_fails),
            MockProvider::new("secondary", secondary_fails),
            MockFetcher::with_size(60_000),
        );
        BatchCoordinator::new(
            Arc::new(orch),
            Arc::new(PromptBuilder::new(StyleCatalog::builtin())),
            &fast_config().image,
        )
        .with_engine(CompositionVarietyEngine::with_seed(42))
    }

    fn story() -> StoryContext<'static> {
        StoryContext {
            style: ArtStyle::Watercolor,
            character: Some("a small fox with a red scarf"),
            color_scheme: None,
        }
    }

    fn pages(n: usize) -> Vec<StoryPage> {
        (1..=n)
            .map(|i| StoryPage::new(format!("The fox explores place number {}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_story_yields_empty_set() -> Result<()> {
        let mut batch = coordinator(false, false);
        let set = batch.run(&[], story(), &CancelToken::new(), None).await?;
        assert!(set.is_empty());
        assert!(!set.cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn test_total_failure_keeps_length() -> Result<()> {
        let mut batch = coordinator(true, true);
        let set = batch
            .run(&pages(4), story(), &CancelToken::new(), None)
            .await?;
        assert_eq!(set.len(), 4);
        assert!(set
            .results
            .iter()
            .all(|r| r.status == GenerationStatus::Failed));
        assert_eq!(set.image_refs(), vec![None; 4]);
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_page_fails_without_breaking_order() -> Result<()> {
        let mut batch = coordinator(false, false);
        let mut input = pages(3);
        input[1].description = "   ".to_string();
        let set = batch
            .run(&input, story(), &CancelToken::new(), None)
            .await?;
        assert_eq!(
            set.image_refs(),
            vec![
                Some("mock://primary/1".to_string()),
                None,
                Some("mock://primary/3".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_prebuilt_prompt_is_used_verbatim() -> Result<()> {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let sink = prompts.clone();

        struct Recording(Arc<Mutex<Vec<String>>>);
        #[async_trait::async_trait]
        impl crate::services::provider::ImageProvider for Recording {
            fn name(&self) -> &str {
                "recording"
            }
            async fn submit(
                &self,
                request: &GenerationRequest,
                _cancel: &CancelToken,
            ) -> Result<String, crate::services::provider::SubmissionError> {
                self.0.lock().unwrap().push(request.prompt.clone());
                Ok("mock://recording".to_string())
            }
        }

        let config = fast_config();
        let poller = crate::services::poller::ReadinessPoller::from_config(
            Arc::new(MockFetcher::with_size(60_000)),
            &config.polling,
        );
        let orch = GenerationOrchestrator::new(
            crate::services::provider::ProviderPair {
                primary: Box::new(Recording(sink)),
                secondary: Box::new(MockProvider::new("secondary", true)),
            },
            poller,
            &config.polling,
            &config.pacing,
        );
        let mut batch = BatchCoordinator::new(
            Arc::new(orch),
            Arc::new(PromptBuilder::new(StyleCatalog::builtin())),
            &config.image,
        );

        let mut page = StoryPage::new("ignored");
        page.image_prompt = Some("EXACT PROMPT".to_string());
        batch
            .run(&[page], story(), &CancelToken::new(), None)
            .await?;
        assert_eq!(*prompts.lock().unwrap(), vec!["EXACT PROMPT".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_fills_remaining_pages() -> Result<()> {
        let mut batch = coordinator(false, false);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let cancel_after_two = move |current: usize, _total: usize, _msg: &str| {
            if current == 3 {
                trigger.cancel();
            }
        };
        let set = batch
            .run(&pages(5), story(), &cancel, Some(&cancel_after_two))
            .await?;
        assert_eq!(set.len(), 5);
        assert!(set.cancelled);
        assert!(set.results[0].is_usable());
        assert!(set.results[1].is_usable());
        assert!(set.results[2..]
            .iter()
            .all(|r| r.status == GenerationStatus::Failed));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_catalog_is_an_error() {
        let config = fast_config();
        let orch = orchestrator(
            MockProvider::new("primary", false),
            MockProvider::new("secondary", false),
            MockFetcher::with_size(60_000),
        );
        let mut batch = BatchCoordinator::new(
            Arc::new(orch),
            Arc::new(PromptBuilder::new(StyleCatalog::empty())),
            &config.image,
        );
        let result = batch
            .run(&pages(2), story(), &CancelToken::new(), None)
            .await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }
}
