use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::error::PipelineError;
use crate::core::io::{NativeStorage, Storage};
use crate::core::model::{title_seed, CoverArtifact, GenerationRequest};
use crate::services::orchestrator::GenerationOrchestrator;
use crate::services::poller::{HttpFetcher, ImageFetcher};
use crate::services::prompt::{ArtStyle, CoverPrompt, PromptBuilder, StyleCatalog};
use crate::utils::compositor::{ImageCompositor, OverlayError, RasterCompositor};
use anyhow::Result;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const COVER_FILE_NAME: &str = "cover.png";

#[derive(Debug, Clone, Copy)]
pub struct CoverRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub style: ArtStyle,
    pub character: Option<&'a str>,
    pub color_scheme: Option<&'a str>,
}

/// Generates the cover illustration and stamps the title above it.
pub struct CoverComposer {
    orchestrator: Arc<GenerationOrchestrator>,
    prompts: Arc<PromptBuilder>,
    fetcher: Arc<dyn ImageFetcher>,
    compositor: Option<Arc<dyn ImageCompositor>>,
    storage: Arc<dyn Storage>,
    output_folder: String,
    width: u32,
    height: u32,
    load_timeout: Duration,
}

impl CoverComposer {
    pub fn new(
        config: &Config,
        orchestrator: Arc<GenerationOrchestrator>,
        prompts: Arc<PromptBuilder>,
        fetcher: Arc<dyn ImageFetcher>,
        compositor: Option<Arc<dyn ImageCompositor>>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            orchestrator,
            prompts,
            fetcher,
            compositor,
            storage,
            output_folder: config.output_folder.clone(),
            width: config.image.cover_width,
            height: config.image.cover_height,
            load_timeout: config.cover.load_timeout(),
        }
    }

    /// `Ok(None)` when no base illustration could be produced. A failed
    /// overlay still yields the artifact, just without `rendered_overlay_ref`.
    pub async fn compose(
        &self,
        request: &CoverRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<Option<CoverArtifact>, PipelineError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(PipelineError::config("cover title is empty"));
        }
        self.prompts.catalog().ensure_usable()?;

        let prompt = self.prompts.build_cover(&CoverPrompt {
            description: request.description,
            style: request.style,
            character: request.character,
            color_scheme: request.color_scheme,
        })?;
        let generation = GenerationRequest {
            prompt,
            width: self.width,
            height: self.height,
            seed: title_seed(title),
            page_number: 1,
            total_pages: 1,
            mood: None,
            narrative_purpose: None,
        };

        info!("Generating cover for \"{}\"", title);
        let result = self.orchestrator.generate(&generation, cancel, None).await?;
        let Some(base_image_ref) = result.usable_ref().map(str::to_string) else {
            warn!("No base illustration for the cover of \"{}\"", title);
            return Ok(None);
        };

        let rendered_overlay_ref = match self.render_overlay(&base_image_ref, title, cancel).await {
            Ok(path) => Some(path),
            Err(OverlayError::Cancelled(c)) => return Err(c.into()),
            Err(e) => {
                warn!("Title overlay failed, using the bare cover: {}", e);
                None
            }
        };

        Ok(Some(CoverArtifact {
            base_image_ref,
            title: title.to_string(),
            rendered_overlay_ref,
        }))
    }

    async fn render_overlay(
        &self,
        base_image_ref: &str,
        title: &str,
        cancel: &CancelToken,
    ) -> Result<String, OverlayError> {
        let compositor = self.compositor.clone().ok_or(OverlayError::NoFont)?;

        let base = tokio::time::timeout(
            self.load_timeout,
            cancel.run(self.fetcher.fetch(base_image_ref)),
        )
        .await
        .map_err(|_| OverlayError::Timeout)??
        .map_err(|e| OverlayError::Task(format!("{:#}", e)))?;

        let owned_title = title.to_string();
        let png = tokio::task::spawn_blocking(move || compositor.compose_title(&base, &owned_title))
            .await
            .map_err(|e| OverlayError::Task(e.to_string()))??;

        let path = Path::new(&self.output_folder)
            .join(COVER_FILE_NAME)
            .to_string_lossy()
            .into_owned();
        self.storage
            .write(&path, &png)
            .await
            .map_err(|e| OverlayError::Task(format!("{:#}", e)))?;
        Ok(path)
    }
}

/// One-shot cover generation with everything built from `config`.
pub async fn generate_cover_illustration(
    config: &Config,
    title: &str,
    description: &str,
    style: &str,
    character: Option<&str>,
    color_scheme: Option<&str>,
) -> Result<Option<CoverArtifact>> {
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpFetcher::from_config(&config.polling)?);
    let orchestrator = Arc::new(GenerationOrchestrator::from_config_with_fetcher(
        config,
        fetcher.clone(),
    )?);
    let prompts = Arc::new(PromptBuilder::new(StyleCatalog::from_config(config)));
    let compositor = match RasterCompositor::from_config(&config.cover) {
        Ok(c) => Some(Arc::new(c) as Arc<dyn ImageCompositor>),
        Err(e) => {
            warn!("Cover title overlay disabled: {}", e);
            None
        }
    };
    let composer = CoverComposer::new(
        config,
        orchestrator,
        prompts,
        fetcher,
        compositor,
        Arc::new(NativeStorage::new()),
    );
    let artifact = composer
        .compose(
            &CoverRequest {
                title,
                description,
                style: ArtStyle::parse(style),
                character,
                color_scheme,
            },
            &CancelToken::new(),
        )
        .await?;
    Ok(artifact)
}
