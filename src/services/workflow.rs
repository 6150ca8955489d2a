use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::model::{CoverArtifact, GenerationResult, ProgressCallback, Story};
use crate::services::batch::{BatchCoordinator, StoryContext};
use crate::services::cover::{CoverComposer, CoverRequest};
use crate::services::orchestrator::GenerationOrchestrator;
use crate::services::poller::ImageFetcher;
use crate::services::prompt::{ArtStyle, PromptBuilder, StyleCatalog};
use crate::utils::compositor::ImageCompositor;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const MANIFEST_FILE_NAME: &str = "illustrations.json";

/// Everything a run produced, written next to the cover.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IllustrationManifest {
    pub title: Option<String>,
    pub style: ArtStyle,
    pub pages: Vec<GenerationResult>,
    pub image_refs: Vec<Option<String>>,
    pub cover: Option<CoverArtifact>,
    pub cancelled: bool,
}

pub struct WorkflowManager {
    config: Config,
    storage: Arc<dyn Storage>,
    batch: BatchCoordinator,
    cover: CoverComposer,
}

impl WorkflowManager {
    pub fn new(
        config: Config,
        orchestrator: Arc<GenerationOrchestrator>,
        fetcher: Arc<dyn ImageFetcher>,
        compositor: Option<Arc<dyn ImageCompositor>>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let prompts = Arc::new(PromptBuilder::new(StyleCatalog::from_config(&config)));
        let batch = BatchCoordinator::new(orchestrator.clone(), prompts.clone(), &config.image);
        let cover = CoverComposer::new(
            &config,
            orchestrator,
            prompts,
            fetcher,
            compositor,
            storage.clone(),
        );
        Self {
            config,
            storage,
            batch,
            cover,
        }
    }

    pub async fn load_story(&self, path: &str) -> Result<Story> {
        let content = self.storage.read(path).await?;
        let text = std::str::from_utf8(&content)
            .with_context(|| format!("Story file {} is not UTF-8", path))?;
        let story: Story = serde_yaml_ng::from_str(text)
            .with_context(|| format!("Failed to parse story file {}", path))?;
        Ok(story)
    }

    /// Pages first, then the cover, then the manifest.
    pub async fn run(
        &mut self,
        story: &Story,
        cancel: &CancelToken,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<IllustrationManifest> {
        let style = ArtStyle::parse(&story.style);
        let context = StoryContext {
            style,
            character: story.character.as_deref(),
            color_scheme: story.color_scheme.as_deref(),
        };

        let set = self
            .batch
            .run(&story.pages, context, cancel, on_progress)
            .await?;

        let mut cancelled = set.cancelled;
        let cover = match story.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() && !cancelled => {
                let request = CoverRequest {
                    title,
                    description: cover_description(story),
                    style,
                    character: context.character,
                    color_scheme: context.color_scheme,
                };
                match self.cover.compose(&request, cancel).await {
                    Ok(cover) => cover,
                    Err(PipelineError::Cancelled(_)) => {
                        warn!("Cover cancelled, keeping the finished pages");
                        cancelled = true;
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ => None,
        };

        let manifest = IllustrationManifest {
            title: story.title.clone(),
            style,
            image_refs: set.image_refs(),
            pages: set.results,
            cover,
            cancelled,
        };

        let path = Path::new(&self.config.output_folder).join(MANIFEST_FILE_NAME);
        let path_str = path.to_string_lossy();
        self.storage
            .write(&path_str, serde_json::to_string_pretty(&manifest)?.as_bytes())
            .await?;
        info!("Wrote {}", path_str);

        Ok(manifest)
    }
}

/// The story blurb, or the first page's text when the story has no blurb.
fn cover_description(story: &Story) -> &str {
    if story.description.trim().is_empty() {
        story
            .pages
            .first()
            .map(|p| p.description.as_str())
            .unwrap_or_default()
    } else {
        story.description.as_str()
    }
}
