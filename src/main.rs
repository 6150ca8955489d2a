use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use std::sync::Arc;
use storybook_illustrator::core::cancel::CancelToken;
use storybook_illustrator::core::config::Config;
use storybook_illustrator::core::io::{NativeStorage, Storage};
use storybook_illustrator::services::orchestrator::GenerationOrchestrator;
use storybook_illustrator::services::poller::{HttpFetcher, ImageFetcher};
use storybook_illustrator::services::workflow::WorkflowManager;
use storybook_illustrator::utils::compositor::{ImageCompositor, RasterCompositor};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let story_path = std::env::args()
        .nth(1)
        .context("Usage: storybook-illustrator <story.yml>")?;

    if !std::path::Path::new("config.yml").exists() {
        Config::default().save()?;
        println!("Created a default config.yml; review the provider settings and run again.");
        return Ok(());
    }

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with valid provider settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpFetcher::from_config(&config.polling)?);
    let orchestrator = Arc::new(GenerationOrchestrator::from_config_with_fetcher(
        &config,
        fetcher.clone(),
    )?);
    let compositor: Option<Arc<dyn ImageCompositor>> =
        match RasterCompositor::from_config(&config.cover) {
            Ok(c) => Some(Arc::new(c)),
            Err(e) => {
                warn!("Cover title overlay disabled: {}", e);
                None
            }
        };

    let mut manager = WorkflowManager::new(config, orchestrator, fetcher, compositor, storage);
    let story = manager.load_story(&story_path).await?;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling, finishing the current step...");
            trigger.cancel();
        }
    });

    let pb = ProgressBar::new(story.pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let progress_bar = pb.clone();
    let on_progress = move |current: usize, _total: usize, message: &str| {
        progress_bar.set_position(current.saturating_sub(1) as u64);
        progress_bar.set_message(message.to_string());
    };

    let manifest = manager.run(&story, &cancel, Some(&on_progress)).await?;
    pb.finish_with_message("Illustrations complete");

    let ready = manifest.image_refs.iter().filter(|r| r.is_some()).count();
    println!("{}/{} page(s) illustrated", ready, manifest.image_refs.len());
    if let Some(cover) = &manifest.cover {
        println!(
            "Cover: {}",
            cover
                .rendered_overlay_ref
                .as_deref()
                .unwrap_or(&cover.base_image_ref)
        );
    }
    if manifest.cancelled {
        println!("Run was cancelled before all pages finished.");
    }

    Ok(())
}
