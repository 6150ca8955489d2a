use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Seed used when a story has no character description.
const DEFAULT_BASE_SEED: i64 = 1000;
/// Spacing between consecutive page seeds. Small, so pages stay related.
const PAGE_SEED_STEP: i64 = 10;
const SEED_SPACE: u64 = 1_000_000;

/// `(current, total, message)` progress notification. Observability only.
pub type ProgressCallback = dyn Fn(usize, usize, &str) + Send + Sync;

/// One page of input, as supplied by the story editor.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct StoryPage {
    pub description: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub narrative_purpose: Option<String>,
    /// A fully written prompt that skips prompt construction.
    #[serde(default)]
    pub image_prompt: Option<String>,
}

impl StoryPage {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }
}

/// A story as read from the input file.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct Story {
    #[serde(default)]
    pub title: Option<String>,
    /// Short synopsis, used for the cover.
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub color_scheme: Option<String>,
    #[serde(default)]
    pub pages: Vec<StoryPage>,
}

fn default_style() -> String {
    "cartoon".to_string()
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub page_number: usize,
    pub total_pages: usize,
    pub mood: Option<String>,
    pub narrative_purpose: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Ready,
    DegradedReady,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GenerationResult {
    pub status: GenerationStatus,
    pub image_ref: Option<String>,
    pub attempts_used: u32,
    pub observed_size_bytes: Option<u64>,
    /// Name of the provider that produced `image_ref`.
    #[serde(default)]
    pub provider: Option<String>,
}

impl GenerationResult {
    pub fn pending() -> Self {
        Self {
            status: GenerationStatus::Pending,
            image_ref: None,
            attempts_used: 0,
            observed_size_bytes: None,
            provider: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: GenerationStatus::Failed,
            ..Self::pending()
        }
    }

    /// A usable reference exists (confirmed or best-effort).
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            GenerationStatus::Ready | GenerationStatus::DegradedReady
        ) && self.image_ref.is_some()
    }

    pub fn usable_ref(&self) -> Option<&str> {
        if self.is_usable() {
            self.image_ref.as_deref()
        } else {
            None
        }
    }
}

/// Ordered per-page results. Always one entry per input page.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StoryIllustrationSet {
    pub results: Vec<GenerationResult>,
    /// Set when the run was cancelled; unprocessed pages are `Failed`.
    #[serde(default)]
    pub cancelled: bool,
}

impl StoryIllustrationSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The `(imageRef | null)[]` view handed to UI collaborators.
    pub fn image_refs(&self) -> Vec<Option<String>> {
        self.results
            .iter()
            .map(|r| r.usable_ref().map(str::to_string))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CoverArtifact {
    pub base_image_ref: String,
    pub title: String,
    pub rendered_overlay_ref: Option<String>,
}

fn stable_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Seed for a page: stable hash of the character description plus a small
/// per-page offset, so one character yields related but distinct images.
pub fn derive_seed(character_description: Option<&str>, page_index: usize) -> i64 {
    let base = match character_description.map(str::trim) {
        Some(desc) if !desc.is_empty() => (stable_hash(desc) % SEED_SPACE) as i64 * 100,
        _ => DEFAULT_BASE_SEED,
    };
    base + page_index as i64 * PAGE_SEED_STEP
}

/// Cover seed, keyed on the title rather than the character.
pub fn title_seed(title: &str) -> i64 {
    (stable_hash(title.trim()) % SEED_SPACE) as i64 * 100
}
