use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::error::PipelineError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub cover: CoverConfig,

    /// Per-style page template overrides, keyed by style name.
    #[serde(default)]
    pub styles: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub primary: GatewayConfig,
    #[serde(default)]
    pub secondary: PollinationsConfig,
}

/// Fast, rate-limited provider reached through the app's backend gateway.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
}

/// Slow, URL-addressed on-demand provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollinationsConfig {
    #[serde(default = "default_pollinations_base_url")]
    pub base_url: String,
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enhance: bool,
    #[serde(default = "default_true")]
    pub nologo: bool,
    #[serde(default)]
    pub health_check: bool,
    #[serde(default = "default_pollinations_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PollerPreset {
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

impl PollerPreset {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollingConfig {
    /// Payloads smaller than this are still placeholders or error pages.
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
    /// Payloads larger than this are the provider's multi-MB placeholder.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
    #[serde(default = "default_primary_preset")]
    pub primary: PollerPreset,
    #[serde(default = "default_secondary_preset")]
    pub secondary: PollerPreset,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PacingConfig {
    #[serde(default = "default_inter_page_delay")]
    pub inter_page_delay_seconds: u64,
}

impl PacingConfig {
    pub fn inter_page_delay(&self) -> Duration {
        Duration::from_secs(self.inter_page_delay_seconds)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_page_size")]
    pub page_width: u32,
    #[serde(default = "default_page_size")]
    pub page_height: u32,
    #[serde(default = "default_page_size")]
    pub cover_width: u32,
    #[serde(default = "default_cover_height")]
    pub cover_height: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoverConfig {
    /// TTF/OTF used for the title overlay. Without it the cover stays bare.
    pub font_path: Option<String>,
    #[serde(default = "default_cover_load_timeout")]
    pub load_timeout_seconds: u64,
    #[serde(default = "default_title_band_ratio")]
    pub title_band_ratio: f32,
    #[serde(default = "default_min_font_size")]
    pub min_font_size: f32,
    #[serde(default = "default_font_step")]
    pub font_step: f32,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl CoverConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_seconds)
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_true() -> bool {
    true
}
fn default_gateway_endpoint() -> String {
    "http://127.0.0.1:8000/api/images/generate/".to_string()
}
fn default_gateway_timeout() -> u64 {
    60
}
fn default_pollinations_base_url() -> String {
    "https://image.pollinations.ai".to_string()
}
fn default_pollinations_timeout() -> u64 {
    20
}
fn default_min_bytes() -> u64 {
    20_000
}
fn default_max_bytes() -> u64 {
    1_500_000
}
fn default_probe_timeout() -> u64 {
    30
}
fn default_primary_preset() -> PollerPreset {
    PollerPreset {
        max_attempts: 10,
        delay_seconds: 3,
    }
}
fn default_secondary_preset() -> PollerPreset {
    PollerPreset {
        max_attempts: 40,
        delay_seconds: 6,
    }
}
fn default_inter_page_delay() -> u64 {
    12
}
fn default_page_size() -> u32 {
    512
}
fn default_cover_height() -> u32 {
    683
}
fn default_cover_load_timeout() -> u64 {
    15
}
fn default_title_band_ratio() -> f32 {
    0.15
}
fn default_min_font_size() -> f32 {
    24.0
}
fn default_font_step() -> f32 {
    3.0
}
fn default_max_lines() -> usize {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            providers: ProvidersConfig::default(),
            polling: PollingConfig::default(),
            pacing: PacingConfig::default(),
            image: ImageConfig::default(),
            cover: CoverConfig::default(),
            styles: HashMap::new(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gateway_endpoint(),
            model: None,
            api_key: None,
            timeout_seconds: default_gateway_timeout(),
        }
    }
}

impl Default for PollinationsConfig {
    fn default() -> Self {
        Self {
            base_url: default_pollinations_base_url(),
            model: None,
            enhance: true,
            nologo: true,
            health_check: false,
            timeout_seconds: default_pollinations_timeout(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            min_bytes: default_min_bytes(),
            max_bytes: default_max_bytes(),
            probe_timeout_seconds: default_probe_timeout(),
            primary: default_primary_preset(),
            secondary: default_secondary_preset(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_page_delay_seconds: default_inter_page_delay(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            page_width: default_page_size(),
            page_height: default_page_size(),
            cover_width: default_page_size(),
            cover_height: default_cover_height(),
        }
    }
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            load_timeout_seconds: default_cover_load_timeout(),
            title_band_ratio: default_title_band_ratio(),
            min_font_size: default_min_font_size(),
            font_step: default_font_step(),
            max_lines: default_max_lines(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.yml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let image = &self.image;
        if image.page_width == 0 || image.page_height == 0 {
            return Err(PipelineError::config("page dimensions must be non-zero"));
        }
        if image.cover_width == 0 || image.cover_height == 0 {
            return Err(PipelineError::config("cover dimensions must be non-zero"));
        }
        if self.polling.min_bytes > self.polling.max_bytes {
            return Err(PipelineError::config(format!(
                "polling.min_bytes ({}) exceeds polling.max_bytes ({})",
                self.polling.min_bytes, self.polling.max_bytes
            )));
        }
        if self.polling.primary.max_attempts == 0 || self.polling.secondary.max_attempts == 0 {
            return Err(PipelineError::config("poller presets need at least one attempt"));
        }
        if !(0.0..=1.0).contains(&self.cover.title_band_ratio) {
            return Err(PipelineError::config("cover.title_band_ratio must be within 0..=1"));
        }
        if self.cover.max_lines == 0 || self.cover.font_step <= 0.0 {
            return Err(PipelineError::config(
                "cover.max_lines and cover.font_step must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.pacing.inter_page_delay_seconds, 12);
        assert_eq!(config.image.cover_height, 683);
        assert_eq!(config.cover.load_timeout_seconds, 15);
        assert_eq!(config.polling.primary.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
output_folder: out
polling:
  min_bytes: 1000
  secondary:
    max_attempts: 5
    delay_seconds: 1
styles:
  cartoon: "MY CARTOON TEMPLATE"
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.output_folder, "out");
        assert_eq!(config.polling.min_bytes, 1000);
        assert_eq!(config.polling.max_bytes, 1_500_000);
        assert_eq!(config.polling.secondary.max_attempts, 5);
        assert_eq!(config.polling.primary, default_primary_preset());
        assert!(config.providers.secondary.enhance);
        assert_eq!(config.styles.get("cartoon").unwrap(), "MY CARTOON TEMPLATE");
    }

    #[test]
    fn test_validate_rejects_inverted_size_band() {
        let mut config = Config::default();
        config.polling.min_bytes = 10;
        config.polling.max_bytes = 5;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(temp_dir.path().join("config.yml"));
        assert!(result.is_err());
    }
}
