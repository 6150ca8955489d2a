use crate::core::cancel::{CancelToken, Cancelled};
use crate::core::config::{PollerPreset, PollingConfig};
use crate::core::model::ProgressCallback;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// What one probe learned about an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Bytes received. Capped slightly above the probe limit.
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

/// Decides whether probed content is the real image or a placeholder.
pub trait RealnessPredicate: Send + Sync {
    fn is_real(&self, probe: &ProbeResult) -> bool;
}

/// Real images land inside a byte-size band. Small payloads are error pages
/// or stubs, oversized ones are the provider's "still rendering" placeholder.
#[derive(Debug, Clone, Copy)]
pub struct ByteSizeRealness {
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl ByteSizeRealness {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            min_bytes: config.min_bytes,
            max_bytes: config.max_bytes,
        }
    }
}

impl RealnessPredicate for ByteSizeRealness {
    fn is_real(&self, probe: &ProbeResult) -> bool {
        (self.min_bytes..=self.max_bytes).contains(&probe.size_bytes)
    }
}

/// Retrieves image content by reference.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Reads at most about `limit` bytes and reports what was seen.
    async fn probe(&self, image_ref: &str, limit: u64) -> Result<ProbeResult>;

    /// Full content, used when composing the cover.
    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build probe HTTP client")?;
        Ok(Self { client })
    }

    pub fn from_config(config: &PollingConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.probe_timeout_seconds))
    }

    fn is_remote(image_ref: &str) -> bool {
        image_ref.starts_with("http://") || image_ref.starts_with("https://")
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn probe(&self, image_ref: &str, limit: u64) -> Result<ProbeResult> {
        if !Self::is_remote(image_ref) {
            let meta = tokio::fs::metadata(image_ref)
                .await
                .with_context(|| format!("Failed to stat {}", image_ref))?;
            return Ok(ProbeResult {
                size_bytes: meta.len(),
                content_type: None,
            });
        }

        let response = self
            .client
            .get(image_ref)
            .send()
            .await
            .context("Failed to send probe request")?;
        let status = response.status();
        if !status.is_success() {
            bail!("Probe returned HTTP {}", status);
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut size_bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Probe stream error")?;
            size_bytes += chunk.len() as u64;
            if size_bytes > limit {
                break;
            }
        }
        Ok(ProbeResult {
            size_bytes,
            content_type,
        })
    }

    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>> {
        if !Self::is_remote(image_ref) {
            return tokio::fs::read(image_ref)
                .await
                .with_context(|| format!("Failed to read {}", image_ref));
        }
        let response = self
            .client
            .get(image_ref)
            .send()
            .await
            .context("Failed to download image")?
            .error_for_status()
            .context("Image download failed")?;
        let bytes = response.bytes().await.context("Failed to get bytes")?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub ready: bool,
    pub attempts: u32,
    pub last_size: Option<u64>,
}

pub struct ReadinessPoller {
    fetcher: Arc<dyn ImageFetcher>,
    predicate: Box<dyn RealnessPredicate>,
    probe_limit: u64,
}

impl ReadinessPoller {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        predicate: Box<dyn RealnessPredicate>,
        probe_limit: u64,
    ) -> Self {
        Self {
            fetcher,
            predicate,
            probe_limit,
        }
    }

    /// Byte-size heuristic from `config`, probing one byte past the ceiling so
    /// oversized placeholders are recognised without downloading them whole.
    pub fn from_config(fetcher: Arc<dyn ImageFetcher>, config: &PollingConfig) -> Self {
        Self::new(
            fetcher,
            Box::new(ByteSizeRealness::from_config(config)),
            config.max_bytes.saturating_add(1),
        )
    }

    /// Probes `image_ref` until it looks real or `preset.max_attempts` runs out.
    ///
    /// Probe errors count as "not ready". Only cancellation is an error.
    pub async fn wait_until_ready(
        &self,
        image_ref: &str,
        preset: PollerPreset,
        cancel: &CancelToken,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<PollOutcome, Cancelled> {
        let max_attempts = preset.max_attempts.max(1);
        let mut last_size = None;

        for attempt in 1..=max_attempts {
            cancel.check()?;
            if let Some(report) = on_progress {
                report(
                    attempt as usize,
                    max_attempts as usize,
                    "Waiting for image to render",
                );
            }

            match cancel
                .run(self.fetcher.probe(image_ref, self.probe_limit))
                .await?
            {
                Ok(probe) => {
                    last_size = Some(probe.size_bytes);
                    if self.predicate.is_real(&probe) {
                        debug!(
                            "Image ready after {} attempt(s), {} bytes",
                            attempt, probe.size_bytes
                        );
                        return Ok(PollOutcome {
                            ready: true,
                            attempts: attempt,
                            last_size,
                        });
                    }
                    debug!(
                        "Image not ready (attempt {}/{}): {} bytes",
                        attempt, max_attempts, probe.size_bytes
                    );
                }
                Err(e) => {
                    debug!("Probe failed (attempt {}/{}): {:#}", attempt, max_attempts, e);
                }
            }

            if attempt < max_attempts {
                cancel.sleep(preset.delay()).await?;
            }
        }

        Ok(PollOutcome {
            ready: false,
            attempts: max_attempts,
            last_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replays a scripted sequence of probe sizes (`None` = probe error).
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Option<u64>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Option<u64>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Arc::new(Mutex::new(0)),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn probe(&self, _image_ref: &str, _limit: u64) -> Result<ProbeResult> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front().flatten() {
                Some(size_bytes) => Ok(ProbeResult {
                    size_bytes,
                    content_type: None,
                }),
                None => Err(anyhow!("connection reset")),
            }
        }

        async fn fetch(&self, _image_ref: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn band() -> ByteSizeRealness {
        ByteSizeRealness {
            min_bytes: 20_000,
            max_bytes: 1_500_000,
        }
    }

    fn preset(max_attempts: u32) -> PollerPreset {
        PollerPreset {
            max_attempts,
            delay_seconds: 0,
        }
    }

    fn probe(size_bytes: u64) -> ProbeResult {
        ProbeResult {
            size_bytes,
            content_type: None,
        }
    }

    #[test]
    fn test_byte_size_band_boundaries() {
        let band = band();
        assert!(!band.is_real(&probe(19_999)));
        assert!(band.is_real(&probe(20_000)));
        assert!(band.is_real(&probe(1_500_000)));
        assert!(!band.is_real(&probe(1_500_001)));
        assert!(!band.is_real(&probe(0)));
    }

    #[tokio::test]
    async fn test_ready_after_placeholders() -> Result<()> {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Some(4_000_000),
            None,
            Some(80_000),
        ]));
        let calls = fetcher.calls.clone();
        let poller = ReadinessPoller::new(fetcher, Box::new(band()), 1_500_001);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        let report = move |current: usize, total: usize, _msg: &str| {
            sink.lock().unwrap().push((current, total));
        };

        let outcome = poller
            .wait_until_ready("mock://fox", preset(5), &CancelToken::new(), Some(&report))
            .await?;
        assert_eq!(
            outcome,
            PollOutcome {
                ready: true,
                attempts: 3,
                last_size: Some(80_000),
            }
        );
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(*progress.lock().unwrap(), vec![(1, 5), (2, 5), (3, 5)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausts_attempts_without_extra_probe() -> Result<()> {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Some(100); 10]));
        let calls = fetcher.calls.clone();
        let poller = ReadinessPoller::new(fetcher, Box::new(band()), 1_500_001);

        let outcome = poller
            .wait_until_ready("mock://fox", preset(4), &CancelToken::new(), None)
            .await?;
        assert!(!outcome.ready);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.last_size, Some(100));
        assert_eq!(*calls.lock().unwrap(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Some(100); 10]));
        let calls = fetcher.calls.clone();
        let poller = ReadinessPoller::new(fetcher, Box::new(band()), 1_500_001);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = poller
            .wait_until_ready("mock://fox", preset(4), &cancel, None)
            .await;
        assert_eq!(result, Err(Cancelled));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_http_fetcher_stops_reading_past_limit() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0u8; 64 * 1024]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5))?;
        let full = fetcher
            .probe(&format!("{}/big.png", server.uri()), 1_000_000)
            .await?;
        assert_eq!(full.size_bytes, 64 * 1024);
        assert_eq!(full.content_type.as_deref(), Some("image/png"));

        let capped = fetcher
            .probe(&format!("{}/big.png", server.uri()), 10)
            .await?;
        assert!(capped.size_bytes > 10);

        assert!(fetcher
            .probe(&format!("{}/missing.png", server.uri()), 10)
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_http_fetcher_reads_local_files() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file = temp_dir.path().join("page.png");
        std::fs::write(&file, vec![1u8; 2048])?;
        let path = file.to_str().unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(5))?;
        assert_eq!(fetcher.probe(path, 10).await?.size_bytes, 2048);
        assert_eq!(fetcher.fetch(path).await?.len(), 2048);
        Ok(())
    }
}
