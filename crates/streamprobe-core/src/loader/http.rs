use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::MonitorSettings;

use super::{LoadError, SegmentDownload, StreamLoader};

/// HTTP loader with connection pooling, manifest retries and backoff.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    manifest_client: Client,
    segment_client: Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpLoader {
    pub fn new(
        manifest_timeout: Duration,
        download_timeout: Duration,
        max_retries: u32,
        base_backoff: Duration,
    ) -> Self {
        Self {
            manifest_client: Self::build_client(manifest_timeout),
            segment_client: Self::build_client(download_timeout),
            max_retries,
            base_backoff,
        }
    }

    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self::new(
            settings.manifest_timeout,
            settings.download_timeout,
            settings.max_retries,
            settings.retry_backoff,
        )
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }

    fn classify(url: &str, error: reqwest::Error) -> LoadError {
        if error.is_timeout() {
            LoadError::Timeout {
                url: url.to_string(),
            }
        } else {
            LoadError::Network {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

impl Default for HttpLoader {
    fn default() -> Self {
        Self::from_settings(&MonitorSettings::default())
    }
}

#[async_trait]
impl StreamLoader for HttpLoader {
    async fn fetch_manifest(&self, url: &str) -> Result<String, LoadError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(url, attempt, backoff_ms = backoff.as_millis(), "Retrying manifest fetch");
                tokio::time::sleep(backoff).await;
            }

            match self.manifest_client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        match response.text().await {
                            Ok(body) => return Ok(body),
                            Err(e) => last_error = Some(Self::classify(url, e)),
                        }
                    } else {
                        let status = response.status().as_u16();
                        let message = response
                            .status()
                            .canonical_reason()
                            .unwrap_or("Unknown")
                            .to_string();
                        warn!(url, status, attempt, "Manifest fetch returned error status");
                        let err = LoadError::Http {
                            url: url.to_string(),
                            status,
                            message,
                        };
                        // Client errors other than 429 will not improve on retry.
                        if (400..500).contains(&status) && status != 429 {
                            return Err(err);
                        }
                        last_error = Some(err);
                    }
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "Manifest fetch failed");
                    last_error = Some(Self::classify(url, e));
                }
            }
        }

        Err(last_error.expect("Retry loop always records an error"))
    }

    async fn fetch_segment(&self, url: &str) -> Result<SegmentDownload, LoadError> {
        let request_start = Instant::now();

        let response = self
            .segment_client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::classify(url, e))?;

        let ttfb_ms = request_start.elapsed().as_secs_f64() * 1000.0;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(LoadError::Http {
                url: url.to_string(),
                status,
                message: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string(),
            });
        }

        let body_start = Instant::now();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(url, e))?;
        let download_ms = body_start.elapsed().as_secs_f64() * 1000.0;

        Ok(SegmentDownload {
            body: body.to_vec(),
            ttfb_ms,
            download_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_loader(retries: u32) -> HttpLoader {
        HttpLoader::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
            retries,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn manifest_returns_body_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXT-X-VERSION:3"))
            .mount(&server)
            .await;

        let loader = quick_loader(0);
        let body = loader
            .fetch_manifest(&format!("{}/index.m3u8", server.uri()))
            .await
            .unwrap();
        assert!(body.contains("#EXTM3U"));
    }

    #[tokio::test]
    async fn manifest_404_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let loader = quick_loader(3);
        let err = loader
            .fetch_manifest(&format!("{}/missing.m3u8", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test]
    async fn manifest_retries_on_500_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/retry.m3u8"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/retry.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nOK"))
            .mount(&server)
            .await;

        let loader = quick_loader(3);
        let body = loader
            .fetch_manifest(&format!("{}/retry.m3u8", server.uri()))
            .await
            .unwrap();
        assert!(body.contains("OK"));
    }

    #[tokio::test]
    async fn segment_download_measures_timing() {
        let server = MockServer::start().await;
        let payload = vec![0x47u8; 188 * 10];
        Mock::given(method("GET"))
            .and(path("/seg_1.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let loader = quick_loader(0);
        let dl = loader
            .fetch_segment(&format!("{}/seg_1.ts", server.uri()))
            .await
            .unwrap();
        assert_eq!(dl.size(), payload.len() as u64);
        assert!(dl.ttfb_ms >= 0.0);
        assert!(dl.download_ms >= 0.0);
    }

    #[tokio::test]
    async fn segment_error_status_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg_9.ts"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let loader = quick_loader(3);
        let err = loader
            .fetch_segment(&format!("{}/seg_9.ts", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(503));
    }
}
