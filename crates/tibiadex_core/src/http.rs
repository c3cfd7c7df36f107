use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::config::Settings;

/// Network access used by the scraper, image cache and character lookup.
pub trait Fetcher {
    fn get_text(&mut self, url: &str) -> Result<String>;
    fn get_bytes(&mut self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl HttpFetcherConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout_ms: settings.page_timeout_ms,
            rate_limit_ms: env_value_u64("TIBIADEX_RATE_LIMIT_MS", 0),
            max_retries: env_value_usize("TIBIADEX_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("TIBIADEX_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl Fetcher for HttpFetcher {
    fn get_text(&mut self, url: &str) -> Result<String> {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("GET {url} failed with HTTP {status}");
                    }
                    return response
                        .text()
                        .with_context(|| format!("failed to read response body from {url}"));
                }
                Err(error) => {
                    if attempt < self.config.max_retries {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("GET {url} failed"));
                }
            }
        }
        bail!("GET {url} failed after all retries")
    }

    fn get_bytes(&mut self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        self.apply_rate_limit();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status();
        if status != StatusCode::OK {
            bail!("GET {url} returned HTTP {status}");
        }
        let body = response
            .bytes()
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(body.to_vec())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Tries each candidate in order and returns the index and value of the first
/// success. Failures are logged and swallowed.
pub fn first_success<T, F>(candidates: &[String], mut attempt: F) -> Option<(usize, T)>
where
    F: FnMut(&str) -> Result<T>,
{
    for (index, candidate) in candidates.iter().enumerate() {
        match attempt(candidate) {
            Ok(value) => return Some((index, value)),
            Err(error) => tracing::debug!(candidate = %candidate, "candidate failed: {error:#}"),
        }
    }
    None
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
