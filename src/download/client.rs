//! Blocking HTTP client for episode downloads: a pause between requests and retries with backoff.

use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; episcrape/0.1)";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_SECS: u64 = 2;
const MAX_REDIRECTS: usize = 10;

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_BACKOFF_SECS: [u64; 2] = [2, 4];
/// Backoff for HTTP 429: the file host rate-limits per IP.
const BACKOFF_429_SECS: [u64; 3] = [30, 60, 120];

/// Outcome of one attempt, used to pick the next step.
enum Attempt {
    Done(reqwest::blocking::Response),
    RetryStatus(reqwest::blocking::Response),
    RetryError(reqwest::Error),
    Fatal(reqwest::Error),
}

/// Blocking client that waits `delay` between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET with retries on timeouts, connection errors, 5xx and 429.
    ///
    /// After the last attempt the final response is returned as-is, even with a retryable
    /// status, so the caller reports the real status code.
    pub fn get_with_retry(
        &mut self,
        url: &str,
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0;
        loop {
            self.wait_delay();
            let last = attempt + 1 >= max_attempts;
            let outcome = match self.inner.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    if !last && (status.is_server_error() || status.as_u16() == 429) {
                        Attempt::RetryStatus(response)
                    } else {
                        Attempt::Done(response)
                    }
                }
                Err(e) if !last && (e.is_timeout() || e.is_connect()) => Attempt::RetryError(e),
                Err(e) => Attempt::Fatal(e),
            };
            self.last_request = Some(Instant::now());

            let backoff = match outcome {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fatal(e) => return Err(e),
                Attempt::RetryStatus(response) => {
                    log::warn!("HTTP {} from {}; retrying", response.status(), url);
                    if response.status().as_u16() == 429 {
                        pick_backoff(&BACKOFF_429_SECS, attempt)
                    } else {
                        pick_backoff(&self.backoff_secs, attempt)
                    }
                }
                Attempt::RetryError(e) => {
                    log::warn!("Request to {} failed ({}); retrying", url, e);
                    pick_backoff(&self.backoff_secs, attempt)
                }
            };
            std::thread::sleep(Duration::from_secs(backoff));
            attempt += 1;
        }
    }

    fn wait_delay(&self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

/// Backoff for the given 0-based attempt; the last entry repeats, an empty list means 1s.
fn pick_backoff(backoff_secs: &[u64], attempt: u32) -> u64 {
    backoff_secs
        .get(attempt as usize)
        .or_else(|| backoff_secs.last())
        .copied()
        .unwrap_or(1)
}

/// Builder for [PoliteClient].
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    connect_timeout_secs: u64,
    timeout_secs: Option<u64>,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            timeout_secs: None,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay between requests in seconds.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Whole-request timeout in seconds, body included. Unset by default since episodes are large.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Number of attempts per request (at least 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry; the last value is reused when short.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(self.timeout_secs.map(Duration::from_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs: self.retry_backoff_secs,
        })
    }
}
