// src/fetch/mod.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

pub mod census;
pub mod fred;

const USER_AGENT: &str = concat!("popimpact/", env!("CARGO_PKG_VERSION"));

/// Query parameters that must never reach a log line.
const SECRET_PARAMS: &[&str] = &["api_key", "key"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not reach {url}: {message}")]
    Connect { url: String, message: String },

    #[error("server error {status} from {url}")]
    Server { url: String, status: u16 },

    #[error("rate limited by {url}")]
    RateLimited { url: String },

    #[error("request to {url} rejected with {status}")]
    Client { url: String, status: u16 },

    #[error("unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },
}

impl FetchError {
    /// Worth another attempt: timeouts, connection failures, 5xx and 429.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. }
                | FetchError::Connect { .. }
                | FetchError::Server { .. }
                | FetchError::RateLimited { .. }
        )
    }

    pub fn payload(url: &Url, message: impl Into<String>) -> Self {
        FetchError::Payload {
            url: redact(url),
            message: message.into(),
        }
    }

    fn from_status(url: &Url, status: StatusCode) -> Self {
        let url = redact(url);
        if status == StatusCode::TOO_MANY_REQUESTS {
            FetchError::RateLimited { url }
        } else if status.is_server_error() {
            FetchError::Server {
                url,
                status: status.as_u16(),
            }
        } else {
            FetchError::Client {
                url,
                status: status.as_u16(),
            }
        }
    }

    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout { url: redact(url) };
        }
        if let Some(status) = err.status() {
            return Self::from_status(url, status);
        }
        // the error's own Display would print the full URL, key included
        let err = err.without_url();
        if err.is_decode() {
            FetchError::payload(url, err.to_string())
        } else {
            FetchError::Connect {
                url: redact(url),
                message: err.to_string(),
            }
        }
    }
}

/// `url` with credential query parameters replaced by `***`.
pub fn redact(url: &Url) -> String {
    if !url
        .query_pairs()
        .any(|(k, _)| SECRET_PARAMS.contains(&k.as_ref()))
    {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if SECRET_PARAMS.contains(&k.as_ref()) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    let mut clean = url.clone();
    clean.query_pairs_mut().clear().extend_pairs(pairs);
    clean.to_string()
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Ceiling for any single delay.
    pub max_backoff: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1_500),
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(25),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based):
    /// `initial_backoff * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Outcome of a retried operation plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub result: Result<T, FetchError>,
    pub attempts: u32,
}

impl<T> Attempted<T> {
    pub fn into_result(self) -> Result<T, FetchError> {
        self.result
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is reached. Sleeps `policy.backoff(n)` between attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(v) => {
                return Attempted {
                    result: Ok(v),
                    attempts,
                }
            }
            Err(e) if e.is_transient() && attempts < max_attempts => {
                let delay = policy.backoff(attempts);
                warn!(
                    target: "popimpact::fetch",
                    what = label,
                    attempt = attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                error!(
                    target: "popimpact::fetch",
                    what = label,
                    attempts,
                    error = %e,
                    "giving up"
                );
                return Attempted {
                    result: Err(e),
                    attempts,
                };
            }
        }
    }
}

/// Seam between the source adapters and HTTP.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and decode the body as JSON.
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError>;
}

/// reqwest-backed transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        debug!(url = %redact(url), "GET");
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(url, status));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport answering from a closure, counting calls per request.
    pub struct FnTransport<F> {
        respond: F,
        pub calls: Mutex<Vec<Url>>,
    }

    impl<F> FnTransport<F>
    where
        F: Fn(&Url, usize) -> Result<Value, FetchError> + Send + Sync,
    {
        pub fn new(respond: F) -> Self {
            Self {
                respond,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls_to(&self, path_suffix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.path().ends_with(path_suffix))
                .count()
        }
    }

    #[async_trait]
    impl<F> Transport for FnTransport<F>
    where
        F: Fn(&Url, usize) -> Result<Value, FetchError> + Send + Sync,
    {
        async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(url.clone());
                calls.iter().filter(|u| *u == url).count()
            };
            (self.respond)(url, n)
        }
    }

    /// Transport replaying a fixed script of responses, in order.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Value, FetchError>>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<Value, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::payload(url, "script exhausted")))
        }
    }

    pub fn server_error() -> FetchError {
        FetchError::Server {
            url: "http://test/".into(),
            status: 503,
        }
    }

    /// Route logs to the test harness; repeated calls are no-ops.
    pub fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    pub fn no_wait() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }
}
