//! Replay service adapter.
//!
//! Every call shares one failure policy: log, wait a fixed delay, try again.
//! Unless `max_attempts` is configured the calls only ever return success,
//! so replay outages show up as latency, never as errors.

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::config::EndpointConfig;
use crate::domain::{PriorityUpdate, Sample};
use crate::error::{LearnerError, Result};

/// Upper bound for one HTTP exchange before it counts as failed
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed-delay retry, unbounded unless `max_attempts` is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds or the attempt budget is spent
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    error!(operation, attempt = attempts, error = %e, "replay call failed");
                    if let Some(max) = self.max_attempts {
                        if attempts >= max {
                            return Err(LearnerError::RetriesExhausted {
                                operation,
                                attempts,
                            });
                        }
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Operations the learner needs from the replay service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplayService: Send + Sync {
    /// Next prioritized batch, or `Sample::NotReady` while the buffer warms up
    async fn sample(&self) -> Result<Sample>;

    /// Report new priorities for a trained batch
    async fn update(&self, update: &PriorityUpdate) -> Result<()>;

    /// Drop everything buffered by a previous run
    async fn clear(&self) -> Result<()>;
}

/// HTTP client for the replay service
#[derive(Clone)]
pub struct ReplayClient {
    http: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl ReplayClient {
    pub fn new(endpoint: &EndpointConfig, retry: RetryPolicy) -> Result<Self> {
        Self::with_base_url(&format!("http://{}/", endpoint.addr()), retry)
    }

    pub fn with_base_url(base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| LearnerError::InvalidConfig(format!("invalid replay url: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .user_agent("ds-learner/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LearnerError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| LearnerError::Internal(format!("invalid replay path {}: {}", path, e)))
    }

    fn check_status(operation: &'static str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(LearnerError::ReplayStatus { operation, status })
        }
    }

    async fn try_sample(&self) -> Result<Sample> {
        let resp = self.http.get(self.endpoint("sample")?).send().await?;
        let body = Self::check_status("sample", resp)?.bytes().await?;
        Sample::from_body(&body)
    }

    async fn try_update(&self, update: &PriorityUpdate) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint("update")?)
            .json(update)
            .send()
            .await?;
        Self::check_status("update", resp)?;
        Ok(())
    }

    async fn try_clear(&self) -> Result<()> {
        let resp = self.http.get(self.endpoint("clear")?).send().await?;
        Self::check_status("clear", resp)?;
        Ok(())
    }
}

#[async_trait]
impl ReplayService for ReplayClient {
    async fn sample(&self) -> Result<Sample> {
        self.retry.run("sample", || self.try_sample()).await
    }

    async fn update(&self, update: &PriorityUpdate) -> Result<()> {
        self.retry.run("update", || self.try_update(update)).await?;
        debug!(transitions = update.len(), "priorities updated");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.retry.run("clear", || self.try_clear()).await
    }
}
