//! Outbound HTTP transport
//!
//! Executes one delivery request with exponential backoff retry and a global
//! concurrency cap. The sender treats a returned error as terminal for that
//! attempt; per-request timeouts live here, not in the pipeline.

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;
use url::Url;

/// One fully-built outbound request.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Executes one HTTP request; implementations define retry semantics.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: DeliveryRequest) -> Result<()>;
}

/// reqwest-backed transport with exponential backoff and a concurrency cap
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
    permits: Arc<Semaphore>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let permits = Arc::new(Semaphore::new(config.max_concurrency));

        Ok(Self {
            client,
            config,
            permits,
        })
    }

    async fn attempt(&self, request: &DeliveryRequest) -> Result<()> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder.send().await?.error_for_status()?;

        Ok(())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as u64;
        let max = self.config.backoff_max.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(32)).min(max);

        // Up to 30% jitter keeps retries from the same batch apart.
        let jitter = rand::thread_rng().gen_range(0.0..0.3);
        Duration::from_millis((exp as f64 * (1.0 + jitter)) as u64)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: DeliveryRequest) -> Result<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Transport("transport is shut down".to_string()))?;

        let mut attempt = 0;

        loop {
            match self.attempt(&request).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;

                    if attempt > self.config.max_retries {
                        return Err(Error::Transport(err.to_string()));
                    }

                    warn!(
                        url = %request.url,
                        attempt,
                        error = %err,
                        "failed to do a request, retrying",
                    );

                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
            }
        }
    }
}

type MockEngine = Box<dyn Fn(&DeliveryRequest) -> Result<()> + Send + Sync>;

/// Transport test double recording every request it executes.
pub struct MockTransport {
    engine: Option<MockEngine>,
    requests: Mutex<Vec<DeliveryRequest>>,
}

impl MockTransport {
    /// A transport that accepts everything.
    pub fn new() -> Self {
        Self {
            engine: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A transport whose outcome is decided by `engine`.
    pub fn with_engine(
        engine: impl Fn(&DeliveryRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            engine: Some(Box::new(engine)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request executed so far.
    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: DeliveryRequest) -> Result<()> {
        let outcome = match &self.engine {
            Some(engine) => engine(&request),
            None => Ok(()),
        };

        self.requests.lock().push(request);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let transport = HttpTransport::new(TransportConfig {
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
            max_concurrency: 1,
            request_timeout: Duration::from_secs(1),
        })
        .unwrap();

        let first = transport.backoff_delay(1);
        let third = transport.backoff_delay(3);

        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(400));
        // 30% jitter on top of the 1s cap at most
        assert!(transport.backoff_delay(10) <= Duration::from_millis(1300));
    }

    #[tokio::test]
    async fn test_mock_transport_records_requests() {
        let transport = MockTransport::new();

        transport
            .execute(DeliveryRequest {
                method: Method::GET,
                url: Url::parse("http://localhost/hook").unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();

        assert_eq!(transport.requests().len(), 1);
    }
}
