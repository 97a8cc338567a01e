use std::time::Duration;

use async_trait::async_trait;
use beebo_common::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retries transient failures (rate limits, 5xx, timeouts) with exponential backoff.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn is_transient(error_msg: &str) -> bool {
        const MARKERS: &[&str] = &[
            "429",
            "rate limit",
            "500",
            "502",
            "503",
            "504",
            "timed out",
            "connection reset",
        ];
        let lower = error_msg.to_lowercase();
        MARKERS.iter().any(|m| lower.contains(m))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        // Spread concurrent retries a little; deterministic so tests stay stable.
        let spread = base * 0.1 * f64::from(attempt.wrapping_mul(2_654_435_761) % 100) / 100.0;
        let millis = (base + spread) as u64;
        Duration::from_millis(millis.min(self.config.max_delay_ms))
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let error_msg = e.to_string();
                    if attempt >= self.config.max_retries || !Self::is_transient(&error_msg) {
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error_msg,
                        "Retrying chat completion"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
