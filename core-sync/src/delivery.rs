//! # Delivery Client
//!
//! POSTs cleaned order payloads to the logistics endpoint with bounded,
//! exponentially backed-off retries.
//!
//! ## Retry behaviour
//!
//! - Up to `retry.max_attempts` attempts, each bounded by `timeout`
//! - After failed attempt `n` (except the last) wait `base_delay * 2^(n-1)`
//! - Transport errors, timeouts and non-2xx responses are retried alike
//! - The backoff wait is abandoned as soon as the cancellation token fires

use crate::{Result, SyncError};
use bridge_traits::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use core_runtime::logging::redact_endpoint;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Longest response body excerpt carried in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Delivery endpoint settings.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub endpoint_url: String,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl DeliveryConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            user_agent: concat!("erp-order-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    /// Response body, verbatim.
    pub body: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Sends payloads to the logistics endpoint.
pub struct DeliveryClient {
    http: Arc<dyn HttpClient>,
    config: DeliveryConfig,
}

impl DeliveryClient {
    pub fn new(http: Arc<dyn HttpClient>, config: DeliveryConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Endpoint with credentials and query string removed.
    pub fn endpoint_for_display(&self) -> String {
        redact_endpoint(&self.config.endpoint_url)
    }

    /// Deliver one payload.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Delivery`] once every attempt failed, carrying the last
    ///   failure
    /// - [`SyncError::Cancelled`] if `cancel` fires while waiting to retry
    #[instrument(skip(self, body, cancel), fields(endpoint = %self.endpoint_for_display()))]
    pub async fn send(&self, body: &Value, cancel: &CancellationToken) -> Result<DeliveryReceipt> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let request = HttpRequest::new(HttpMethod::Post, &self.config.endpoint_url)
                .user_agent(&self.config.user_agent)
                .timeout(self.config.timeout)
                .json(body)
                .map_err(|e| SyncError::Delivery {
                    attempts: attempt - 1,
                    message: e.to_string(),
                })?;

            debug!(attempt, max_attempts, "Sending order");

            match tokio::time::timeout(self.config.timeout, self.http.execute(request)).await {
                Ok(Ok(response)) if response.is_success() => {
                    info!(attempt, status = response.status, "Order accepted");
                    return Ok(DeliveryReceipt {
                        status: response.status,
                        body: response.text_lossy(),
                        attempts: attempt,
                    });
                }
                Ok(Ok(response)) => {
                    last_error = format!(
                        "HTTP {}: {}",
                        response.status,
                        excerpt(&response.text_lossy())
                    );
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!(
                        "Request timed out after {}ms",
                        self.config.timeout.as_millis()
                    );
                }
            }

            if attempt < max_attempts {
                let delay = self.config.retry.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Delivery attempt failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(attempt, "Delivery cancelled during backoff");
                        return Err(SyncError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                warn!(attempt, error = %last_error, "Delivery attempt failed, giving up");
            }
        }

        Err(SyncError::Delivery {
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// Probe the endpoint with a single GET.
    ///
    /// Returns `true` iff a response with status below 500 arrives within
    /// the timeout. Never fails.
    pub async fn health_check(&self) -> bool {
        let request = HttpRequest::new(HttpMethod::Get, &self.config.endpoint_url)
            .user_agent(&self.config.user_agent)
            .timeout(self.config.timeout);

        match tokio::time::timeout(self.config.timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, "Health probe answered");
                response.status < 500
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!("Health probe timed out");
                false
            }
        }
    }
}

fn excerpt(body: &str) -> &str {
    if body.len() <= ERROR_BODY_LIMIT {
        return body;
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
