//! Outbound delivery: the HTTP client leaf and the retry executor.
//!
//! The client performs exactly one outbound call per invocation and
//! reports an explicit [`DeliveryOutcome`]; retrying and rate limiting
//! are the callers' jobs. Both the forward worker and the replay engine
//! converge here.

use crate::event::EventRecord;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, warn};

/// Outbound request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Result of a single delivery attempt.
///
/// Any response with status < 500 is `Delivered` — a 4xx is a terminal
/// answer from the target, not a reason to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The target answered with the given status (< 500).
    Delivered(u16),
    /// Connection error, timeout, or 5xx response; eligible for retry.
    Retryable(String),
    /// The event cannot be sent at all (e.g. malformed method); never retried.
    Failed(String),
}

/// Terminal result of a delivery run through the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Delivered(u16),
    /// All attempts failed, or the failure was permanent. Already logged;
    /// never propagated as an error.
    Failed,
}

// ---------------------------------------------------------------------------
// Deliver trait
// ---------------------------------------------------------------------------

/// One outbound HTTP call. No retry, no rate limiting.
pub trait Deliver: Send + Sync {
    fn deliver(
        &self,
        event: &EventRecord,
    ) -> impl std::future::Future<Output = DeliveryOutcome> + Send;
}

// ---------------------------------------------------------------------------
// Retry executor
// ---------------------------------------------------------------------------

/// Attempt a delivery up to `max_retries` total times with exponential
/// backoff (1s, 2s, 4s, ... before the 2nd, 3rd, 4th attempt).
///
/// Exhaustion is logged at error level and surfaced as
/// [`RetryOutcome::Failed`]; it never unwinds into the caller.
pub async fn deliver_with_retry<D: Deliver>(
    client: &D,
    event: &EventRecord,
    max_retries: u32,
) -> RetryOutcome {
    let max_attempts = max_retries.max(1);
    for attempt in 0..max_attempts {
        match client.deliver(event).await {
            DeliveryOutcome::Delivered(status) => {
                debug!(
                    status,
                    method = %event.method,
                    path = %event.path,
                    "delivered"
                );
                return RetryOutcome::Delivered(status);
            }
            DeliveryOutcome::Failed(err) => {
                error!(
                    error = %err,
                    method = %event.method,
                    path = %event.path,
                    "delivery failed permanently"
                );
                return RetryOutcome::Failed;
            }
            DeliveryOutcome::Retryable(err) => {
                if attempt + 1 < max_attempts {
                    let backoff = Duration::from_secs(2_u64.saturating_pow(attempt));
                    warn!(
                        error = %err,
                        attempt = attempt + 1,
                        max_attempts,
                        backoff_secs = backoff.as_secs(),
                        "delivery failed; retrying"
                    );
                    sleep(backoff).await;
                } else {
                    error!(
                        error = %err,
                        attempts = max_attempts,
                        method = %event.method,
                        path = %event.path,
                        "delivery failed after all attempts"
                    );
                }
            }
        }
    }
    RetryOutcome::Failed
}

// ---------------------------------------------------------------------------
// HttpDeliveryClient
// ---------------------------------------------------------------------------

/// Where a delivery goes.
#[derive(Debug, Clone)]
pub enum DeliveryTarget {
    /// Literal URL; the event path is ignored (live forwarding).
    ForwardUrl(String),
    /// Base URL the original event path is appended to (replay).
    ReplayBase(String),
}

/// Pooled reqwest-backed [`Deliver`] implementation.
///
/// The connection pool is created lazily on first use and owned
/// exclusively by whichever pipeline constructed this client; dropping
/// the client releases the pool exactly once.
pub struct HttpDeliveryClient {
    target: DeliveryTarget,
    client: tokio::sync::OnceCell<reqwest::Client>,
}

impl HttpDeliveryClient {
    pub fn new(target: DeliveryTarget) -> Self {
        HttpDeliveryClient {
            target,
            client: tokio::sync::OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, String> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .pool_max_idle_per_host(5)
                    .pool_idle_timeout(Duration::from_secs(30))
                    .build()
                    .map_err(|e| e.to_string())
            })
            .await
    }

    fn url_for(&self, event: &EventRecord) -> String {
        match &self.target {
            DeliveryTarget::ForwardUrl(url) => url.clone(),
            DeliveryTarget::ReplayBase(base) => join_target_url(base, &event.path),
        }
    }
}

impl Deliver for HttpDeliveryClient {
    async fn deliver(&self, event: &EventRecord) -> DeliveryOutcome {
        let client = match self.client().await {
            Ok(c) => c,
            Err(e) => return DeliveryOutcome::Failed(format!("building HTTP client: {e}")),
        };

        let Ok(method) = reqwest::Method::from_bytes(event.method.as_bytes()) else {
            return DeliveryOutcome::Failed(format!("invalid HTTP method '{}'", event.method));
        };

        let mut headers = HeaderMap::new();
        for (name, value) in outbound_headers(event) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => debug!(header = %name, "skipping unrepresentable header"),
            }
        }

        let mut request = client
            .request(method, self.url_for(event))
            .headers(headers);

        if let Some(json) = &event.json {
            match serde_json::to_string(json) {
                Ok(body) => request = request.body(body),
                Err(e) => return DeliveryOutcome::Failed(format!("serializing body: {e}")),
            }
        } else if !event.raw.is_empty() {
            request = request.body(event.raw.clone());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status < 500 {
                    DeliveryOutcome::Delivered(status)
                } else {
                    DeliveryOutcome::Retryable(format!("server error status {status}"))
                }
            }
            Err(e) => DeliveryOutcome::Retryable(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Target base + original path; tolerant of a trailing slash on the base.
fn join_target_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Headers re-sent with an event: the recorded set minus `host`, plus a
/// `content-type: application/json` override when the body is re-serialized
/// JSON.
fn outbound_headers(event: &EventRecord) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = event
        .headers
        .iter()
        .filter(|(name, _)| name.as_str() != "host")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if event.json.is_some() {
        headers.retain(|(name, _)| name != "content-type");
        headers.push(("content-type".to_owned(), "application/json".to_owned()));
    }
    headers
}
