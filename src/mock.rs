//! Mock webhook server: scripted responses from a JSON spec file.
//!
//! # Spec format
//! ```json
//! {
//!   "defaults": { "status": 200, "delay": 0, "body": {"status": "ok"} },
//!   "routes": {
//!     "/webhook": {
//!       "POST": { "status": 201, "body": {"success": true}, "delay": 0.5 }
//!     },
//!     "/api/*": { "ANY": { "status": 404 } }
//!   }
//! }
//! ```
//! Route match precedence: exact path with method key, exact path `ANY`,
//! longest wildcard prefix (`/prefix*`) with method then `ANY`, else the
//! defaults. A `sequence` array returns its n-th entry for the n-th call
//! to that route, clamped to the last entry.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

/// Per-response delays are capped so a misconfigured spec cannot hang
/// callers indefinitely.
const MAX_DELAY_SECONDS: f64 = 30.0;

// ---------------------------------------------------------------------------
// Spec types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseSpec {
    pub status: Option<u16>,
    pub delay: Option<f64>,
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub sequence: Option<Vec<SequenceStep>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceStep {
    pub status: Option<u16>,
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Top-level mock spec: defaults plus a map of path -> (method -> response).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockSpec {
    #[serde(default)]
    pub defaults: ResponseSpec,
    #[serde(default)]
    pub routes: HashMap<String, HashMap<String, ResponseSpec>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("reading spec file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in spec file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid spec value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// MockServer
// ---------------------------------------------------------------------------

pub struct MockServer {
    spec: MockSpec,
    call_counts: Mutex<HashMap<String, u64>>,
}

impl MockServer {
    pub fn new(spec: MockSpec) -> Result<Self, MockError> {
        validate_spec(&spec)?;
        Ok(MockServer {
            spec,
            call_counts: Mutex::new(HashMap::new()),
        })
    }

    /// Load and validate a JSON spec file. Unreadable or invalid specs are
    /// startup errors, never runtime surprises.
    pub fn from_file(path: &Path) -> Result<Self, MockError> {
        let content = std::fs::read_to_string(path).map_err(|e| MockError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let spec: MockSpec = serde_json::from_str(&content)?;
        Self::new(spec)
    }

    pub fn router(self) -> Router {
        let state = Arc::new(self);
        Router::new()
            .route("/__mock__/stats", get(stats))
            .route("/__mock__/reset", post(reset))
            .route("/__mock__/health", get(mock_health))
            .fallback(respond)
            .with_state(state)
    }

    /// Response spec for a path/method, before defaults are applied.
    fn resolve(&self, path: &str, method: &str) -> ResponseSpec {
        if let Some(by_method) = self.spec.routes.get(path) {
            if let Some(spec) = by_method.get(method).or_else(|| by_method.get("ANY")) {
                return spec.clone();
            }
        }

        // Wildcard prefixes, most specific (longest) first.
        let mut wildcards: Vec<(&String, &HashMap<String, ResponseSpec>)> = self
            .spec
            .routes
            .iter()
            .filter(|(pattern, _)| pattern.ends_with('*'))
            .collect();
        wildcards.sort_by_key(|(pattern, _)| std::cmp::Reverse(pattern.len()));

        for (pattern, by_method) in wildcards {
            let prefix = &pattern[..pattern.len() - 1];
            if path.starts_with(prefix) {
                if let Some(spec) = by_method.get(method).or_else(|| by_method.get("ANY")) {
                    return spec.clone();
                }
            }
        }

        ResponseSpec::default()
    }
}

fn validate_spec(spec: &MockSpec) -> Result<(), MockError> {
    let mut all: Vec<&ResponseSpec> = vec![&spec.defaults];
    all.extend(spec.routes.values().flat_map(HashMap::values));
    for response in all {
        if let Some(status) = response.status {
            if !(100..=599).contains(&status) {
                return Err(MockError::InvalidValue(format!(
                    "status {status} out of range"
                )));
            }
        }
        if let Some(delay) = response.delay {
            if delay < 0.0 || delay.is_nan() {
                return Err(MockError::InvalidValue(format!(
                    "delay must not be negative, got {delay}"
                )));
            }
        }
        if let Some(sequence) = &response.sequence {
            for step in sequence {
                if let Some(status) = step.status {
                    if !(100..=599).contains(&status) {
                        return Err(MockError::InvalidValue(format!(
                            "sequence status {status} out of range"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn respond(
    State(server): State<Arc<MockServer>>,
    method: Method,
    uri: Uri,
) -> (StatusCode, HeaderMap, Json<serde_json::Value>) {
    let path = uri.path().to_owned();
    let route_key = format!("{method} {path}");

    let call_num = {
        let mut counts = server.call_counts.lock().await;
        let count = counts.entry(route_key).or_insert(0);
        *count += 1;
        *count
    };

    let spec = server.resolve(&path, method.as_str());
    let defaults = &server.spec.defaults;

    let delay = spec
        .delay
        .or(defaults.delay)
        .unwrap_or(0.0)
        .min(MAX_DELAY_SECONDS);
    if delay > 0.0 {
        sleep(Duration::from_secs_f64(delay)).await;
    }

    let mut status = spec.status.or(defaults.status).unwrap_or(200);
    let mut body = spec
        .body
        .clone()
        .or_else(|| defaults.body.clone())
        .unwrap_or_else(|| json!({"status": "ok"}));
    let mut headers = spec.headers.clone();

    // The n-th call gets the n-th sequence entry, clamped to the last.
    if let Some(sequence) = &spec.sequence {
        if !sequence.is_empty() {
            let index = usize::try_from(call_num - 1)
                .unwrap_or(usize::MAX)
                .min(sequence.len() - 1);
            let step = &sequence[index];
            if let Some(s) = step.status {
                status = s;
            }
            if let Some(b) = &step.body {
                body = b.clone();
            }
            if !step.headers.is_empty() {
                headers = step.headers.clone();
            }
        }
    }

    info!(%method, path = %path, status, call = call_num, "mock response");

    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut header_map = HeaderMap::new();
    for (name, value) in &headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                header_map.insert(n, v);
            }
            _ => warn!(header = %name, "skipping unrepresentable response header"),
        }
    }

    (status_code, header_map, Json(body))
}

async fn stats(State(server): State<Arc<MockServer>>) -> Json<serde_json::Value> {
    let counts = server.call_counts.lock().await;
    let total: u64 = counts.values().sum();
    let routes: Vec<&String> = server.spec.routes.keys().collect();
    Json(json!({
        "call_counts": *counts,
        "routes": routes,
        "total_calls": total,
    }))
}

async fn reset(State(server): State<Arc<MockServer>>) -> Json<serde_json::Value> {
    server.call_counts.lock().await.clear();
    Json(json!({"status": "reset", "message": "Call counts cleared"}))
}

async fn mock_health(State(server): State<Arc<MockServer>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "routes_configured": server.spec.routes.len(),
    }))
}
