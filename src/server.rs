//! Capture server: accepts arbitrary HTTP requests and turns each one
//! into an Event Record.
//!
//! A catch-all fallback route handles every method and path; the record
//! is printed/persisted by the [`Recorder`] and, when forwarding is
//! configured, enqueued on the forward worker. The inbound response is
//! never stalled by a slow downstream.

use crate::event::{EventRecord, decode_raw_body, now_timestamp, parse_json_body};
use crate::forward::ForwardHandle;
use crate::recorder::Recorder;
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Json;
use axum::routing::get;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    recorder: Recorder,
    forward: Option<ForwardHandle>,
    events_received: AtomicUsize,
    exit_after: Option<usize>,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    /// Returns the state plus the receiver side of the shutdown signal
    /// fired when `--exit-after` is reached.
    pub fn new(
        recorder: Recorder,
        forward: Option<ForwardHandle>,
        exit_after: Option<usize>,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(AppState {
            recorder,
            forward,
            events_received: AtomicUsize::new(0),
            exit_after,
            shutdown_tx,
        });
        (state, shutdown_rx)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(capture)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "events_received": state.events_received.load(Ordering::SeqCst),
    }))
}

async fn capture(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<serde_json::Value> {
    let event = build_event(&method, &uri, query.ok(), &headers, &body, Some(peer));

    state.recorder.record(&event).await;
    if let Some(forward) = &state.forward {
        forward.enqueue(event).await;
    }

    let received = state.events_received.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(exit_after) = state.exit_after {
        if received >= exit_after && !*state.shutdown_tx.borrow() {
            info!(received, "exit-after threshold reached; shutting down");
            let _ = state.shutdown_tx.send(true);
        }
    }

    Json(json!({"status": "received"}))
}

// ---------------------------------------------------------------------------
// Event construction
// ---------------------------------------------------------------------------

fn build_event(
    method: &Method,
    uri: &Uri,
    query: Option<Query<Vec<(String, String)>>>,
    headers: &HeaderMap,
    body: &[u8],
    peer: Option<SocketAddr>,
) -> EventRecord {
    // HeaderMap yields names already lowercased; last value wins, matching
    // the query map.
    let mut header_map = BTreeMap::new();
    for (name, value) in headers {
        header_map.insert(
            name.as_str().to_owned(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }

    let mut query_map = BTreeMap::new();
    if let Some(Query(pairs)) = query {
        for (key, value) in pairs {
            query_map.insert(key, value);
        }
    }

    let json = parse_json_body(body);
    let raw = if json.is_some() {
        String::new()
    } else {
        decode_raw_body(body)
    };

    EventRecord {
        timestamp: now_timestamp(),
        method: method.as_str().to_owned(),
        path: uri.path().to_owned(),
        headers: header_map,
        query: query_map,
        json,
        raw,
        ip: peer.map_or_else(|| "unknown".to_owned(), |addr| addr.ip().to_string()),
    }
}
