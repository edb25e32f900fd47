//! Replay engine integration tests: loading, timing modes, and delivery
//! against a live stub target.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use hookrelay::config::ReplayConfig;
use hookrelay::replay::{ReplayEngine, load_events};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Hits = Arc<Mutex<Vec<(String, String)>>>;

/// Stub HTTP target recording (method, path) per request.
async fn spawn_stub(status: StatusCode) -> (String, Hits) {
    let hits: Hits = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::clone(&hits);

    let app = Router::new()
        .fallback(
            move |State(hits): State<Hits>, method: Method, uri: Uri, _body: Bytes| async move {
                hits.lock()
                    .await
                    .push((method.to_string(), uri.path().to_owned()));
                status
            },
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), hits)
}

fn event_line(path: &str, timestamp: &str) -> String {
    format!(
        r#"{{"timestamp":"{timestamp}","method":"POST","path":"{path}","headers":{{}},"query":{{}},"json":{{"p":"{path}"}},"raw":"","ip":"127.0.0.1"}}"#
    )
}

fn write_events(dir: &Path, lines: &[String]) -> PathBuf {
    let path = dir.join("events.ndjson");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn config(
    events_file: PathBuf,
    target: Option<String>,
    rate: f64,
    delay: f64,
    once: bool,
) -> ReplayConfig {
    ReplayConfig::new(events_file, target, rate, delay, once, 100.0).unwrap()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn load_preserves_order_and_skips_bad_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_events(
        dir.path(),
        &[
            event_line("/a", "2026-08-23T10:00:00.000Z"),
            String::new(),
            "{this is not json".to_owned(),
            event_line("/b", "2026-08-23T10:00:01.000Z"),
        ],
    );

    let events = load_events(&path).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].path, "/a");
    assert_eq!(events[1].path, "/b");
}

#[test]
fn load_fails_on_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_events(&dir.path().join("nope.ndjson")).is_err());
}

// ---------------------------------------------------------------------------
// Replay runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_file_completes_immediately_with_zero_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_events(dir.path(), &[]);

    let engine = ReplayEngine::new(config(path, None, 1.0, 0.0, false));
    let summary = engine.replay().await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn dry_run_walks_all_events_without_delivering() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_events(
        dir.path(),
        &[
            event_line("/a", "2026-08-23T10:00:00.000Z"),
            event_line("/b", "2026-08-23T10:00:01.000Z"),
            event_line("/c", "2026-08-23T10:00:02.000Z"),
        ],
    );

    let engine = ReplayEngine::new(config(path, None, 1.0, 0.0, false));
    let summary = engine.replay().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn fixed_delay_paces_and_delivers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_events(
        dir.path(),
        &[
            event_line("/a", "2026-08-23T10:00:00.000Z"),
            event_line("/b", "2026-08-23T10:00:01.000Z"),
            event_line("/c", "2026-08-23T10:00:02.000Z"),
        ],
    );
    let (target, hits) = spawn_stub(StatusCode::OK).await;

    let engine = ReplayEngine::new(config(path, Some(target), 1.0, 0.1, false));
    let start = Instant::now();
    let summary = engine.replay().await.unwrap();
    let elapsed = start.elapsed();

    // Two inter-event delays of 0.1s; none after the last event.
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert_eq!(summary.delivered, 3);
    assert_eq!(summary.failed, 0);

    let hits = hits.lock().await;
    let paths: Vec<&str> = hits.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(paths, vec!["/a", "/b", "/c"]);
}

#[tokio::test]
async fn original_timing_scales_recorded_gaps_by_rate() {
    let dir = tempfile::tempdir().unwrap();
    // Gaps of 2s and 3s; at 10x they become 0.2s and 0.3s.
    let path = write_events(
        dir.path(),
        &[
            event_line("/a", "2026-08-23T10:00:00.000Z"),
            event_line("/b", "2026-08-23T10:00:02.000Z"),
            event_line("/c", "2026-08-23T10:00:05.000Z"),
        ],
    );
    let (target, hits) = spawn_stub(StatusCode::OK).await;

    let engine = ReplayEngine::new(config(path, Some(target), 10.0, 0.0, true));
    let start = Instant::now();
    let summary = engine.replay().await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(450), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
    assert_eq!(summary.delivered, 3);
    assert_eq!(hits.lock().await.len(), 3);
}

#[tokio::test]
async fn rate_limit_bounds_as_fast_mode() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..5)
        .map(|i| event_line(&format!("/e/{i}"), "2026-08-23T10:00:00.000Z"))
        .collect();
    let path = write_events(dir.path(), &lines);
    let (target, _hits) = spawn_stub(StatusCode::OK).await;

    // 20 rps => at least (5 - 1) / 20 = 0.2s for five sends.
    let config = ReplayConfig::new(path, Some(target), 1.0, 0.0, false, 20.0).unwrap();
    let engine = ReplayEngine::new(config);
    let start = Instant::now();
    let summary = engine.replay().await.unwrap();

    assert!(
        start.elapsed() >= Duration::from_millis(200),
        "elapsed {:?}",
        start.elapsed()
    );
    assert_eq!(summary.delivered, 5);
}

#[tokio::test]
async fn target_4xx_counts_as_delivered_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_events(dir.path(), &[event_line("/a", "2026-08-23T10:00:00.000Z")]);
    let (target, _hits) = spawn_stub(StatusCode::NOT_FOUND).await;

    let engine = ReplayEngine::new(config(path, Some(target), 1.0, 0.0, false));
    let summary = engine.replay().await.unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 0);
}
