//! Mock server integration tests over real sockets: routing, sequences,
//! delays, and the control endpoints.

use hookrelay::mock::{MockServer, MockSpec};
use serde_json::json;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn spec(value: serde_json::Value) -> MockSpec {
    serde_json::from_value(value).unwrap()
}

async fn spawn_mock(spec: MockSpec) -> String {
    let server = MockServer::new(spec).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server.router()).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn routes_respond_per_spec_with_defaults_fallback() {
    let base = spawn_mock(spec(json!({
        "defaults": {"status": 200, "body": {"status": "ok"}},
        "routes": {
            "/webhook": {
                "POST": {
                    "status": 201,
                    "body": {"created": true},
                    "headers": {"x-mock": "yes"}
                }
            },
            "/api/*": {"ANY": {"status": 404, "body": {"error": "not found"}}}
        }
    })))
    .await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/webhook"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.headers()["x-mock"], "yes");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"created": true}));

    // Wildcard prefix catches any method under /api/.
    let response = client
        .delete(format!("{base}/api/v1/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    // Everything else falls back to the defaults.
    let response = client.get(format!("{base}/elsewhere")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn sequence_steps_advance_per_call_and_clamp_to_last() {
    let base = spawn_mock(spec(json!({
        "routes": {
            "/flaky": {
                "POST": {
                    "sequence": [
                        {"status": 500, "body": {"error": "boom"}},
                        {"status": 200, "body": {"recovered": true}}
                    ]
                }
            }
        }
    })))
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/flaky");

    let first = client.post(&url).send().await.unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let second = client.post(&url).send().await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::OK);

    // Past the end of the sequence the last entry repeats.
    let third = client.post(&url).send().await.unwrap();
    assert_eq!(third.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = third.json().await.unwrap();
    assert_eq!(body, json!({"recovered": true}));
}

#[tokio::test]
async fn configured_delay_is_applied() {
    let base = spawn_mock(spec(json!({
        "routes": {
            "/slow": {"GET": {"status": 200, "delay": 0.3}}
        }
    })))
    .await;

    let start = Instant::now();
    let response = reqwest::get(format!("{base}/slow")).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn stats_counts_calls_and_reset_clears_them() {
    let base = spawn_mock(spec(json!({
        "routes": {"/hook": {"POST": {"status": 200}}}
    })))
    .await;
    let client = reqwest::Client::new();

    client.post(format!("{base}/hook")).send().await.unwrap();
    client.post(format!("{base}/hook")).send().await.unwrap();
    client.get(format!("{base}/other")).send().await.unwrap();

    let stats: serde_json::Value = client
        .get(format!("{base}/__mock__/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_calls"], 3);
    assert_eq!(stats["call_counts"]["POST /hook"], 2);
    assert_eq!(stats["call_counts"]["GET /other"], 1);

    client
        .post(format!("{base}/__mock__/reset"))
        .send()
        .await
        .unwrap();

    let stats: serde_json::Value = client
        .get(format!("{base}/__mock__/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_calls"], 0);
}

#[tokio::test]
async fn mock_health_reports_configured_routes() {
    let base = spawn_mock(spec(json!({
        "routes": {
            "/a": {"GET": {"status": 200}},
            "/b": {"GET": {"status": 200}}
        }
    })))
    .await;

    let health: serde_json::Value = reqwest::get(format!("{base}/__mock__/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["routes_configured"], 2);
}
