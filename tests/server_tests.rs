use axum::body::Body;
use axum::http::{Request, StatusCode};
use lan_discovery::netdetect::StaticInterfaces;
use lan_discovery::scanner::ScanConfig;
use lan_discovery::server::{router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

fn app() -> axum::Router {
    app_with(ScanConfig::default())
}

fn app_with(defaults: ScanConfig) -> axum::Router {
    router(AppState::new(Arc::new(StaticInterfaces::default()), defaults))
}

/// Poll `/api/status` until the session leaves the scanning states.
async fn wait_for_end(app: &axum::Router) -> serde_json::Value {
    for _ in 0..100 {
        let body = json_body(app.clone().oneshot(get("/api/status")).await.unwrap()).await;
        match body["state"].as_str() {
            Some("idle") | Some("scanning") => {}
            _ => return body,
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session did not end");
}

/// Defaults knocking only on a port that is listening on loopback.
fn loopback_defaults(port: u16) -> ScanConfig {
    ScanConfig {
        timeout_ms: 500,
        probe_ports: vec![port],
        resolve_hostnames: false,
        ..ScanConfig::default()
    }
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn status_starts_idle() {
    let resp = app().oneshot(get("/api/status")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["hosts_found"], 0);
}

#[tokio::test]
async fn cancel_without_session_conflicts() {
    let resp = app().oneshot(post("/api/cancel", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_targets_are_rejected() {
    let resp = app()
        .oneshot(post("/api/scan", r#"{"target": "not-a-network"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app()
        .oneshot(post("/api/scan", r#"{"target": "10.0.0.0/4"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scan_without_interfaces_ends_not_connected() {
    let app = app();
    let resp = app.clone().oneshot(post("/api/scan", "{}")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(resp).await["session_id"], 1);

    let mut state = String::new();
    for _ in 0..50 {
        let body = json_body(app.clone().oneshot(get("/api/status")).await.unwrap()).await;
        state = body["state"].as_str().unwrap_or_default().to_string();
        if state == "not_connected" {
            assert_eq!(body["connection"], "not_connected");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, "not_connected");

    let hosts = json_body(app.clone().oneshot(get("/api/hosts")).await.unwrap()).await;
    assert_eq!(hosts, serde_json::json!([]));

    let resp = app.oneshot(post("/api/cancel", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn target_scan_lists_reachable_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app = app_with(loopback_defaults(listener.local_addr().unwrap().port()));

    let resp = app
        .clone()
        .oneshot(post("/api/scan", r#"{"target": "127.0.0.1/32"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let status = wait_for_end(&app).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["hosts_found"], 1);
    assert_eq!(status["progress_ticks"], 1);

    let hosts = json_body(app.oneshot(get("/api/hosts")).await.unwrap()).await;
    assert_eq!(hosts.as_array().map(Vec::len), Some(1));
    assert_eq!(hosts[0]["address"], "127.0.0.1");
    assert_eq!(hosts[0]["label"], "127.0.0...");
}

#[tokio::test]
async fn partial_config_keeps_server_defaults() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let defaults = ScanConfig {
        max_hosts: 0,
        ..loopback_defaults(listener.local_addr().unwrap().port())
    };
    let app = app_with(defaults);

    let body = r#"{"target": "127.0.0.1/32", "config": {"timeout_ms": 400}}"#;
    let resp = app.clone().oneshot(post("/api/scan", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let status = wait_for_end(&app).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["hosts_found"], 0);

    let hosts = json_body(app.oneshot(get("/api/hosts")).await.unwrap()).await;
    assert_eq!(hosts, serde_json::json!([]));
}
