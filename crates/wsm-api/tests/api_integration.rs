use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use wsm_api::{create_router, AppState};
use wsm_core::{Result as WsmResult, WorkspaceConfig};
use wsm_daemon::{MetricsSource, SystemMetrics, WorkspaceManager};

struct Steady;

impl MetricsSource for Steady {
    fn sample(&mut self) -> WsmResult<SystemMetrics> {
        Ok(SystemMetrics {
            timestamp: Utc::now(),
            cpu_percent: 95.0,
            memory_percent: 30.0,
            memory_used_bytes: 3,
            memory_total_bytes: 10,
            disk_percent: 10.0,
            disk_used_bytes: 1,
            disk_total_bytes: 10,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            stale: false,
        })
    }
}

fn manager() -> Arc<WorkspaceManager> {
    let mut config = WorkspaceConfig::default();
    config.watch.debounce_ms = 50;
    config.monitor.sample_interval_ms = 50;
    config.health.check_interval_secs = 3600;
    Arc::new(WorkspaceManager::with_metrics_source(config, Box::new(Steady)).unwrap())
}

fn server(manager: Arc<WorkspaceManager>) -> TestServer {
    TestServer::new(create_router(AppState::new(manager))).unwrap()
}

async fn started_workspace() -> (TempDir, Arc<WorkspaceManager>) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.js"), "import { b } from './b';\nimport React from 'react';\n").unwrap();
    std::fs::write(dir.path().join("src/b.js"), "export const b = 1;\n").unwrap();

    let manager = manager();
    manager.start(dir.path()).await.unwrap();
    for _ in 0..200 {
        if manager.indexer().last_full_analysis().is_some() && manager.monitor().latest().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(manager.indexer().last_full_analysis().is_some(), "initial analysis did not finish");
    (dir, manager)
}

#[tokio::test]
async fn health_endpoint_reports_liveness() {
    let server = server(manager());
    let resp = server.get("/health").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["status"], "alive");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn stopped_manager_reports_and_rejects() {
    let server = server(manager());

    let body: Value = server.get("/api/status").await.json();
    assert_eq!(body["running"], false);
    assert_eq!(body["components"].as_array().unwrap().len(), 4);
    assert_eq!(body["config"]["batch_size"], 50);

    let resp = server.post("/api/components/watcher/restart").await;
    assert_eq!(resp.status_code(), 400);
    let body: Value = resp.json();
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains("not running"));

    let resp = server.get("/api/topology").await;
    assert_eq!(resp.status_code(), 503);
}

#[tokio::test]
async fn analysis_endpoints_describe_the_workspace() {
    let (_dir, manager) = started_workspace().await;
    let server = server(manager.clone());

    let body: Value = server.get("/api/analysis").await.json();
    assert_eq!(body["total_files"], 2);
    assert_eq!(body["total_dependencies"], 1);
    assert_eq!(body["external_packages"], json!(["react"]));

    let resp = server.get("/api/analysis/file").add_query_param("path", "src/b.js").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["analysis"]["path"], "src/b.js");
    assert_eq!(body["dependents"], json!(["src/a.js"]));

    let resp = server.get("/api/analysis/file").add_query_param("path", "src/nope.js").await;
    assert_eq!(resp.status_code(), 404);
    assert_eq!(resp.json::<Value>()["status"], 404);

    let body: Value = server.get("/api/topology").await.json();
    let ids: Vec<&str> = body["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"src/a.js"));
    assert!(ids.contains(&"external:react"));

    let body: Value = server.get("/api/files").await.json();
    assert_eq!(body["total_files"], 2);
    assert_eq!(body["directories"][0]["directory"], "src");
    assert_eq!(body["directories"][0]["total_files"], 2);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn status_and_metrics_while_running() {
    let (_dir, manager) = started_workspace().await;
    let server = server(manager.clone());

    let body: Value = server.get("/api/status").await.json();
    assert_eq!(body["running"], true);
    let names: Vec<&str> = body["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["monitor", "watcher", "indexer", "visualizer"]);

    let body: Value = server.get("/api/metrics").await.json();
    assert_eq!(body["latest"]["cpuPercent"], 95.0);
    assert!(!body["history"].as_array().unwrap().is_empty());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn restart_and_config_endpoints() {
    let (_dir, manager) = started_workspace().await;
    let server = server(manager.clone());

    let resp = server.post("/api/components/compiler/restart").await;
    assert_eq!(resp.status_code(), 404);

    let resp = server.post("/api/components/visualizer/restart").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["component"]["name"], "visualizer");

    let resp = server.post("/api/config").json(&json!({ "batch_size": 0 })).await;
    assert_eq!(resp.status_code(), 400);

    let resp = server
        .post("/api/config")
        .json(&json!({ "batch_size": 10, "exclude_patterns": ["**/*.log"] }))
        .await;
    assert_eq!(resp.status_code(), 200);

    let body: Value = server.get("/api/config").await.json();
    assert_eq!(body["indexer"]["batch_size"], 10);
    assert_eq!(body["watch"]["exclude_patterns"], json!(["**/*.log"]));

    manager.stop().await.unwrap();
}

fn ws_server(manager: Arc<WorkspaceManager>) -> TestServer {
    TestServer::builder()
        .http_transport()
        .build(create_router(AppState::new(manager)))
        .unwrap()
}

async fn next_frame(ws: &mut axum_test::TestWebSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(10), ws.receive_json::<Value>())
        .await
        .expect("no websocket frame within 10s")
}

#[tokio::test]
async fn websocket_sends_snapshot_before_incremental_events() {
    let (dir, manager) = started_workspace().await;
    let server = ws_server(manager.clone());
    let mut ws = server.get_websocket("/ws").await.into_websocket().await;

    let first = next_frame(&mut ws).await;
    assert_eq!(first["type"], "snapshot");
    assert_eq!(first["data"]["status"]["running"], true);
    assert_eq!(first["data"]["analysis"]["total_files"], 2);

    std::fs::write(dir.path().join("src/c.js"), "import { b } from './b';\n").unwrap();
    loop {
        let frame = next_frame(&mut ws).await;
        assert_ne!(frame["type"], "snapshot");
        if frame["type"] == "fileAdded" {
            assert_eq!(frame["data"]["path"], "src/c.js");
            break;
        }
    }

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn websocket_since_replays_buffered_events_once() {
    let (_dir, manager) = started_workspace().await;
    let server = ws_server(manager.clone());
    let mut ws = server
        .get_websocket("/ws")
        .add_query_param("since", 0)
        .await
        .into_websocket()
        .await;

    let first = next_frame(&mut ws).await;
    assert_eq!(first["type"], "snapshot");

    // watcherReady went out during startup, before this client connected.
    let mut last_seq = 0;
    loop {
        let frame = next_frame(&mut ws).await;
        let seq = frame["seq"].as_u64().unwrap();
        assert!(seq > last_seq, "frame {} repeated or out of order", seq);
        last_seq = seq;
        if frame["type"] == "watcherReady" {
            assert_eq!(frame["data"]["tracked_files"], 2);
            break;
        }
    }

    manager.stop().await.unwrap();
}
