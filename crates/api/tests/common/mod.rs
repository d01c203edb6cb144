#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use doculab_events::LogBroadcaster;
use doculab_pipeline::{PipelineConfig, ToolkitLayout};
use doculab_store::Stores;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use doculab_api::config::ServerConfig;
use doculab_api::router::build_app_router;
use doculab_api::state::AppState;

const COMPONENTS: [&str; 3] = ["gsheet-to-json", "json-to-odt", "json-to-docx"];
const ENTRYPOINT: &str = "all-formats-from-gsheet.sh";

/// A test application over temp directories and a fake toolkit whose
/// entrypoint runs `script_body`.
pub struct TestApp {
    pub router: Router,
    pub stores: Stores,
    pub cancel: CancellationToken,
    pub toolkit: tempfile::TempDir,
    pub work: tempfile::TempDir,
    pub shared: tempfile::TempDir,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(toolkit: &Path, work_root: &Path, output_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        shutdown_timeout_secs: 5,
        ledger_retention_secs: 86_400,
        retention_interval_secs: 300,
        log_channel_capacity: 1024,
        pipeline: PipelineConfig {
            toolkit: ToolkitLayout {
                root: toolkit.to_path_buf(),
                entrypoint: ENTRYPOINT.to_string(),
                components: COMPONENTS.iter().map(|c| c.to_string()).collect(),
            },
            work_root: work_root.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            output_public_prefix: "out".to_string(),
            lock_ttl: Duration::from_secs(3600),
            max_concurrent_jobs: 2,
            queue_capacity: 16,
        },
    }
}

/// Build the full application router with all middleware layers and a
/// running dispatcher.
pub fn build_test_app(script_body: &str) -> TestApp {
    let toolkit = tempfile::tempdir().unwrap();
    for component in COMPONENTS {
        let conf = toolkit.path().join(component).join("conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(conf.join("config.yml"), "dirs:\n  output-dir: ../out\n").unwrap();
    }
    std::fs::write(
        toolkit.path().join(ENTRYPOINT),
        format!("#!/bin/bash\n{script_body}"),
    )
    .unwrap();

    let work = tempfile::tempdir().unwrap();
    let shared = tempfile::tempdir().unwrap();
    let config = test_config(toolkit.path(), work.path(), &shared.path().join("out"));

    let stores = Stores::in_memory();
    let broadcaster = Arc::new(LogBroadcaster::new(config.log_channel_capacity));
    let (service, dispatcher) =
        doculab_pipeline::build(&config.pipeline, &stores, broadcaster);
    let cancel = CancellationToken::new();
    tokio::spawn(dispatcher.run(cancel.clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::new(service),
        shutdown: cancel.clone(),
    };

    TestApp {
        router: build_app_router(state, &config),
        stores,
        cancel,
        toolkit,
        work,
        shared,
    }
}

impl TestApp {
    pub fn published_dir(&self) -> PathBuf {
        self.shared.path().join("out")
    }

    /// Poll `/status/{id}` until the job is terminal; returns the last body.
    pub async fn wait_terminal(&self, task_id: &str) -> serde_json::Value {
        for _ in 0..1000 {
            let response = get(self.router.clone(), &format!("/status/{task_id}")).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            if json["status"] == "succeeded" || json["status"] == "failed" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {task_id} did not finish in time");
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri).await
}

async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
