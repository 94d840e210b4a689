//! HTTP surface, with the capture process replaced by an in-memory fake

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

use sdi_loudness_relay::{
    capture::{CaptureChild, CaptureState, ProcessLauncher},
    config::AppConfig,
    error::CaptureError,
    ui::{router, AppState},
};

#[derive(Default)]
struct FakeLauncher {
    spawned: Mutex<Vec<Vec<String>>>,
    kills: Arc<AtomicUsize>,
}

struct FakeChild {
    exit: watch::Sender<bool>,
    exited: watch::Receiver<bool>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, args: Vec<String>) -> Result<Box<dyn CaptureChild>, CaptureError> {
        self.spawned.lock().push(args);
        let (exit, exited) = watch::channel(false);
        Ok(Box::new(FakeChild {
            exit,
            exited,
            kills: self.kills.clone(),
        }))
    }
}

#[async_trait]
impl CaptureChild for FakeChild {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<Option<i32>, CaptureError> {
        let _ = self.exited.wait_for(|done| *done).await;
        Ok(None)
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.exit.send_replace(true);
        Ok(())
    }
}

struct Harness {
    app: Router,
    state: Arc<AppState>,
    launcher: Arc<FakeLauncher>,
    settings_path: PathBuf,
}

impl Harness {
    fn new() -> Self {
        Self::with_helper(PathBuf::from("./no-such-input-config-helper"))
    }

    fn with_helper(helper: PathBuf) -> Self {
        let settings_path = std::env::temp_dir().join(format!("relay-http-{}.toml", uuid::Uuid::new_v4()));
        let mut config = AppConfig::default();
        config.settings_path = Some(settings_path.clone());
        config.input_config.binary = helper;

        let launcher = Arc::new(FakeLauncher::default());
        let state = Arc::new(AppState::new(config, launcher.clone()));
        Self {
            app: router(state.clone()),
            state,
            launcher,
            settings_path,
        }
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post(&self, uri: &str, json: &str) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap();
        self.request(request).await
    }

    async fn wait_running(&self, generation: u64) {
        let mut status = self.state.supervisor.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.state == CaptureState::Running && s.generation >= generation),
        )
        .await
        .expect("capture never reached running")
        .unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.settings_path);
    }
}

#[tokio::test]
async fn settings_change_restarts_capture_once() {
    let harness = Harness::new();
    harness.state.supervisor.start().unwrap();
    harness.wait_running(1).await;

    let (status, body) = harness
        .post("/api/settings", r#"{"leftChannel":2,"rightChannel":3}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["leftChannel"], 2);

    harness.wait_running(2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(harness.launcher.kills.load(Ordering::SeqCst), 1);
    let spawned = harness.launcher.spawned.lock();
    assert_eq!(spawned.len(), 2);
    assert!(spawned[1].join(" ").contains("-L 2 -R 3"));
    assert!(spawned[1].join(" ").starts_with("-d 0 -m 11 -c 16"));
}

#[tokio::test]
async fn invalid_settings_are_rejected_without_restart() {
    let harness = Harness::new();
    harness.state.supervisor.start().unwrap();
    harness.wait_running(1).await;

    let (status, body) = harness.post("/api/settings", r#"{"rightChannel":99}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("99"));

    let (status, _) = harness.post("/api/settings", r#"{"mode":"fast"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness.post("/api/settings", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.launcher.kills.load(Ordering::SeqCst), 0);
    assert_eq!(harness.state.settings.get().right_channel, 1);
}

#[tokio::test]
async fn settings_and_status_endpoints() {
    let harness = Harness::new();

    let (status, body) = harness.get("/api/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], 11);
    assert_eq!(body["rightChannel"], 1);
    assert_eq!(body["leftAudioChannel"], 0);
    assert_eq!(body["rightAudioChannel"], 1);
    assert!(body.get("success").is_none());

    let (status, body) = harness.get("/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_integrating"], false);
    assert_eq!(body["data"]["capture"]["state"], "stopped");
    assert_eq!(body["data"]["peers"], 0);
    assert_eq!(body["data"]["delivery"], "webrtc");
}

#[tokio::test]
async fn settings_read_back_after_update() {
    let harness = Harness::new();
    let (status, _) = harness
        .post("/api/settings", r#"{"leftAudioChannel":"4","rightAudioChannel":5}"#)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = harness.get("/api/settings").await;
    assert_eq!(body["leftAudioChannel"], 4);
    assert_eq!(body["rightAudioChannel"], 5);
    assert_eq!(body["leftChannel"], 4);
}

#[tokio::test]
async fn plain_get_on_root_redirects() {
    let harness = Harness::new();
    let response = harness
        .app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/index.html");
}

#[tokio::test]
async fn input_config_errors_use_envelope() {
    let harness = Harness::new();

    let (status, body) = harness.get("/api/input-config/options").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = harness.get("/api/input-config/devices").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some());

    let (status, _) = harness
        .post("/api/input-config/apply", r#"{"device":"--list"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[cfg(unix)]
#[tokio::test]
async fn input_config_listings_are_served_bare() {
    use std::os::unix::fs::PermissionsExt;

    let helper = std::env::temp_dir().join(format!("input-config-http-{}.sh", uuid::Uuid::new_v4()));
    let script = r#"#!/bin/sh
case "$1" in
  --list) echo '0: DeckLink Duo 2' ;;
  --device) printf 'Video inputs:\n1: SDI (current)\n2: HDMI\nAudio inputs:\n3: Embedded *\n' ;;
esac
"#;
    std::fs::write(&helper, script).unwrap();
    std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
    let harness = Harness::with_helper(helper.clone());

    let (status, body) = harness.get("/api/input-config/devices").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["devices"][0]["id"], "0");
    assert_eq!(body["devices"][0]["name"], "DeckLink Duo 2");

    let (status, body) = harness.get("/api/input-config/options?device=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["videoInputs"].as_array().unwrap().len(), 2);
    assert_eq!(body["videoInputs"][0]["selected"], true);
    assert_eq!(body["audioInputs"][0]["label"], "Embedded");
    assert!(body.get("data").is_none());

    let _ = std::fs::remove_file(helper);
}

#[tokio::test]
async fn mjpeg_stream_headers() {
    let harness = Harness::new();
    let response = harness
        .app
        .clone()
        .oneshot(Request::get("/vectorscope.mjpeg").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert_eq!(harness.state.mjpeg.consumer_count(), 1);
}
