use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use thumbnail_studio::test_support::{apply_test_env, remove_dir_if_exists, temp_path};
use tokio::time::sleep;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

struct RunningServer {
    child: Child,
    bind_addr: String,
    artifacts_dir: PathBuf,
    log_dir: PathBuf,
}

impl RunningServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.bind_addr)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        remove_dir_if_exists(&self.artifacts_dir);
        remove_dir_if_exists(&self.log_dir);
    }
}

#[tokio::test]
async fn generate_without_upload_is_rejected_before_any_network_call() {
    let Some(server) = start_server().await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/generate"))
        .send()
        .await
        .expect("HTTP request should complete");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response
        .json()
        .await
        .expect("HTTP error body should be valid JSON");
    let error = body
        .get("error")
        .and_then(|value| value.as_str())
        .expect("error field should be a string");
    assert!(
        error.contains("upload a photo"),
        "expected missing base image error, got: {error}"
    );

    let session: serde_json::Value = client
        .get(server.url("/session"))
        .send()
        .await
        .expect("session request should complete")
        .json()
        .await
        .expect("session body should be valid JSON");
    assert_eq!(session["phase"], "failed");
    assert_eq!(session["error"]["kind"], "missing_base_image");
}

#[tokio::test]
async fn unreachable_image_backend_maps_to_bad_gateway() {
    let Some(server) = start_server().await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let client = reqwest::Client::new();

    let upload = client
        .put(server.url("/upload"))
        .body(PNG_SIGNATURE.to_vec())
        .send()
        .await
        .expect("upload should complete");
    assert_eq!(upload.status(), StatusCode::NO_CONTENT);

    let session: serde_json::Value = client
        .get(server.url("/session"))
        .send()
        .await
        .expect("session request should complete")
        .json()
        .await
        .expect("session body should be valid JSON");
    assert_eq!(session["has_fresh_upload"], true);
    assert_eq!(session["phase"], "idle");

    let response = client
        .post(server.url("/generate"))
        .send()
        .await
        .expect("HTTP request should complete");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response
        .json()
        .await
        .expect("HTTP error body should be valid JSON");
    let error = body
        .get("error")
        .and_then(|value| value.as_str())
        .expect("error field should be a string");
    assert!(
        error.contains("generation failed"),
        "expected upstream failure in error, got: {error}"
    );

    let session: serde_json::Value = client
        .get(server.url("/session"))
        .send()
        .await
        .expect("session request should complete")
        .json()
        .await
        .expect("session body should be valid JSON");
    assert_eq!(session["phase"], "failed");
    assert_eq!(session["progress_message"], serde_json::Value::Null);
    assert_eq!(session["artifacts"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn selection_and_instruction_require_edit_mode() {
    let Some(server) = start_server().await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let client = reqwest::Client::new();

    let selection = client
        .put(server.url("/selection"))
        .json(&json!({ "x": 10.0, "y": 10.0, "width": 20.0, "height": 20.0 }))
        .send()
        .await
        .expect("selection request should complete");
    assert_eq!(selection.status(), StatusCode::CONFLICT);

    let instruction = client
        .patch(server.url("/config"))
        .json(&json!({ "edit_instruction": "make it brighter" }))
        .send()
        .await
        .expect("config request should complete");
    assert_eq!(instruction.status(), StatusCode::CONFLICT);

    let config = client
        .patch(server.url("/config"))
        .json(&json!({ "overlay_text": "NO WAY", "aspect_ratio": "9:16" }))
        .send()
        .await
        .expect("config request should complete");
    assert_eq!(config.status(), StatusCode::OK);
    let body: serde_json::Value = config.json().await.expect("config body should be JSON");
    assert_eq!(body["overlay_text"], "NO WAY");
    assert_eq!(body["aspect_ratio"], "9:16");
    assert_eq!(body["edit"], serde_json::Value::Null);
}

#[tokio::test]
async fn unknown_artifact_ids_are_reported() {
    let Some(server) = start_server().await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let client = reqwest::Client::new();

    let malformed = client
        .delete(server.url("/artifacts/not-an-id"))
        .send()
        .await
        .expect("delete request should complete");
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let missing = client
        .post(server.url("/artifacts/01890a5d-ac96-774b-bcce-b302099a8057/edit"))
        .send()
        .await
        .expect("edit request should complete");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[test]
fn cli_lists_builtin_presets() {
    let artifacts_dir = temp_path("integration-cli-artifacts");
    let log_dir = temp_path("integration-cli-logs");
    fs::create_dir_all(&log_dir).expect("log dir should be creatable");

    let mut command = Command::new(bin_path());
    command.arg("presets");
    apply_test_env(&mut command, &artifacts_dir, &log_dir, "http://127.0.0.1:9");
    let output = command.output().expect("CLI command should execute");

    remove_dir_if_exists(&artifacts_dir);
    remove_dir_if_exists(&log_dir);

    assert!(output.status.success(), "presets command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.lines().any(|line| line.starts_with("mrbeast")),
        "expected the builtin presets, got: {stdout}"
    );
}

#[test]
fn cli_generate_fails_for_missing_photo() {
    let artifacts_dir = temp_path("integration-cli-artifacts");
    let log_dir = temp_path("integration-cli-logs");
    fs::create_dir_all(&log_dir).expect("log dir should be creatable");

    let mut command = Command::new(bin_path());
    command.args(["generate", "--image"]).arg(artifacts_dir.join("missing.png"));
    apply_test_env(&mut command, &artifacts_dir, &log_dir, "http://127.0.0.1:9");
    let output = command.output().expect("CLI command should execute");

    remove_dir_if_exists(&artifacts_dir);
    remove_dir_if_exists(&log_dir);

    assert!(!output.status.success(), "generate should fail without a photo");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to read photo"),
        "expected read failure in CLI stderr, got: {stderr}"
    );
}

async fn start_server() -> Option<RunningServer> {
    let port = find_available_port()?;
    let bind_addr = format!("127.0.0.1:{port}");
    let artifacts_dir = temp_path("integration-artifacts");
    let log_dir = temp_path("integration-logs");
    fs::create_dir_all(&log_dir).expect("log dir should be creatable");

    let mut command = Command::new(bin_path());
    command
        .args(["serve", "--bind", &bind_addr])
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    apply_test_env(&mut command, &artifacts_dir, &log_dir, "http://127.0.0.1:9");

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(error) => panic!("server should start: {error}"),
    };

    let health_url = format!("http://{bind_addr}/health");
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Some(status) = child.try_wait().expect("failed to poll server process") {
            panic!("server exited before becoming healthy: {status}");
        }

        if let Ok(response) = client.get(&health_url).send().await
            && response.status().is_success()
        {
            let body: serde_json::Value = response
                .json()
                .await
                .expect("health body should be valid JSON");
            assert_eq!(body["status"], "ok");
            return Some(RunningServer {
                child,
                bind_addr,
                artifacts_dir,
                log_dir,
            });
        }

        sleep(Duration::from_millis(50)).await;
    }

    let _ = child.kill();
    let _ = child.wait();
    panic!("server did not become healthy at {health_url}");
}

fn find_available_port() -> Option<u16> {
    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(error) => panic!("ephemeral port should be available for bind: {error}"),
    };
    let port = listener
        .local_addr()
        .expect("ephemeral listener should have local address")
        .port();
    drop(listener);
    Some(port)
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_thumbnail_studio")
}
