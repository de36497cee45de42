use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_path(prefix: &str) -> PathBuf {
    let now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "thumbnail_studio_{prefix}_{}_{}",
        std::process::id(),
        now_ns
    ))
}

pub fn remove_dir_if_exists(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

/// Points a spawned binary at `gemini_base_url` with a throwaway key and no persistence.
pub fn apply_test_env(
    command: &mut Command,
    artifacts_dir: &Path,
    log_dir: &Path,
    gemini_base_url: &str,
) {
    command.env("IMAGE_PROVIDER", "gemini");
    command.env("GEMINI_API_KEY", "test-key");
    command.env("GEMINI_BASE_URL", gemini_base_url);
    command.env("PERSIST_ARTIFACTS", "false");
    command.env("ARTIFACTS_DIR", artifacts_dir.as_os_str());
    command.env("STUDIO_USER_ID", "integration");
    command.env("PROGRESS_INTERVAL_MS", "50");
    command.env("RUST_LOG", "error");
    command.env("THUMBSTUDIO_FILE_LOG", "error");
    command.env("THUMBSTUDIO_LOG_DIR", log_dir.as_os_str());
}
