use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StudioSettings;
use crate::credentials::EnvCredentialSelector;
use crate::generation::{GenerationError, GenerationPhase, RecoveryOption, SubmitOutcome};
use crate::lineage::{ArtifactId, LineageError};
use crate::runtime::{StudioController, StudioRuntime};
use crate::selection::{SelectionError, SelectionRect};
use crate::session::StudioSession;
use crate::thumbnail::presets::Preset;
use crate::thumbnail::{AspectRatio, ImageData, QualityTier, TextStyle, ThumbnailConfig};

#[derive(Clone)]
struct AppState {
    controller: Arc<StudioController>,
    credentials: Arc<EnvCredentialSelector>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    recovery: &'static [RecoveryOption],
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ArtifactSummary {
    id: ArtifactId,
    label: String,
    mime_type: String,
    byte_len: usize,
    created_at_ms: u64,
}

#[derive(Debug, Serialize)]
struct SessionBody {
    #[serde(flatten)]
    phase: GenerationPhase,
    progress_message: Option<&'static str>,
    credential_available: bool,
    config: ThumbnailConfig,
    active_target: Option<ArtifactId>,
    has_fresh_upload: bool,
    artifacts: Vec<ArtifactSummary>,
}

#[derive(Debug, Serialize)]
struct GeneratedBody {
    artifact_id: ArtifactId,
}

/// Partial config update. Fields left out are unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    preset_id: Option<String>,
    style: Option<String>,
    overlay_text: Option<String>,
    character_action: Option<String>,
    background_details: Option<String>,
    facial_expression: Option<String>,
    text_style: Option<TextStyle>,
    aspect_ratio: Option<AspectRatio>,
    quality: Option<QualityTier>,
    edit_instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectionBody {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

pub async fn run_http_server(settings: &StudioSettings, bind: &str) -> Result<()> {
    let runtime = StudioRuntime::from_settings(settings)?;
    let state = AppState {
        controller: runtime.controller.clone(),
        credentials: runtime.credentials.clone(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind HTTP server to `{bind}`"))?;
    let local_addr = listener.local_addr().ok();

    info!(
        provider = %settings.image_provider,
        requested_bind = %bind,
        bound_addr = local_addr.map(|addr| addr.to_string()),
        watching_history = runtime.is_watching_history(),
        "starting HTTP server"
    );

    axum::serve(listener, app)
        .await
        .context("HTTP server exited with an error")
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/session", get(handle_session))
        .route("/presets", get(handle_presets))
        .route("/upload", put(handle_upload))
        .route("/config", axum::routing::patch(handle_config))
        .route(
            "/selection",
            put(handle_set_selection).delete(handle_clear_selection),
        )
        .route("/generate", post(handle_generate))
        .route("/edit/cancel", post(handle_cancel_edit))
        .route("/artifacts/:id", delete(handle_delete_artifact))
        .route("/artifacts/:id/edit", post(handle_begin_edit))
        .route("/artifacts/:id/image", get(handle_artifact_image))
        .route("/recovery/fast-engine", post(handle_fast_engine))
        .route("/recovery/credential", post(handle_select_credential))
        .with_state(state)
}

async fn handle_health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn handle_session(State(state): State<AppState>) -> Json<SessionBody> {
    let session = state.controller.session().lock();
    let lineage = session.lineage();
    Json(SessionBody {
        phase: session.phase().clone(),
        progress_message: session.progress_message(),
        credential_available: session.credential_available(),
        config: session.config().clone(),
        active_target: lineage.active_target(),
        has_fresh_upload: lineage.fresh_upload().is_some(),
        artifacts: lineage
            .artifacts()
            .iter()
            .map(|artifact| ArtifactSummary {
                id: artifact.id(),
                label: artifact.label().to_owned(),
                mime_type: artifact.image().mime_type().to_owned(),
                byte_len: artifact.image().len(),
                created_at_ms: artifact
                    .created_at()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_millis() as u64)
                    .unwrap_or_default(),
            })
            .collect(),
    })
}

async fn handle_presets(State(state): State<AppState>) -> Json<Vec<Preset>> {
    Json(state.controller.session().lock().presets().all().to_vec())
}

async fn handle_upload(State(state): State<AppState>, body: Bytes) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "upload body is empty", &[]);
    }

    let image = ImageData::from_bytes(body.to_vec());
    info!(mime_type = image.mime_type(), byte_len = image.len(), "received upload");
    state.controller.session().lock().set_fresh_upload(image);
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_config(State(state): State<AppState>, Json(patch): Json<ConfigPatch>) -> Response {
    let mut session = state.controller.session().lock();
    match apply_config_patch(&mut session, patch) {
        Ok(()) => (StatusCode::OK, Json(session.config().clone())).into_response(),
        Err(error @ ConfigPatchError::UnknownPreset { .. }) => {
            error_response(StatusCode::NOT_FOUND, &error.to_string(), &[])
        }
        Err(error @ ConfigPatchError::NotEditing) => {
            error_response(StatusCode::CONFLICT, &error.to_string(), &[])
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum ConfigPatchError {
    #[error("unknown preset `{preset_id}`")]
    UnknownPreset { preset_id: String },

    #[error("edit instruction can only be set while editing an artifact")]
    NotEditing,
}

/// Applies `patch` only if every field of it is acceptable; a rejected patch changes nothing.
fn apply_config_patch(
    session: &mut StudioSession,
    patch: ConfigPatch,
) -> Result<(), ConfigPatchError> {
    if let Some(preset_id) = patch.preset_id.as_deref()
        && session.presets().find(preset_id).is_none()
    {
        return Err(ConfigPatchError::UnknownPreset {
            preset_id: preset_id.to_owned(),
        });
    }
    if patch.edit_instruction.is_some() && !session.config().is_editing() {
        return Err(ConfigPatchError::NotEditing);
    }

    if let Some(preset_id) = patch.preset_id.as_deref() {
        session.apply_preset(preset_id);
    }
    if let Some(instruction) = patch.edit_instruction {
        session.set_edit_instruction(instruction);
    }

    let config = session.config_mut();
    if let Some(style) = patch.style {
        config.style = style;
        config.preset_id = None;
    }
    if let Some(overlay_text) = patch.overlay_text {
        config.overlay_text = overlay_text;
    }
    if let Some(character_action) = patch.character_action {
        config.character_action = character_action;
    }
    if let Some(background_details) = patch.background_details {
        config.background_details = background_details;
    }
    if let Some(facial_expression) = patch.facial_expression {
        config.facial_expression = facial_expression;
    }
    if let Some(text_style) = patch.text_style {
        config.text_style = text_style;
    }
    if let Some(aspect_ratio) = patch.aspect_ratio {
        config.aspect_ratio = aspect_ratio;
    }
    if let Some(quality) = patch.quality {
        config.quality = quality;
    }
    Ok(())
}

async fn handle_set_selection(
    State(state): State<AppState>,
    Json(body): Json<SelectionBody>,
) -> Response {
    let rect = match SelectionRect::new(body.x, body.y, body.width, body.height) {
        Ok(rect) => rect,
        Err(error) => return selection_error_response(&error),
    };

    match state.controller.session().lock().set_selection(rect) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => selection_error_response(&error),
    }
}

async fn handle_clear_selection(State(state): State<AppState>) -> StatusCode {
    state.controller.session().lock().clear_selection();
    StatusCode::NO_CONTENT
}

async fn handle_generate(State(state): State<AppState>) -> Response {
    // The submit runs on its own task so a dropped connection cannot strand the session
    // in the submitting phase.
    let controller = state.controller.clone();
    let outcome = match tokio::spawn(async move { controller.submit().await }).await {
        Ok(outcome) => outcome,
        Err(error) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("generation task failed: {error}"),
                &[],
            );
        }
    };

    match outcome {
        SubmitOutcome::Succeeded { artifact_id } => {
            (StatusCode::OK, Json(GeneratedBody { artifact_id })).into_response()
        }
        SubmitOutcome::Ignored => error_response(
            StatusCode::CONFLICT,
            "a generation is already in progress",
            &[],
        ),
        SubmitOutcome::Failed(error) => error_response(
            status_for_generation_error(&error),
            &error.to_string(),
            error.recovery_options(),
        ),
    }
}

async fn handle_begin_edit(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let artifact_id = match parse_artifact_id(&id) {
        Ok(artifact_id) => artifact_id,
        Err(response) => return response,
    };

    match state.controller.session().lock().begin_editing(artifact_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => lineage_error_response(&error),
    }
}

async fn handle_cancel_edit(State(state): State<AppState>) -> StatusCode {
    state.controller.session().lock().cancel_editing();
    StatusCode::NO_CONTENT
}

async fn handle_delete_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let artifact_id = match parse_artifact_id(&id) {
        Ok(artifact_id) => artifact_id,
        Err(response) => return response,
    };

    match state.controller.delete_artifact(artifact_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => lineage_error_response(&error),
    }
}

async fn handle_artifact_image(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let artifact_id = match parse_artifact_id(&id) {
        Ok(artifact_id) => artifact_id,
        Err(response) => return response,
    };

    let session = state.controller.session().lock();
    let Some(artifact) = session.lineage().get(artifact_id) else {
        return lineage_error_response(&LineageError::NotFound { artifact_id });
    };

    let stamp = artifact
        .created_at()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let disposition = format!(
        "attachment; filename=\"viral-thumbnail-{stamp}.{}\"",
        artifact.image().file_extension()
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.image().mime_type().to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.image().bytes().to_vec(),
    )
        .into_response()
}

async fn handle_fast_engine(State(state): State<AppState>) -> StatusCode {
    state.controller.switch_to_fast_engine();
    StatusCode::NO_CONTENT
}

async fn handle_select_credential(State(state): State<AppState>) -> Response {
    match state
        .controller
        .select_credential(state.credentials.as_ref())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(StatusCode::BAD_REQUEST, &error.to_string(), &[]),
    }
}

fn parse_artifact_id(raw: &str) -> Result<ArtifactId, Response> {
    raw.parse::<ArtifactId>().map_err(|error| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("invalid artifact id `{raw}`: {error}"),
            &[],
        )
    })
}

fn status_for_generation_error(error: &GenerationError) -> StatusCode {
    match error {
        GenerationError::MissingBaseImage => StatusCode::BAD_REQUEST,
        GenerationError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        GenerationError::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn lineage_error_response(error: &LineageError) -> Response {
    let status = match error {
        LineageError::NotFound { .. } => StatusCode::NOT_FOUND,
        LineageError::DuplicateId { .. } => StatusCode::CONFLICT,
    };
    error_response(status, &error.to_string(), &[])
}

fn selection_error_response(error: &SelectionError) -> Response {
    let status = match error {
        SelectionError::NotEditing => StatusCode::CONFLICT,
        SelectionError::Invalid { .. } => StatusCode::BAD_REQUEST,
    };
    error_response(status, &error.to_string(), &[])
}

fn error_response(
    status: StatusCode,
    message: &str,
    recovery: &'static [RecoveryOption],
) -> Response {
    warn!(status = status.as_u16(), error = %message, "HTTP request failed");
    let body = ErrorBody {
        error: message.to_owned(),
        recovery,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::{ConfigPatch, ConfigPatchError, apply_config_patch, status_for_generation_error};
    use crate::generation::GenerationError;
    use crate::lineage::Artifact;
    use crate::session::StudioSession;
    use crate::thumbnail::presets::PresetCatalog;
    use crate::thumbnail::{AspectRatio, ImageData, QualityTier};

    #[test]
    fn generation_errors_map_to_distinct_statuses() {
        assert_eq!(
            status_for_generation_error(&GenerationError::MissingBaseImage),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for_generation_error(&GenerationError::PermissionDenied {
                message: "HTTP 403".to_owned()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for_generation_error(&GenerationError::GenerationFailed {
                message: "timeout".to_owned()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn config_patch_accepts_partial_updates_and_rejects_unknown_fields() {
        let patch: ConfigPatch = serde_json::from_str(
            r#"{"aspect_ratio":"1:1","quality":{"tier":"fast"},"overlay_text":"NO WAY"}"#,
        )
        .expect("patch");
        assert_eq!(patch.aspect_ratio, Some(AspectRatio::Square));
        assert_eq!(patch.quality, Some(QualityTier::Fast));
        assert_eq!(patch.overlay_text.as_deref(), Some("NO WAY"));
        assert!(patch.style.is_none());

        assert!(serde_json::from_str::<ConfigPatch>(r#"{"selection":null}"#).is_err());
    }

    #[test]
    fn rejected_config_patch_leaves_session_untouched() {
        let mut session = StudioSession::new(PresetCatalog::default());
        let before = session.config().clone();

        let patch: ConfigPatch = serde_json::from_str(
            r#"{"preset_id":"gaming","edit_instruction":"add fire","overlay_text":"NOPE"}"#,
        )
        .expect("patch");
        assert_eq!(
            apply_config_patch(&mut session, patch),
            Err(ConfigPatchError::NotEditing)
        );
        assert_eq!(session.config(), &before);

        let patch: ConfigPatch =
            serde_json::from_str(r#"{"preset_id":"missing","overlay_text":"NOPE"}"#).expect("patch");
        assert_eq!(
            apply_config_patch(&mut session, patch),
            Err(ConfigPatchError::UnknownPreset {
                preset_id: "missing".to_owned()
            })
        );
        assert_eq!(session.config(), &before);
    }

    #[test]
    fn config_patch_applies_preset_and_instruction_while_editing() {
        let mut session = StudioSession::new(PresetCatalog::default());
        let artifact = Artifact::new(
            ImageData::new("image/png", vec![1, 2, 3]),
            &session.config().clone(),
            "Custom",
        );
        session.record_result(artifact).expect("record");

        let patch: ConfigPatch =
            serde_json::from_str(r#"{"preset_id":"gaming","edit_instruction":"add fire"}"#)
                .expect("patch");
        apply_config_patch(&mut session, patch).expect("apply");

        assert_eq!(session.config().preset_id.as_deref(), Some("gaming"));
        assert_eq!(session.config().edit_instruction(), Some("add fire"));
    }
}
