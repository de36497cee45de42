use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_STUDIO_USER_ID};
use crate::credentials::{CredentialError, CredentialSelector};
use crate::lineage::{Artifact, ArtifactId, LineageError};
use crate::model::client::{GenerationBackend, ImageClientError};
use crate::persistence::{ArtifactStore, PersistenceError, Subscription};
use crate::request::RequestError;
use crate::session::SharedSession;

/// Rotated while a request is in flight.
pub const PROGRESS_MESSAGES: [&str; 6] = [
    "Reading your photo...",
    "Blocking out the composition...",
    "Cranking up the contrast...",
    "Setting the headline...",
    "Adding the final glow...",
    "Almost there...",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationError {
    #[error("upload a photo or select a thumbnail to edit before generating")]
    MissingBaseImage,

    #[error(
        "permission denied by the image provider ({message}); select a key from a paid project or switch to the fast engine"
    )]
    PermissionDenied { message: String },

    #[error("generation failed: {message}")]
    GenerationFailed { message: String },
}

impl GenerationError {
    pub fn recovery_options(&self) -> &'static [RecoveryOption] {
        match self {
            Self::PermissionDenied { .. } => &[
                RecoveryOption::SwitchToFastEngine,
                RecoveryOption::SelectCredential,
            ],
            Self::MissingBaseImage | Self::GenerationFailed { .. } => &[],
        }
    }
}

impl From<RequestError> for GenerationError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::MissingBaseImage => Self::MissingBaseImage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOption {
    SwitchToFastEngine,
    SelectCredential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum GenerationPhase {
    Idle,
    Submitting,
    Succeeded { artifact_id: ArtifactId },
    Failed { error: GenerationError },
}

impl GenerationPhase {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Another request was already in flight; nothing happened.
    Ignored,
    Succeeded { artifact_id: ArtifactId },
    Failed(GenerationError),
}

/// Maps a backend failure onto the two user-facing kinds. Permission problems are recognized
/// by status or by the wording providers use for them.
pub fn classify_backend_error(error: &ImageClientError) -> GenerationError {
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();

    let denied = error.status() == Some(StatusCode::FORBIDDEN)
        || message.contains("403")
        || lowered.contains("permission")
        || lowered.contains("requested entity was not found");

    if denied {
        GenerationError::PermissionDenied { message }
    } else {
        GenerationError::GenerationFailed { message }
    }
}

struct ProgressGuard(JoinHandle<()>);

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one generation at a time against the shared session.
pub struct GenerationController<B> {
    session: SharedSession,
    backend: Arc<B>,
    store: Option<Arc<dyn ArtifactStore>>,
    user_id: String,
    progress_interval: Duration,
}

impl<B: GenerationBackend + 'static> GenerationController<B> {
    pub fn new(session: SharedSession, backend: B) -> Self {
        Self {
            session,
            backend: Arc::new(backend),
            store: None,
            user_id: DEFAULT_STUDIO_USER_ID.to_owned(),
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>, user_id: impl Into<String>) -> Self {
        self.store = Some(store);
        self.user_id = user_id.into();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Builds a request from the current session, sends it, and records the outcome.
    ///
    /// Only one request is ever in flight; a call made meanwhile returns
    /// [`SubmitOutcome::Ignored`] without touching state.
    pub async fn submit(&self) -> SubmitOutcome {
        let prepared = {
            let mut session = self.session.lock();
            if session.phase().is_in_flight() {
                debug!("generation already in flight; ignoring submit");
                return SubmitOutcome::Ignored;
            }

            match session.build_request() {
                Ok(request) => {
                    let config = session.config().clone();
                    let label = Artifact::label_for(&config, session.presets());
                    session.begin_submit(PROGRESS_MESSAGES[0]);
                    Ok((request, config, label))
                }
                Err(error) => {
                    let error = GenerationError::from(error);
                    session.fail(error.clone());
                    Err(error)
                }
            }
        };

        let (request, config, label) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                info!(error = %error, "generation rejected before submission");
                return SubmitOutcome::Failed(error);
            }
        };

        info!(
            engine = %request.engine,
            aspect_ratio = %request.aspect_ratio,
            edit = request.is_edit(),
            scoped = request.region().is_some(),
            "submitting generation request"
        );

        let progress = self.spawn_progress_rotation();
        let result = self.backend.generate(&request).await;
        drop(progress);

        match result {
            Ok(image) => {
                let artifact = Artifact::new(image, &config, label);
                let recorded = {
                    let mut session = self.session.lock();
                    match session.record_result(artifact.clone()) {
                        Ok(artifact_id) => {
                            session.settle(GenerationPhase::Succeeded { artifact_id });
                            Ok(artifact_id)
                        }
                        Err(error) => {
                            let error = GenerationError::GenerationFailed {
                                message: error.to_string(),
                            };
                            session.fail(error.clone());
                            Err(error)
                        }
                    }
                };

                match recorded {
                    Ok(artifact_id) => {
                        info!(artifact_id = %artifact_id, label = artifact.label(), "generation succeeded");
                        self.persist(artifact).await;
                        SubmitOutcome::Succeeded { artifact_id }
                    }
                    Err(error) => {
                        warn!(error = %error, "generated artifact could not be recorded");
                        SubmitOutcome::Failed(error)
                    }
                }
            }
            Err(error) => {
                let classified = classify_backend_error(&error);
                warn!(error = %error, kind = ?classified, "generation failed");
                self.session.lock().fail(classified.clone());
                SubmitOutcome::Failed(classified)
            }
        }
    }

    /// Removes the artifact from the session and, best effort, from storage.
    pub async fn delete_artifact(&self, artifact_id: ArtifactId) -> Result<Artifact, LineageError> {
        let removed = self.session.lock().delete_artifact(artifact_id)?;

        if let Some(store) = self.store.clone() {
            self.delete_stored(store, artifact_id).await;
        }

        Ok(removed)
    }

    /// Recovery: drop to the fast engine and clear the error.
    pub fn switch_to_fast_engine(&self) {
        self.session.lock().switch_to_fast_engine();
        info!("switched to fast engine");
    }

    /// Recovery: run the host credential picker, then clear the error on success.
    pub async fn select_credential<C: CredentialSelector>(
        &self,
        selector: &C,
    ) -> Result<(), CredentialError> {
        let selected = selector.select_credential().await;
        let mut session = self.session.lock();
        match selected {
            Ok(()) => {
                session.set_credential_available(true);
                session.acknowledge();
                Ok(())
            }
            Err(error) => {
                session.set_credential_available(false);
                Err(error)
            }
        }
    }

    pub fn refresh_credential_status<C: CredentialSelector>(&self, selector: &C) {
        self.session
            .lock()
            .set_credential_available(selector.has_credential());
    }

    /// Subscribes the session to stored history. `None` when no store is configured.
    pub fn restore_history(&self) -> Result<Option<Subscription>, PersistenceError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };

        let session = self.session.clone();
        let subscription = store.subscribe(
            &self.user_id,
            Arc::new(move |artifacts: Vec<Artifact>| {
                let added = session.lock().merge_restored(artifacts);
                if added > 0 {
                    debug!(added, "merged stored artifacts into history");
                }
            }),
        )?;
        Ok(Some(subscription))
    }

    async fn persist(&self, artifact: Artifact) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let user_id = self.user_id.clone();
        let artifact_id = artifact.id();
        let saver = store.clone();
        match tokio::task::spawn_blocking(move || saver.save(&user_id, &artifact)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(artifact_id = %artifact_id, error = %error, "failed to persist artifact");
                return;
            }
            Err(error) => {
                warn!(artifact_id = %artifact_id, error = %error, "artifact persist task failed");
                return;
            }
        }

        // A delete that ran while the save was in flight found nothing to remove.
        let retired = self.session.lock().lineage().is_retired(artifact_id);
        if retired {
            debug!(artifact_id = %artifact_id, "artifact deleted during save; removing stored copy");
            self.delete_stored(store, artifact_id).await;
        }
    }

    async fn delete_stored(&self, store: Arc<dyn ArtifactStore>, artifact_id: ArtifactId) {
        let user_id = self.user_id.clone();
        let outcome =
            tokio::task::spawn_blocking(move || store.delete(&user_id, artifact_id)).await;
        match outcome {
            Ok(Ok(())) | Ok(Err(PersistenceError::NotFound { .. })) => {}
            Ok(Err(error)) => {
                warn!(artifact_id = %artifact_id, error = %error, "failed to delete stored artifact");
            }
            Err(error) => {
                warn!(artifact_id = %artifact_id, error = %error, "artifact delete task failed");
            }
        }
    }

    fn spawn_progress_rotation(&self) -> ProgressGuard {
        let session = self.session.clone();
        let interval = self.progress_interval;
        ProgressGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut index = 0;
            loop {
                ticker.tick().await;
                index = (index + 1) % PROGRESS_MESSAGES.len();
                let rotated = session.lock().rotate_progress(PROGRESS_MESSAGES[index]);
                if !rotated {
                    break;
                }
            }
        }))
    }
}
