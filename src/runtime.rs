use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{ImageProvider, StudioSettings};
use crate::credentials::{EnvCredentialSelector, SharedApiKey};
use crate::generation::GenerationController;
use crate::model::advisor::AdvisorClient;
use crate::model::client::ImageModelClient;
use crate::persistence::{DirectoryArtifactStore, Subscription};
use crate::session::{SharedSession, StudioSession};
use crate::thumbnail::presets::PresetCatalog;

pub type StudioController = GenerationController<ImageModelClient>;

/// Everything one studio surface (CLI, GUI, HTTP) needs, wired from settings.
pub struct StudioRuntime {
    pub settings: StudioSettings,
    pub controller: Arc<StudioController>,
    pub credentials: Arc<EnvCredentialSelector>,
    pub advisor: AdvisorClient,
    history: Option<Subscription>,
}

impl StudioRuntime {
    pub fn from_settings(settings: &StudioSettings) -> Result<Self> {
        let presets = PresetCatalog::load(settings.presets_file.as_deref())
            .context("failed to load thumbnail presets")?;
        let session = SharedSession::new(StudioSession::new(presets));

        let image_key = SharedApiKey::new(settings.image_api_key().map(str::to_owned));
        let advisor_key = advisor_key_for(settings, &image_key);
        let credentials = Arc::new(EnvCredentialSelector::new(
            settings.image_provider.api_key_variable(),
            image_key.clone(),
        ));

        let client = ImageModelClient::new(settings.clone(), image_key);
        let mut controller = GenerationController::new(session, client)
            .with_progress_interval(settings.progress_interval());
        if settings.persist_artifacts {
            controller = controller.with_store(
                Arc::new(DirectoryArtifactStore::new(&settings.artifacts_dir)),
                settings.user_id.clone(),
            );
        }
        controller.refresh_credential_status(credentials.as_ref());

        let history = match controller.restore_history() {
            Ok(history) => history,
            Err(error) => {
                warn!(error = %error, "stored history is unavailable; continuing without it");
                None
            }
        };

        info!(
            provider = %settings.image_provider,
            persist = settings.persist_artifacts,
            artifacts_dir = %settings.artifacts_dir.display(),
            restored = controller.session().lock().lineage().artifacts().len(),
            "studio runtime ready"
        );

        Ok(Self {
            settings: settings.clone(),
            controller: Arc::new(controller),
            credentials,
            advisor: AdvisorClient::new(settings, advisor_key),
            history,
        })
    }

    pub fn session(&self) -> &SharedSession {
        self.controller.session()
    }

    pub fn is_watching_history(&self) -> bool {
        self.history.is_some()
    }
}

/// The advisor always talks to Gemini. On that provider it shares the image key, so a key
/// picked during permission recovery reaches both.
fn advisor_key_for(settings: &StudioSettings, image_key: &SharedApiKey) -> SharedApiKey {
    match settings.image_provider {
        ImageProvider::Gemini => image_key.clone(),
        ImageProvider::HuggingFace => SharedApiKey::new(settings.gemini_api_key.clone()),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ImageProvider, StudioSettings};
    use crate::credentials::SharedApiKey;

    use super::advisor_key_for;

    #[test]
    fn gemini_advisor_sees_a_reselected_image_key() {
        let settings = StudioSettings::default();
        let image_key = SharedApiKey::new(None);
        let advisor_key = advisor_key_for(&settings, &image_key);

        image_key.replace(Some("fresh-key".to_owned()));
        assert_eq!(advisor_key.get().as_deref(), Some("fresh-key"));
    }

    #[test]
    fn huggingface_advisor_keeps_its_own_gemini_key() {
        let settings = StudioSettings {
            image_provider: ImageProvider::HuggingFace,
            gemini_api_key: Some("gemini-key".to_owned()),
            huggingface_api_key: Some("hf-key".to_owned()),
            ..StudioSettings::default()
        };
        let image_key = SharedApiKey::new(settings.image_api_key().map(str::to_owned));
        let advisor_key = advisor_key_for(&settings, &image_key);

        image_key.replace(Some("other-hf-key".to_owned()));
        assert_eq!(advisor_key.get().as_deref(), Some("gemini-key"));
    }
}
