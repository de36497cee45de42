use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("{variable} is not set; add it to the environment or .env and try again")]
    Missing { variable: String },
}

/// API key shared between the image client, the advisor and the credential selector.
#[derive(Debug, Clone, Default)]
pub struct SharedApiKey(Arc<RwLock<Option<String>>>);

impl SharedApiKey {
    pub fn new(key: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(key)))
    }

    pub fn get(&self) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_present(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn replace(&self, key: Option<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = key;
    }
}

/// Host-side credential picker used for permission recovery.
pub trait CredentialSelector: Send + Sync {
    fn has_credential(&self) -> bool;

    fn select_credential(&self) -> impl Future<Output = Result<(), CredentialError>> + Send;
}

/// Picks the key up again from `.env` and the process environment, so a key added after
/// startup is used without a restart. The environment itself is only read, never modified.
#[derive(Debug, Clone)]
pub struct EnvCredentialSelector {
    variable: &'static str,
    key: SharedApiKey,
    dotenv_path: Option<PathBuf>,
}

impl EnvCredentialSelector {
    pub fn new(variable: &'static str, key: SharedApiKey) -> Self {
        Self {
            variable,
            key,
            dotenv_path: None,
        }
    }

    /// Reads this file instead of searching for `.env` from the working directory up.
    pub fn with_dotenv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv_path = Some(path.into());
        self
    }

    fn reload(&self) -> Option<String> {
        self.read_dotenv()
            .and_then(non_empty)
            .or_else(|| std::env::var(self.variable).ok().and_then(non_empty))
    }

    fn read_dotenv(&self) -> Option<String> {
        let entries = match &self.dotenv_path {
            Some(path) => dotenvy::from_path_iter(path),
            None => dotenvy::dotenv_iter(),
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(error) => {
                if !error.not_found() {
                    warn!(error = %error, "failed to open .env while reloading api key");
                }
                return None;
            }
        };

        entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(error = %error, "skipping unreadable .env entry");
                    None
                }
            })
            .find(|(name, _)| name == self.variable)
            .map(|(_, value)| value)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

impl CredentialSelector for EnvCredentialSelector {
    fn has_credential(&self) -> bool {
        self.key.is_present()
    }

    async fn select_credential(&self) -> Result<(), CredentialError> {
        let key = self.reload().ok_or_else(|| CredentialError::Missing {
            variable: self.variable.to_owned(),
        })?;
        self.key.replace(Some(key));
        info!(variable = self.variable, "reloaded api key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_key_updates_are_visible_to_every_clone() {
        let key = SharedApiKey::new(None);
        let clone = key.clone();
        assert!(!clone.is_present());

        key.replace(Some("secret".to_owned()));
        assert_eq!(clone.get().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn env_selector_reports_missing_variable() {
        let selector = EnvCredentialSelector::new(
            "THUMBSTUDIO_TEST_KEY_THAT_IS_NEVER_SET",
            SharedApiKey::default(),
        );
        assert!(!selector.has_credential());
        assert_eq!(
            selector.select_credential().await,
            Err(CredentialError::Missing {
                variable: "THUMBSTUDIO_TEST_KEY_THAT_IS_NEVER_SET".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn env_selector_reads_dotenv_without_touching_the_environment() {
        let dir = crate::test_support::temp_path("credentials");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let dotenv = dir.join(".env");
        std::fs::write(
            &dotenv,
            "OTHER=1\nTHUMBSTUDIO_TEST_DOTENV_KEY=  from-file  \n",
        )
        .expect("write .env");

        let key = SharedApiKey::default();
        let selector = EnvCredentialSelector::new("THUMBSTUDIO_TEST_DOTENV_KEY", key.clone())
            .with_dotenv_path(&dotenv);
        let selected = selector.select_credential().await;
        crate::test_support::remove_dir_if_exists(&dir);

        assert_eq!(selected, Ok(()));
        assert_eq!(key.get().as_deref(), Some("from-file"));
        assert!(std::env::var("THUMBSTUDIO_TEST_DOTENV_KEY").is_err());
    }
}
