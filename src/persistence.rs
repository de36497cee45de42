use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::lineage::{Artifact, ArtifactId};
use crate::thumbnail::{ImageData, ThumbnailConfig};

const METADATA_EXTENSION: &str = "json";

pub type ArtifactCallback = Arc<dyn Fn(Vec<Artifact>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to access `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode metadata for artifact `{artifact_id}`: {source}")]
    Encode {
        artifact_id: ArtifactId,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact `{artifact_id}` is not stored for user `{user_id}`")]
    NotFound {
        user_id: String,
        artifact_id: ArtifactId,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable artifact storage keyed by user. Writes are best-effort from the session's point
/// of view; callers log failures and keep going.
pub trait ArtifactStore: Send + Sync {
    fn save(&self, user_id: &str, artifact: &Artifact) -> Result<(), PersistenceError>;

    fn delete(&self, user_id: &str, artifact_id: ArtifactId) -> Result<(), PersistenceError>;

    fn load(&self, user_id: &str) -> Result<Vec<Artifact>, PersistenceError>;

    /// Delivers the stored history once immediately and again after every change.
    fn subscribe(
        &self,
        user_id: &str,
        callback: ArtifactCallback,
    ) -> Result<Subscription, PersistenceError>;
}

/// Live history subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription stops updates"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArtifactRecord {
    id: ArtifactId,
    mime_type: String,
    file_name: String,
    label: String,
    created_at_ms: u64,
    config: ThumbnailConfig,
}

type SubscriberMap = Mutex<HashMap<String, Vec<(u64, ArtifactCallback)>>>;

/// Stores each artifact as `<root>/<user>/<id>.<ext>` plus a `<id>.json` metadata file.
pub struct DirectoryArtifactStore {
    root: PathBuf,
    subscribers: Arc<SubscriberMap>,
    next_subscriber: AtomicU64,
}

impl DirectoryArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(0),
        }
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }

    fn metadata_path(&self, user_id: &str, artifact_id: ArtifactId) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{artifact_id}.{METADATA_EXTENSION}"))
    }

    fn read_record(path: &Path, dir: &Path) -> Result<Artifact, String> {
        let raw = fs::read_to_string(path).map_err(|error| error.to_string())?;
        let record: ArtifactRecord =
            serde_json::from_str(&raw).map_err(|error| error.to_string())?;
        let image_path = dir.join(&record.file_name);
        let bytes = fs::read(&image_path)
            .map_err(|error| format!("{}: {error}", image_path.display()))?;

        Ok(Artifact::restore(
            record.id,
            ImageData::new(record.mime_type, bytes),
            record.config,
            record.label,
            UNIX_EPOCH + Duration::from_millis(record.created_at_ms),
        ))
    }

    fn notify(&self, user_id: &str) {
        let callbacks: Vec<ArtifactCallback> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match subscribers.get(user_id) {
                Some(entries) if !entries.is_empty() => {
                    entries.iter().map(|(_, callback)| callback.clone()).collect()
                }
                _ => return,
            }
        };

        match self.load(user_id) {
            Ok(artifacts) => {
                for callback in callbacks {
                    callback(artifacts.clone());
                }
            }
            Err(error) => warn!(user_id, error = %error, "failed to reload stored history"),
        }
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn save(&self, user_id: &str, artifact: &Artifact) -> Result<(), PersistenceError> {
        let dir = self.user_dir(user_id);
        fs::create_dir_all(&dir).map_err(|error| PersistenceError::io(&dir, error))?;

        let file_name = format!("{}.{}", artifact.id(), artifact.image().file_extension());
        let image_path = dir.join(&file_name);
        fs::write(&image_path, artifact.image().bytes())
            .map_err(|error| PersistenceError::io(&image_path, error))?;

        let record = ArtifactRecord {
            id: artifact.id(),
            mime_type: artifact.image().mime_type().to_owned(),
            file_name,
            label: artifact.label().to_owned(),
            created_at_ms: artifact
                .created_at()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or_default(),
            config: artifact.config().clone(),
        };
        let encoded =
            serde_json::to_vec_pretty(&record).map_err(|source| PersistenceError::Encode {
                artifact_id: artifact.id(),
                source,
            })?;
        let metadata_path = self.metadata_path(user_id, artifact.id());
        fs::write(&metadata_path, encoded)
            .map_err(|error| PersistenceError::io(&metadata_path, error))?;

        debug!(user_id, artifact_id = %artifact.id(), path = %image_path.display(), "stored artifact");
        self.notify(user_id);
        Ok(())
    }

    fn delete(&self, user_id: &str, artifact_id: ArtifactId) -> Result<(), PersistenceError> {
        let dir = self.user_dir(user_id);
        let metadata_path = self.metadata_path(user_id, artifact_id);
        let raw = match fs::read_to_string(&metadata_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound {
                    user_id: user_id.to_owned(),
                    artifact_id,
                });
            }
            Err(error) => return Err(PersistenceError::io(&metadata_path, error)),
        };

        if let Ok(record) = serde_json::from_str::<ArtifactRecord>(&raw) {
            let image_path = dir.join(record.file_name);
            match fs::remove_file(&image_path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(PersistenceError::io(&image_path, error)),
            }
        }
        fs::remove_file(&metadata_path)
            .map_err(|error| PersistenceError::io(&metadata_path, error))?;

        debug!(user_id, artifact_id = %artifact_id, "deleted stored artifact");
        self.notify(user_id);
        Ok(())
    }

    fn load(&self, user_id: &str) -> Result<Vec<Artifact>, PersistenceError> {
        let dir = self.user_dir(user_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(PersistenceError::io(&dir, error)),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let path = entry.map_err(|error| PersistenceError::io(&dir, error))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(METADATA_EXTENSION) {
                continue;
            }
            match Self::read_record(&path, &dir) {
                Ok(artifact) => artifacts.push(artifact),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping unreadable stored artifact");
                }
            }
        }

        artifacts.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(artifacts)
    }

    fn subscribe(
        &self,
        user_id: &str,
        callback: ArtifactCallback,
    ) -> Result<Subscription, PersistenceError> {
        let initial = self.load(user_id)?;
        let subscriber_id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_owned())
            .or_default()
            .push((subscriber_id, callback.clone()));

        callback(initial);

        let subscribers: Weak<SubscriberMap> = Arc::downgrade(&self.subscribers);
        let user_id = user_id.to_owned();
        Ok(Subscription::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                let mut subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(entries) = subscribers.get_mut(&user_id) {
                    entries.retain(|(id, _)| *id != subscriber_id);
                }
            }
        }))
    }
}
