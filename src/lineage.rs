use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::thumbnail::presets::PresetCatalog;
use crate::thumbnail::{ImageData, ThumbnailConfig};

pub const REFINED_LABEL: &str = "Refined";
pub const CUSTOM_LABEL: &str = "Custom";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    #[error("artifact `{artifact_id}` does not exist in this session")]
    NotFound { artifact_id: ArtifactId },

    #[error("artifact id `{artifact_id}` was already used in this session")]
    DuplicateId { artifact_id: ArtifactId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Time-ordered, never repeats within a process.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

/// One generated thumbnail. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    id: ArtifactId,
    image: ImageData,
    config: ThumbnailConfig,
    label: String,
    created_at: SystemTime,
}

impl Artifact {
    pub fn new(image: ImageData, config: &ThumbnailConfig, label: impl Into<String>) -> Self {
        Self::restore(
            ArtifactId::generate(),
            image,
            config.clone(),
            label,
            SystemTime::now(),
        )
    }

    /// Rebuilds an artifact loaded from storage.
    pub fn restore(
        id: ArtifactId,
        image: ImageData,
        config: ThumbnailConfig,
        label: impl Into<String>,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            image,
            config: config.without_selection(),
            label: label.into(),
            created_at,
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn image(&self) -> &ImageData {
        &self.image
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// `Refined` for edits, otherwise the preset name or `Custom`.
    pub fn label_for(config: &ThumbnailConfig, catalog: &PresetCatalog) -> String {
        if config.is_editing() {
            return REFINED_LABEL.to_owned();
        }

        config
            .preset_id
            .as_deref()
            .and_then(|id| catalog.find(id))
            .map(|preset| preset.name.clone())
            .unwrap_or_else(|| CUSTOM_LABEL.to_owned())
    }
}

/// Ordered history (newest first), the active edit target and the fresh upload.
///
/// The active target is only an id; it is resolved against the sequence every time it is
/// used so deletion can never leave a dangling reference.
#[derive(Debug, Clone, Default)]
pub struct Lineage {
    artifacts: Vec<Artifact>,
    active_target: Option<ArtifactId>,
    fresh_upload: Option<ImageData>,
    retired_ids: HashSet<ArtifactId>,
}

impl Lineage {
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn get(&self, artifact_id: ArtifactId) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.id == artifact_id)
    }

    /// Whether the id was deleted during this session.
    pub fn is_retired(&self, artifact_id: ArtifactId) -> bool {
        self.retired_ids.contains(&artifact_id)
    }

    pub fn active_target(&self) -> Option<ArtifactId> {
        self.active_target
    }

    pub fn active_artifact(&self) -> Option<&Artifact> {
        self.active_target.and_then(|id| self.get(id))
    }

    pub fn fresh_upload(&self) -> Option<&ImageData> {
        self.fresh_upload.as_ref()
    }

    /// The edit target wins whenever one is set, even if it no longer resolves.
    pub fn current_base_image(&self) -> Option<&ImageData> {
        match self.active_target {
            Some(_) => self.active_artifact().map(Artifact::image),
            None => self.fresh_upload.as_ref(),
        }
    }

    pub fn set_fresh_upload(&mut self, image: ImageData, config: &mut ThumbnailConfig) {
        self.active_target = None;
        self.fresh_upload = Some(image);
        config.leave_edit_mode();
    }

    pub fn begin_editing(
        &mut self,
        artifact_id: ArtifactId,
        config: &mut ThumbnailConfig,
    ) -> Result<(), LineageError> {
        self.activate(artifact_id, config)?;
        self.fresh_upload = None;
        Ok(())
    }

    fn activate(
        &mut self,
        artifact_id: ArtifactId,
        config: &mut ThumbnailConfig,
    ) -> Result<(), LineageError> {
        let artifact = self
            .get(artifact_id)
            .ok_or(LineageError::NotFound { artifact_id })?;

        let mut working = artifact.config.clone();
        working.enter_edit_mode();
        *config = working;
        self.active_target = Some(artifact_id);
        Ok(())
    }

    /// Leaves edit mode. An upload cleared by `begin_editing` stays cleared.
    pub fn cancel_editing(&mut self, config: &mut ThumbnailConfig) {
        self.active_target = None;
        config.leave_edit_mode();
    }

    /// Prepends `artifact` and makes it the edit target. A fresh upload stays in state; it is
    /// unreachable while the target is set.
    pub fn record_result(
        &mut self,
        artifact: Artifact,
        config: &mut ThumbnailConfig,
    ) -> Result<ArtifactId, LineageError> {
        let artifact_id = artifact.id;
        if self.retired_ids.contains(&artifact_id) || self.get(artifact_id).is_some() {
            return Err(LineageError::DuplicateId { artifact_id });
        }

        self.artifacts.insert(0, artifact);
        self.activate(artifact_id, config)?;
        Ok(artifact_id)
    }

    pub fn delete_artifact(
        &mut self,
        artifact_id: ArtifactId,
        config: &mut ThumbnailConfig,
    ) -> Result<Artifact, LineageError> {
        let index = self
            .artifacts
            .iter()
            .position(|artifact| artifact.id == artifact_id)
            .ok_or(LineageError::NotFound { artifact_id })?;

        let removed = self.artifacts.remove(index);
        self.retired_ids.insert(artifact_id);
        if self.active_target == Some(artifact_id) {
            self.cancel_editing(config);
        }
        Ok(removed)
    }

    /// Adds artifacts delivered by storage that this session has never seen. Returns how many
    /// were added.
    pub fn merge_restored(&mut self, restored: Vec<Artifact>) -> usize {
        let mut added = 0;
        for artifact in restored {
            if self.retired_ids.contains(&artifact.id) || self.get(artifact.id).is_some() {
                continue;
            }
            // Placed before the first older entry; the existing order is never rearranged.
            let index = self
                .artifacts
                .iter()
                .position(|existing| existing.created_at < artifact.created_at)
                .unwrap_or(self.artifacts.len());
            self.artifacts.insert(index, artifact);
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use crate::selection::SelectionRect;
    use crate::thumbnail::presets::PresetCatalog;
    use crate::thumbnail::{ImageData, ThumbnailConfig};

    use super::{Artifact, ArtifactId, CUSTOM_LABEL, Lineage, LineageError, REFINED_LABEL};

    fn image(tag: u8) -> ImageData {
        ImageData::new("image/png", vec![tag; 4])
    }

    fn artifact_with_headline(tag: u8, headline: &str) -> Artifact {
        let config = ThumbnailConfig {
            overlay_text: headline.to_owned(),
            ..ThumbnailConfig::default()
        };
        Artifact::new(image(tag), &config, "Viral Hype")
    }

    #[test]
    fn artifact_snapshot_strips_selection() {
        let mut config = ThumbnailConfig::default();
        config.enter_edit_mode();
        config.set_edit_instruction("add fire");
        if let Some(edit) = config.edit.as_mut() {
            edit.selection = Some(SelectionRect::new_unchecked(10.0, 10.0, 30.0, 20.0));
        }

        let artifact = Artifact::new(image(1), &config, REFINED_LABEL);
        assert_eq!(artifact.config().selection(), None);
        assert_eq!(artifact.config().edit_instruction(), Some("add fire"));
    }

    #[test]
    fn record_result_prepends_and_activates_for_any_prior_state() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        lineage.set_fresh_upload(image(0), &mut config);

        let first = lineage
            .record_result(artifact_with_headline(1, "ONE"), &mut config)
            .expect("first record");
        assert_eq!(lineage.active_target(), Some(first));

        lineage.cancel_editing(&mut config);
        let second = lineage
            .record_result(artifact_with_headline(2, "TWO"), &mut config)
            .expect("second record");
        assert_eq!(lineage.active_target(), Some(second));
        assert_eq!(lineage.artifacts()[0].id(), second);
        assert_eq!(lineage.artifacts()[1].id(), first);
        assert!(config.is_editing());
        assert_eq!(config.overlay_text, "TWO");
        assert_eq!(config.edit_instruction(), Some(""));
        assert_eq!(config.selection(), None);
    }

    #[test]
    fn record_result_rejects_reused_ids() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        let artifact = artifact_with_headline(1, "A");
        let id = lineage
            .record_result(artifact.clone(), &mut config)
            .expect("first record");

        assert_eq!(
            lineage.record_result(artifact.clone(), &mut config),
            Err(LineageError::DuplicateId { artifact_id: id })
        );

        lineage.delete_artifact(id, &mut config).expect("delete");
        assert_eq!(
            lineage.record_result(artifact, &mut config),
            Err(LineageError::DuplicateId { artifact_id: id })
        );
    }

    #[test]
    fn begin_editing_unknown_id_is_not_found_and_changes_nothing() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        lineage.set_fresh_upload(image(0), &mut config);
        let missing = ArtifactId::generate();

        assert_eq!(
            lineage.begin_editing(missing, &mut config),
            Err(LineageError::NotFound {
                artifact_id: missing
            })
        );
        assert_eq!(lineage.active_target(), None);
        assert!(lineage.fresh_upload().is_some());
        assert!(!config.is_editing());
    }

    #[test]
    fn cancel_then_begin_restores_stored_config_with_empty_edit_fields() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        let id = lineage
            .record_result(artifact_with_headline(1, "STORED"), &mut config)
            .expect("record");

        config.set_edit_instruction("make it pop");
        config.overlay_text = "CHANGED".to_owned();
        lineage.cancel_editing(&mut config);
        assert!(!config.is_editing());

        lineage.begin_editing(id, &mut config).expect("begin editing");
        assert!(config.is_editing());
        assert_eq!(config.overlay_text, "STORED");
        assert_eq!(config.edit_instruction(), Some(""));
        assert_eq!(config.selection(), None);
    }

    #[test]
    fn cancel_editing_is_idempotent_and_does_not_restore_upload() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        lineage.set_fresh_upload(image(0), &mut config);
        let id = lineage
            .record_result(artifact_with_headline(1, "A"), &mut config)
            .expect("record");
        lineage.begin_editing(id, &mut config).expect("begin");

        lineage.cancel_editing(&mut config);
        let once_config = config.clone();
        let once_target = lineage.active_target();
        let once_upload = lineage.fresh_upload().cloned();

        lineage.cancel_editing(&mut config);
        assert_eq!(config, once_config);
        assert_eq!(lineage.active_target(), once_target);
        assert_eq!(lineage.fresh_upload().cloned(), once_upload);
        assert_eq!(lineage.fresh_upload(), None);
        assert_eq!(lineage.current_base_image(), None);
    }

    #[test]
    fn record_result_leaves_fresh_upload_in_state_but_unreachable() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        lineage.set_fresh_upload(image(9), &mut config);

        let mut create_config = config.clone();
        create_config.leave_edit_mode();
        let artifact = Artifact::new(image(1), &create_config, CUSTOM_LABEL);
        lineage
            .record_result(artifact, &mut config)
            .expect("record");

        assert_eq!(lineage.fresh_upload(), Some(&image(9)));
        assert_eq!(lineage.current_base_image(), Some(&image(1)));
    }

    #[test]
    fn deleting_active_target_cancels_editing() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        let older = lineage
            .record_result(artifact_with_headline(1, "OLD"), &mut config)
            .expect("record older");
        let newer = lineage
            .record_result(artifact_with_headline(2, "NEW"), &mut config)
            .expect("record newer");

        lineage.delete_artifact(older, &mut config).expect("delete older");
        assert_eq!(lineage.active_target(), Some(newer));
        assert!(config.is_editing());

        lineage.delete_artifact(newer, &mut config).expect("delete newer");
        assert_eq!(lineage.active_target(), None);
        assert!(!config.is_editing());
        assert!(lineage.artifacts().is_empty());
        assert_eq!(
            lineage.delete_artifact(newer, &mut config),
            Err(LineageError::NotFound { artifact_id: newer })
        );
    }

    #[test]
    fn merge_restored_skips_known_and_retired_ids_and_sorts_newest_first() {
        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        let live = lineage
            .record_result(artifact_with_headline(1, "LIVE"), &mut config)
            .expect("record live");
        let deleted = lineage
            .record_result(artifact_with_headline(2, "GONE"), &mut config)
            .expect("record deleted");
        let deleted_copy = lineage.get(deleted).cloned().expect("deleted exists");
        lineage.delete_artifact(deleted, &mut config).expect("delete");

        let old = Artifact::restore(
            ArtifactId::generate(),
            image(3),
            ThumbnailConfig::default(),
            "Viral Hype",
            UNIX_EPOCH + Duration::from_secs(10),
        );
        let old_id = old.id();
        let live_copy = lineage.get(live).cloned().expect("live exists");

        let added = lineage.merge_restored(vec![live_copy, deleted_copy, old]);
        assert_eq!(added, 1);
        let ids = lineage.artifacts().iter().map(Artifact::id).collect::<Vec<_>>();
        assert_eq!(ids, vec![live, old_id]);
    }

    #[test]
    fn merge_restored_keeps_session_order_after_a_clock_step() {
        let at = |secs| UNIX_EPOCH + Duration::from_secs(secs);
        let stored = |tag, secs| {
            Artifact::restore(
                ArtifactId::generate(),
                image(tag),
                ThumbnailConfig::default(),
                "Viral Hype",
                at(secs),
            )
        };

        let mut lineage = Lineage::default();
        let mut config = ThumbnailConfig::default();
        let first = lineage
            .record_result(stored(1, 200), &mut config)
            .expect("record first");
        // The wall clock stepped back before the second result.
        let second = lineage
            .record_result(stored(2, 100), &mut config)
            .expect("record second");

        let middle = stored(3, 150);
        let oldest = stored(4, 50);
        let (middle_id, oldest_id) = (middle.id(), oldest.id());
        assert_eq!(lineage.merge_restored(vec![oldest, middle]), 2);

        let ids = lineage.artifacts().iter().map(Artifact::id).collect::<Vec<_>>();
        assert_eq!(ids, vec![middle_id, second, first, oldest_id]);
        assert_eq!(lineage.active_target(), Some(second));
    }

    #[test]
    fn label_reflects_mode_and_preset() {
        let catalog = PresetCatalog::default();
        let mut config = ThumbnailConfig::default();
        assert_eq!(Artifact::label_for(&config, &catalog), "Viral Hype");

        config.preset_id = Some("unknown".to_owned());
        assert_eq!(Artifact::label_for(&config, &catalog), CUSTOM_LABEL);

        config.enter_edit_mode();
        assert_eq!(Artifact::label_for(&config, &catalog), REFINED_LABEL);
    }
}
