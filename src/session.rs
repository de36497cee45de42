use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::generation::{GenerationError, GenerationPhase};
use crate::lineage::{Artifact, ArtifactId, Lineage, LineageError};
use crate::request::{GenerationRequest, RequestError, build_generation_request};
use crate::selection::{
    ImageBounds, PointerPosition, SelectionError, SelectionRect, SelectionTracker,
};
use crate::thumbnail::presets::PresetCatalog;
use crate::thumbnail::{ImageData, ThumbnailConfig};

/// All state of one studio session. Owned by the shell and shared with the generation
/// controller through [`SharedSession`].
#[derive(Debug, Clone)]
pub struct StudioSession {
    config: ThumbnailConfig,
    lineage: Lineage,
    tracker: SelectionTracker,
    phase: GenerationPhase,
    progress_message: Option<&'static str>,
    credential_available: bool,
    presets: PresetCatalog,
}

impl Default for StudioSession {
    fn default() -> Self {
        Self::new(PresetCatalog::default())
    }
}

impl StudioSession {
    pub fn new(presets: PresetCatalog) -> Self {
        Self {
            config: ThumbnailConfig::default(),
            lineage: Lineage::default(),
            tracker: SelectionTracker::default(),
            phase: GenerationPhase::Idle,
            progress_message: None,
            credential_available: true,
            presets,
        }
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// Field-by-field access for UI bindings.
    pub fn config_mut(&mut self) -> &mut ThumbnailConfig {
        &mut self.config
    }

    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    pub fn phase(&self) -> &GenerationPhase {
        &self.phase
    }

    pub fn last_error(&self) -> Option<&GenerationError> {
        match &self.phase {
            GenerationPhase::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn progress_message(&self) -> Option<&'static str> {
        self.progress_message
    }

    pub fn credential_available(&self) -> bool {
        self.credential_available
    }

    pub fn is_drawing_selection(&self) -> bool {
        self.tracker.is_drawing()
    }

    /// Image the next request would be based on, also used for the preview.
    pub fn current_base_image(&self) -> Option<&ImageData> {
        self.lineage.current_base_image()
    }

    pub fn set_fresh_upload(&mut self, image: ImageData) {
        self.lineage.set_fresh_upload(image, &mut self.config);
        self.tracker.reset();
        self.clear_error();
    }

    pub fn begin_editing(&mut self, artifact_id: ArtifactId) -> Result<(), LineageError> {
        self.lineage.begin_editing(artifact_id, &mut self.config)?;
        self.tracker.reset();
        Ok(())
    }

    pub fn cancel_editing(&mut self) {
        self.lineage.cancel_editing(&mut self.config);
        self.tracker.reset();
    }

    pub fn record_result(&mut self, artifact: Artifact) -> Result<ArtifactId, LineageError> {
        let artifact_id = self.lineage.record_result(artifact, &mut self.config)?;
        self.tracker.reset();
        Ok(artifact_id)
    }

    pub fn delete_artifact(&mut self, artifact_id: ArtifactId) -> Result<Artifact, LineageError> {
        let removed = self.lineage.delete_artifact(artifact_id, &mut self.config)?;
        if !self.config.is_editing() {
            self.tracker.reset();
        }
        Ok(removed)
    }

    pub fn merge_restored(&mut self, restored: Vec<Artifact>) -> usize {
        self.lineage.merge_restored(restored)
    }

    pub fn pointer_down(&mut self, pointer: PointerPosition, bounds: Option<ImageBounds>) -> bool {
        let bounds = bounds.filter(|_| self.current_base_image().is_some());
        self.tracker.pointer_down(pointer, bounds, &mut self.config)
    }

    pub fn pointer_move(&mut self, pointer: PointerPosition, bounds: Option<ImageBounds>) -> bool {
        self.tracker.pointer_move(pointer, bounds, &mut self.config)
    }

    pub fn pointer_up(&mut self) -> bool {
        self.tracker.pointer_up()
    }

    /// Sets a rectangle computed elsewhere (HTTP, CLI).
    pub fn set_selection(&mut self, rect: SelectionRect) -> Result<(), SelectionError> {
        let edit = self.config.edit.as_mut().ok_or(SelectionError::NotEditing)?;
        edit.selection = Some(rect);
        self.tracker.reset();
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.config.clear_selection();
        self.tracker.reset();
    }

    pub fn set_edit_instruction(&mut self, instruction: impl Into<String>) -> bool {
        self.config.set_edit_instruction(instruction)
    }

    pub fn apply_preset(&mut self, preset_id: &str) -> bool {
        match self.presets.find(preset_id).cloned() {
            Some(preset) => {
                self.config.apply_preset(&preset);
                true
            }
            None => false,
        }
    }

    pub fn build_request(&self) -> Result<GenerationRequest, RequestError> {
        build_generation_request(self.current_base_image(), &self.config)
    }

    pub fn switch_to_fast_engine(&mut self) {
        self.config.switch_to_fast();
        self.clear_error();
    }

    pub fn set_credential_available(&mut self, available: bool) {
        self.credential_available = available;
    }

    /// Returns a settled phase to `Idle`. No effect while a request is in flight.
    pub fn acknowledge(&mut self) {
        if !self.phase.is_in_flight() {
            self.phase = GenerationPhase::Idle;
        }
    }

    fn clear_error(&mut self) {
        if matches!(self.phase, GenerationPhase::Failed { .. }) {
            self.phase = GenerationPhase::Idle;
        }
    }

    pub(crate) fn begin_submit(&mut self, first_message: &'static str) {
        self.phase = GenerationPhase::Submitting;
        self.progress_message = Some(first_message);
    }

    pub(crate) fn rotate_progress(&mut self, message: &'static str) -> bool {
        if !self.phase.is_in_flight() {
            return false;
        }
        self.progress_message = Some(message);
        true
    }

    pub(crate) fn settle(&mut self, phase: GenerationPhase) {
        self.phase = phase;
        self.progress_message = None;
    }

    pub(crate) fn fail(&mut self, error: GenerationError) {
        if matches!(error, GenerationError::PermissionDenied { .. }) {
            self.credential_available = false;
        }
        self.settle(GenerationPhase::Failed { error });
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedSession(Arc<Mutex<StudioSession>>);

impl SharedSession {
    pub fn new(session: StudioSession) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, StudioSession> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
