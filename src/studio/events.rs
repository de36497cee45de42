use tokio_util::sync::CancellationToken;

use crate::generation::SubmitOutcome;
use crate::lineage::ArtifactId;
use crate::model::advisor::{AdvisorContext, AdvisorMessage};

/// Work the UI hands to the runtime worker because it has to await.
#[derive(Debug, Clone)]
pub enum StudioCommand {
    Generate,
    DeleteArtifact {
        artifact_id: ArtifactId,
    },
    SelectCredential,
    AskAdvisor {
        history: Vec<AdvisorMessage>,
        context: AdvisorContext,
        cancel: CancellationToken,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioEvent {
    GenerationSettled { outcome: SubmitOutcome },
    ArtifactDeleted {
        artifact_id: ArtifactId,
        error: Option<String>,
    },
    CredentialSelected { error: Option<String> },
    AdvisorDelta { text: String },
    AdvisorFinished,
    AdvisorFailed { error: String },
}

impl StudioEvent {
    /// One-line status for the footer, if the event deserves one.
    pub fn status_line(&self) -> Option<String> {
        match self {
            Self::GenerationSettled { outcome } => Some(match outcome {
                SubmitOutcome::Succeeded { .. } => "Thumbnail ready".to_owned(),
                SubmitOutcome::Ignored => "A generation is already running".to_owned(),
                SubmitOutcome::Failed(error) => format!("Generation failed: {error}"),
            }),
            Self::ArtifactDeleted {
                artifact_id,
                error: None,
            } => Some(format!("Deleted {artifact_id}")),
            Self::ArtifactDeleted {
                error: Some(error), ..
            } => Some(format!("Delete failed: {error}")),
            Self::CredentialSelected { error: None } => Some("API key loaded".to_owned()),
            Self::CredentialSelected { error: Some(error) } => Some(error.clone()),
            Self::AdvisorDelta { .. } | Self::AdvisorFinished | Self::AdvisorFailed { .. } => None,
        }
    }
}
