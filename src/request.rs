use crate::selection::SelectionRect;
use crate::thumbnail::{AspectRatio, ImageData, QualityTier, TextStyle, ThumbnailConfig};

/// Substituted whenever an edit is submitted without instruction text.
pub const GENERAL_REFINEMENT_INSTRUCTION: &str =
    "General refinement: sharpen detail, balance the lighting and polish the overall finish.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("upload a photo or select a thumbnail to edit before generating")]
    MissingBaseImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headline {
    pub text: String,
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestIntent {
    /// Compose a new thumbnail around the subject of the base photo.
    Create {
        style: String,
        expression: String,
        action: String,
        background: String,
    },
    /// Evolve the base image. `region` confines the change when present.
    Edit {
        instruction: String,
        region: Option<SelectionRect>,
    },
}

/// Semantic request handed to a generation backend. Building one never touches the network.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub base_image: ImageData,
    pub engine: QualityTier,
    pub aspect_ratio: AspectRatio,
    pub headline: Headline,
    pub intent: RequestIntent,
}

impl GenerationRequest {
    pub fn is_edit(&self) -> bool {
        matches!(self.intent, RequestIntent::Edit { .. })
    }

    pub fn region(&self) -> Option<SelectionRect> {
        match &self.intent {
            RequestIntent::Edit { region, .. } => *region,
            RequestIntent::Create { .. } => None,
        }
    }

    /// Instruction text sent alongside the base image.
    pub fn prompt(&self) -> String {
        let headline = &self.headline;
        match &self.intent {
            RequestIntent::Create {
                style,
                expression,
                action,
                background,
            } => format!(
                "Create a click-worthy video thumbnail from the attached photo. Keep the person's identity and facial features exactly as photographed.\n\
                 Subject: make the person the central hero with the expression \"{expression}\" and the pose \"{action}\", lit with studio rim light.\n\
                 Setting: {background}, with cinematic atmosphere.\n\
                 Headline: render the text \"{}\" as {}.\n\
                 Look: {style}",
                headline.text,
                headline.style.treatment(),
            ),
            RequestIntent::Edit {
                instruction,
                region,
            } => {
                let mut prompt = format!(
                    "Edit the attached thumbnail draft instead of starting over.\n\
                     Change requested: {instruction}\n"
                );
                if let Some(region) = region {
                    prompt.push_str(&format!(
                        "Confine the change to the area at x={}%, y={}%, width={}%, height={}% of the image and leave everything outside that area untouched.\n",
                        region.x, region.y, region.width, region.height
                    ));
                }
                prompt.push_str(&format!(
                    "Keep the person's likeness and the existing art direction. The headline \"{}\" must stay legible as {}.",
                    headline.text,
                    headline.style.treatment(),
                ));
                prompt
            }
        }
    }
}

/// Shapes the outbound request for the current mode.
pub fn build_generation_request(
    base_image: Option<&ImageData>,
    config: &ThumbnailConfig,
) -> Result<GenerationRequest, RequestError> {
    let base_image = base_image.ok_or(RequestError::MissingBaseImage)?;

    let intent = match &config.edit {
        Some(edit) => {
            let instruction = edit.instruction.trim();
            RequestIntent::Edit {
                instruction: if instruction.is_empty() {
                    GENERAL_REFINEMENT_INSTRUCTION.to_owned()
                } else {
                    instruction.to_owned()
                },
                region: edit.selection,
            }
        }
        None => RequestIntent::Create {
            style: config.style.clone(),
            expression: config.facial_expression.clone(),
            action: config.character_action.clone(),
            background: config.background_details.clone(),
        },
    };

    Ok(GenerationRequest {
        base_image: base_image.clone(),
        engine: config.quality,
        aspect_ratio: config.aspect_ratio,
        headline: Headline {
            text: config.overlay_text.clone(),
            style: config.text_style,
        },
        intent,
    })
}
