use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::selection::SelectionRect;

pub mod presets;

use self::presets::{
    Preset, SUGGESTED_ACTIONS, SUGGESTED_BACKGROUNDS, SUGGESTED_EXPRESSIONS, builtin_presets,
};

pub const DEFAULT_OVERLAY_TEXT: &str = "I TRIED THIS!";
const FALLBACK_MIME_TYPE: &str = "image/png";

/// Encoded image bytes plus their MIME type.
///
/// Decoding is left to whoever renders the image; the core only moves bytes around.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    mime_type: String,
    bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Wraps raw file bytes, sniffing the MIME type from the magic number.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .map(|format| format.to_mime_type().to_owned())
            .unwrap_or_else(|_| FALLBACK_MIME_TYPE.to_owned());
        Self { mime_type, bytes }
    }

    pub fn from_base64(mime_type: impl Into<String>, encoded: &str) -> Result<Self, base64::DecodeError> {
        let bytes = BASE64.decode(encoded.trim())?;
        Ok(Self::new(mime_type, bytes))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("byte_len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextStyle {
    #[serde(rename = "impact-3d")]
    Impact3d,
    #[serde(rename = "neon-glow")]
    NeonGlow,
    #[serde(rename = "comic-distressed")]
    ComicDistressed,
    #[serde(rename = "minimal-modern")]
    MinimalModern,
    #[serde(rename = "horror-dripping")]
    HorrorDripping,
    #[serde(rename = "luxury-gold")]
    LuxuryGold,
}

impl TextStyle {
    pub const ALL: [TextStyle; 6] = [
        Self::Impact3d,
        Self::NeonGlow,
        Self::ComicDistressed,
        Self::MinimalModern,
        Self::HorrorDripping,
        Self::LuxuryGold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Impact3d => "impact-3d",
            Self::NeonGlow => "neon-glow",
            Self::ComicDistressed => "comic-distressed",
            Self::MinimalModern => "minimal-modern",
            Self::HorrorDripping => "horror-dripping",
            Self::LuxuryGold => "luxury-gold",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Impact3d => "3D Impact",
            Self::NeonGlow => "Neon Glow",
            Self::ComicDistressed => "Comic Distressed",
            Self::MinimalModern => "Minimal Modern",
            Self::HorrorDripping => "Horror Dripping",
            Self::LuxuryGold => "Luxury Gold",
        }
    }

    /// Visual treatment described to the backend for the headline lettering.
    pub fn treatment(self) -> &'static str {
        match self {
            Self::Impact3d => {
                "huge glossy 3D block letters with heavy black outlines, tilted toward the viewer"
            }
            Self::NeonGlow => {
                "bright glass neon tubes with strong bloom and crackling electric highlights"
            }
            Self::ComicDistressed => {
                "hand-inked comic lettering over halftone dots with a burst-shaped backing"
            }
            Self::MinimalModern => {
                "clean premium sans-serif lettering with wide spacing and soft matte shadows"
            }
            Self::HorrorDripping => {
                "jagged dripping lettering on cracked stone with long eerie shadows"
            }
            Self::LuxuryGold => {
                "polished gold 3D lettering with diamond-cut bevels and sparkling reflections"
            }
        }
    }
}

impl Display for TextStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextStyle {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == normalized)
            .ok_or_else(|| {
                anyhow!(
                    "invalid text style `{normalized}`; expected one of: {}",
                    Self::ALL.map(Self::as_str).join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [Self::Landscape, Self::Square, Self::Portrait];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Square => "1:1",
            Self::Portrait => "9:16",
        }
    }

    /// Pixel dimensions used by prompt-only engines that need explicit sizes.
    pub fn pixel_dimensions(self) -> (u32, u32) {
        match self {
            Self::Landscape => (1024, 576),
            Self::Square => (1024, 1024),
            Self::Portrait => (576, 1024),
        }
    }
}

impl Display for AspectRatio {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| anyhow!("invalid aspect ratio `{trimmed}`; expected 16:9, 1:1 or 9:16"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [Self::OneK, Self::TwoK, Self::FourK];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl Display for ImageSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == normalized)
            .ok_or_else(|| anyhow!("invalid image size `{normalized}`; expected 1K, 2K or 4K"))
    }
}

/// Render quality. Resolution and web grounding only exist on the high-fidelity tier,
/// so a fast request can never carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "kebab-case")]
pub enum QualityTier {
    Fast,
    HighFidelity {
        image_size: ImageSize,
        web_grounding: bool,
    },
}

impl QualityTier {
    pub fn high_fidelity() -> Self {
        Self::HighFidelity {
            image_size: ImageSize::OneK,
            web_grounding: false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::HighFidelity { .. } => "high-fidelity",
        }
    }

    pub fn is_high_fidelity(self) -> bool {
        matches!(self, Self::HighFidelity { .. })
    }

    pub fn image_size(self) -> Option<ImageSize> {
        match self {
            Self::Fast => None,
            Self::HighFidelity { image_size, .. } => Some(image_size),
        }
    }
}

impl Display for QualityTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Edit-only fields. Their presence is what "edit mode" means, so leaving edit mode drops
/// both the instruction and the selection together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditState {
    pub instruction: String,
    pub selection: Option<SelectionRect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    pub style: String,
    pub overlay_text: String,
    pub character_action: String,
    pub background_details: String,
    pub facial_expression: String,
    pub text_style: TextStyle,
    pub aspect_ratio: AspectRatio,
    pub quality: QualityTier,
    pub preset_id: Option<String>,
    #[serde(default)]
    pub edit: Option<EditState>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        let presets = builtin_presets();
        let first = presets.first();
        Self {
            style: first.map(|preset| preset.prompt.clone()).unwrap_or_default(),
            overlay_text: DEFAULT_OVERLAY_TEXT.to_owned(),
            character_action: SUGGESTED_ACTIONS[0].to_owned(),
            background_details: SUGGESTED_BACKGROUNDS[0].to_owned(),
            facial_expression: SUGGESTED_EXPRESSIONS[0].to_owned(),
            text_style: TextStyle::Impact3d,
            aspect_ratio: AspectRatio::Landscape,
            quality: QualityTier::high_fidelity(),
            preset_id: first.map(|preset| preset.id.clone()),
            edit: None,
        }
    }
}

impl ThumbnailConfig {
    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    /// Enters edit mode with an empty instruction and no selection.
    pub fn enter_edit_mode(&mut self) {
        self.edit = Some(EditState::default());
    }

    pub fn leave_edit_mode(&mut self) {
        self.edit = None;
    }

    pub fn edit_instruction(&self) -> Option<&str> {
        self.edit.as_ref().map(|edit| edit.instruction.as_str())
    }

    /// Returns `false` (and changes nothing) outside edit mode.
    pub fn set_edit_instruction(&mut self, instruction: impl Into<String>) -> bool {
        match self.edit.as_mut() {
            Some(edit) => {
                edit.instruction = instruction.into();
                true
            }
            None => false,
        }
    }

    pub fn selection(&self) -> Option<SelectionRect> {
        self.edit.as_ref().and_then(|edit| edit.selection)
    }

    pub fn clear_selection(&mut self) {
        if let Some(edit) = self.edit.as_mut() {
            edit.selection = None;
        }
    }

    /// Snapshot for storage: the selection only made sense relative to the input image.
    pub fn without_selection(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.clear_selection();
        snapshot
    }

    pub fn apply_preset(&mut self, preset: &Preset) {
        self.style = preset.prompt.clone();
        self.preset_id = Some(preset.id.clone());
    }

    pub fn switch_to_fast(&mut self) {
        self.quality = QualityTier::Fast;
    }
}
