use std::env;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};

use crate::thumbnail::QualityTier;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_FAST_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_GEMINI_HIGH_FIDELITY_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_GEMINI_ADVISOR_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";
pub const DEFAULT_STUDIO_USER_ID: &str = "local";
pub const DEFAULT_ARTIFACTS_DIR: &str = "thumbnails";
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 2_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProvider {
    Gemini,
    HuggingFace,
}

impl ImageProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::HuggingFace => "huggingface",
        }
    }

    pub fn api_key_variable(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::HuggingFace => "HUGGINGFACE_API_KEY",
        }
    }
}

impl Display for ImageProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "huggingface" | "hugging-face" | "hf" => Ok(Self::HuggingFace),
            other => Err(anyhow!(
                "invalid IMAGE_PROVIDER `{other}`; expected `gemini` or `huggingface`"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioSettings {
    pub image_provider: ImageProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_fast_model: String,
    pub gemini_high_fidelity_model: String,
    pub gemini_advisor_model: String,
    pub huggingface_api_key: Option<String>,
    pub huggingface_base_url: String,
    pub huggingface_model: String,
    pub user_id: String,
    pub artifacts_dir: PathBuf,
    pub persist_artifacts: bool,
    pub progress_interval_ms: u64,
    pub presets_file: Option<PathBuf>,
}

impl StudioSettings {
    /// Missing API keys are not an error here; the studio starts without one and offers the
    /// credential picker instead.
    pub fn from_env() -> Result<Self> {
        // Load .env if present, but do not fail if file does not exist.
        let _ = dotenvy::dotenv();

        let image_provider = env::var("IMAGE_PROVIDER")
            .unwrap_or_else(|_| ImageProvider::Gemini.as_str().to_owned())
            .parse::<ImageProvider>()
            .context("failed to parse IMAGE_PROVIDER")?;

        let gemini_base_url = read_non_empty_env("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL)?;
        let gemini_fast_model = read_non_empty_env("GEMINI_FAST_MODEL", DEFAULT_GEMINI_FAST_MODEL)?;
        let gemini_high_fidelity_model = read_non_empty_env(
            "GEMINI_HIGH_FIDELITY_MODEL",
            DEFAULT_GEMINI_HIGH_FIDELITY_MODEL,
        )?;
        let gemini_advisor_model =
            read_non_empty_env("GEMINI_ADVISOR_MODEL", DEFAULT_GEMINI_ADVISOR_MODEL)?;
        let huggingface_base_url =
            read_non_empty_env("HUGGINGFACE_BASE_URL", DEFAULT_HUGGINGFACE_BASE_URL)?;
        let huggingface_model = read_non_empty_env("HUGGINGFACE_MODEL", DEFAULT_HUGGINGFACE_MODEL)?;

        let user_id = read_non_empty_env("STUDIO_USER_ID", DEFAULT_STUDIO_USER_ID)?;
        ensure!(
            !user_id.contains(['/', '\\']) && user_id != "." && user_id != "..",
            "STUDIO_USER_ID must not contain path separators"
        );

        let artifacts_dir = PathBuf::from(read_non_empty_env(
            "ARTIFACTS_DIR",
            DEFAULT_ARTIFACTS_DIR,
        )?);
        let persist_artifacts = parse_bool_env("PERSIST_ARTIFACTS", true)?;

        let progress_interval_ms =
            parse_u64_env("PROGRESS_INTERVAL_MS", DEFAULT_PROGRESS_INTERVAL_MS)?;
        ensure!(
            progress_interval_ms > 0,
            "PROGRESS_INTERVAL_MS must be greater than 0"
        );

        Ok(Self {
            image_provider,
            gemini_api_key: read_optional_env("GEMINI_API_KEY"),
            gemini_base_url,
            gemini_fast_model,
            gemini_high_fidelity_model,
            gemini_advisor_model,
            huggingface_api_key: read_optional_env("HUGGINGFACE_API_KEY"),
            huggingface_base_url,
            huggingface_model,
            user_id,
            artifacts_dir,
            persist_artifacts,
            progress_interval_ms,
            presets_file: read_optional_env("THUMBNAIL_PRESETS_FILE").map(PathBuf::from),
        })
    }

    pub fn image_api_key(&self) -> Option<&str> {
        match self.image_provider {
            ImageProvider::Gemini => self.gemini_api_key.as_deref(),
            ImageProvider::HuggingFace => self.huggingface_api_key.as_deref(),
        }
    }

    pub fn gemini_model_for(&self, engine: QualityTier) -> &str {
        match engine {
            QualityTier::Fast => &self.gemini_fast_model,
            QualityTier::HighFidelity { .. } => &self.gemini_high_fidelity_model,
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            image_provider: ImageProvider::Gemini,
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_owned(),
            gemini_fast_model: DEFAULT_GEMINI_FAST_MODEL.to_owned(),
            gemini_high_fidelity_model: DEFAULT_GEMINI_HIGH_FIDELITY_MODEL.to_owned(),
            gemini_advisor_model: DEFAULT_GEMINI_ADVISOR_MODEL.to_owned(),
            huggingface_api_key: None,
            huggingface_base_url: DEFAULT_HUGGINGFACE_BASE_URL.to_owned(),
            huggingface_model: DEFAULT_HUGGINGFACE_MODEL.to_owned(),
            user_id: DEFAULT_STUDIO_USER_ID.to_owned(),
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            persist_artifacts: true,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            presets_file: None,
        }
    }
}

fn read_optional_env(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn read_non_empty_env(name: &str, default: &str) -> Result<String> {
    let value = env::var(name).unwrap_or_else(|_| default.to_owned());
    ensure!(!value.trim().is_empty(), "{name} cannot be empty");
    Ok(value.trim().to_owned())
}

fn parse_u64_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("failed to parse {name} as u64")),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow!("failed to parse {name} as bool: `{other}`")),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_accepts_aliases_and_rejects_unknown() {
        assert_eq!(
            "Gemini".parse::<ImageProvider>().expect("gemini"),
            ImageProvider::Gemini
        );
        assert_eq!(
            "hf".parse::<ImageProvider>().expect("hf"),
            ImageProvider::HuggingFace
        );
        let error = "dall-e".parse::<ImageProvider>().expect_err("unknown provider");
        assert!(error.to_string().contains("IMAGE_PROVIDER"));
    }

    #[test]
    fn gemini_model_follows_engine_tier() {
        let settings = StudioSettings::default();
        assert_eq!(
            settings.gemini_model_for(QualityTier::Fast),
            DEFAULT_GEMINI_FAST_MODEL
        );
        assert_eq!(
            settings.gemini_model_for(QualityTier::high_fidelity()),
            DEFAULT_GEMINI_HIGH_FIDELITY_MODEL
        );
    }

    #[test]
    fn image_api_key_follows_provider() {
        let settings = StudioSettings {
            image_provider: ImageProvider::HuggingFace,
            gemini_api_key: Some("gemini".to_owned()),
            huggingface_api_key: Some("hf".to_owned()),
            ..StudioSettings::default()
        };
        assert_eq!(settings.image_api_key(), Some("hf"));
    }
}
