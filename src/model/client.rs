use std::future::Future;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ImageProvider, StudioSettings};
use crate::credentials::SharedApiKey;
use crate::request::GenerationRequest;
use crate::thumbnail::{ImageData, QualityTier};

const HUGGINGFACE_GUIDANCE_SCALE: f32 = 7.5;
const HUGGINGFACE_FAST_STEPS: u32 = 30;
const HUGGINGFACE_HIGH_FIDELITY_STEPS: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ImageClientError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("response missing field: {field}")]
    MissingField { field: &'static str },

    #[error("response format error: {0}")]
    ResponseFormat(String),

    #[error("image payload was not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ImageClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport(error) => error.status(),
            Self::MissingField { .. }
            | Self::ResponseFormat(_)
            | Self::Decode(_)
            | Self::Configuration(_) => None,
        }
    }
}

/// The external image generator. It receives a fully shaped request and either returns an
/// image or fails; the caller decides what a failure means.
pub trait GenerationBackend: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<ImageData, ImageClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ImageModelClient {
    http_client: reqwest::Client,
    settings: StudioSettings,
    api_key: SharedApiKey,
}

impl ImageModelClient {
    pub fn new(settings: StudioSettings, api_key: SharedApiKey) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            settings,
            api_key,
        }
    }

    fn require_api_key(&self) -> Result<String, ImageClientError> {
        self.api_key.get().ok_or_else(|| {
            ImageClientError::Configuration(format!(
                "{} is required",
                self.settings.image_provider.api_key_variable()
            ))
        })
    }

    async fn generate_gemini(
        &self,
        request: &GenerationRequest,
    ) -> Result<ImageData, ImageClientError> {
        let api_key = self.require_api_key()?;
        let model = self.settings.gemini_model_for(request.engine);
        let url = format!(
            "{}/models/{model}:generateContent",
            self.settings.gemini_base_url.trim_end_matches('/')
        );
        let provider_request = GeminiGenerateRequest::from_common_request(request);

        debug!(
            url = %url,
            model,
            edit = request.is_edit(),
            scoped = request.region().is_some(),
            "sending image request to gemini"
        );

        let response = ensure_success(
            self.http_client
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&provider_request)
                .send()
                .await?,
        )
        .await?;
        let payload: GeminiGenerateResponse = response.json().await?;
        extract_gemini_image(payload)
    }

    async fn generate_huggingface(
        &self,
        request: &GenerationRequest,
    ) -> Result<ImageData, ImageClientError> {
        let api_key = self.require_api_key()?;
        let url = format!(
            "{}/models/{}",
            self.settings.huggingface_base_url.trim_end_matches('/'),
            self.settings.huggingface_model
        );
        let provider_request = HuggingFaceRequest::from_common_request(request);

        info!(
            model = %self.settings.huggingface_model,
            edit = request.is_edit(),
            "hugging face engine is prompt-only; base image and selection are not sent"
        );

        let response = ensure_success(
            self.http_client
                .post(&url)
                .bearer_auth(api_key)
                .json(&provider_request)
                .send()
                .await?,
        )
        .await?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(ImageClientError::MissingField { field: "body" });
        }

        Ok(match mime_type {
            Some(mime) if mime.starts_with("image/") => ImageData::new(mime, bytes),
            _ => ImageData::from_bytes(bytes),
        })
    }
}

impl GenerationBackend for ImageModelClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageData, ImageClientError> {
        match self.settings.image_provider {
            ImageProvider::Gemini => self.generate_gemini(request).await,
            ImageProvider::HuggingFace => self.generate_huggingface(request).await,
        }
    }
}

pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ImageClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error response body>".to_owned());
    Err(ImageClientError::HttpStatus { status, body })
}

fn extract_gemini_image(payload: GeminiGenerateResponse) -> Result<ImageData, ImageClientError> {
    let candidate = payload
        .candidates
        .into_iter()
        .next()
        .ok_or(ImageClientError::MissingField {
            field: "candidates[0]",
        })?;
    let content = candidate
        .content
        .ok_or(ImageClientError::MissingField {
            field: "candidates[0].content",
        })?;

    let inline = content
        .parts
        .into_iter()
        .find_map(|part| part.inline_data)
        .ok_or_else(|| {
            ImageClientError::ResponseFormat("no image data received from gemini".to_owned())
        })?;

    Ok(ImageData::from_base64(inline.mime_type, &inline.data)?)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

impl GeminiGenerateRequest {
    fn from_common_request(request: &GenerationRequest) -> Self {
        let (image_size, tools) = match request.engine {
            QualityTier::Fast => (None, Vec::new()),
            QualityTier::HighFidelity {
                image_size,
                web_grounding,
            } => {
                let tools = if web_grounding {
                    vec![serde_json::json!({ "googleSearch": {} })]
                } else {
                    Vec::new()
                };
                (Some(image_size.as_str().to_owned()), tools)
            }
        };

        Self {
            contents: vec![GeminiContent {
                role: None,
                parts: vec![
                    GeminiPart::inline(
                        request.base_image.mime_type(),
                        request.base_image.to_base64(),
                    ),
                    GeminiPart::text(request.prompt()),
                ],
            }],
            generation_config: GeminiGenerationConfig {
                image_config: GeminiImageConfig {
                    aspect_ratio: request.aspect_ratio.as_str().to_owned(),
                    image_size,
                },
            },
            tools,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) role: Option<String>,
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline(mime_type: &str, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: mime_type.to_owned(),
                data,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiInlineData {
    pub(crate) mime_type: String,
    pub(crate) data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    image_config: GeminiImageConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiImageConfig {
    aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiGenerateResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiCandidate {
    pub(crate) content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct HuggingFaceRequest {
    inputs: String,
    parameters: HuggingFaceParameters,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct HuggingFaceParameters {
    width: u32,
    height: u32,
    num_inference_steps: u32,
    guidance_scale: f32,
}

impl HuggingFaceRequest {
    fn from_common_request(request: &GenerationRequest) -> Self {
        let (width, height) = request.aspect_ratio.pixel_dimensions();
        let num_inference_steps = match request.engine {
            QualityTier::Fast => HUGGINGFACE_FAST_STEPS,
            QualityTier::HighFidelity { .. } => HUGGINGFACE_HIGH_FIDELITY_STEPS,
        };

        Self {
            inputs: request.prompt(),
            parameters: HuggingFaceParameters {
                width,
                height,
                num_inference_steps,
                guidance_scale: HUGGINGFACE_GUIDANCE_SCALE,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::request::build_generation_request;
    use crate::thumbnail::{AspectRatio, ImageData, ImageSize, QualityTier, ThumbnailConfig};

    use super::*;

    fn request_for(config: &ThumbnailConfig) -> GenerationRequest {
        let photo = ImageData::new("image/jpeg", b"photo".to_vec());
        build_generation_request(Some(&photo), config).expect("request")
    }

    #[test]
    fn gemini_request_includes_size_and_grounding_only_on_high_fidelity() {
        let config = ThumbnailConfig {
            quality: QualityTier::HighFidelity {
                image_size: ImageSize::FourK,
                web_grounding: true,
            },
            ..ThumbnailConfig::default()
        };
        let body = serde_json::to_value(GeminiGenerateRequest::from_common_request(
            &request_for(&config),
        ))
        .expect("serialize");

        assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], "4K");
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
        assert_eq!(body["tools"], json!([{ "googleSearch": {} }]));
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "cGhvdG8=");

        let fast = ThumbnailConfig {
            quality: QualityTier::Fast,
            ..ThumbnailConfig::default()
        };
        let body = serde_json::to_value(GeminiGenerateRequest::from_common_request(
            &request_for(&fast),
        ))
        .expect("serialize");
        assert!(body["generationConfig"]["imageConfig"].get("imageSize").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn huggingface_request_derives_dimensions_and_steps() {
        let config = ThumbnailConfig {
            aspect_ratio: AspectRatio::Portrait,
            quality: QualityTier::Fast,
            ..ThumbnailConfig::default()
        };
        let request = HuggingFaceRequest::from_common_request(&request_for(&config));
        assert_eq!(request.parameters.width, 576);
        assert_eq!(request.parameters.height, 1024);
        assert_eq!(request.parameters.num_inference_steps, 30);

        let config = ThumbnailConfig::default();
        let request = HuggingFaceRequest::from_common_request(&request_for(&config));
        assert_eq!(request.parameters.num_inference_steps, 50);
        assert!(request.inputs.contains(&config.overlay_text));
    }

    #[test]
    fn extract_gemini_image_skips_text_parts() {
        let payload: GeminiGenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                    ]
                }
            }]
        }))
        .expect("payload");

        let image = extract_gemini_image(payload).expect("image");
        assert_eq!(image.bytes(), b"hello");
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn extract_gemini_image_reports_missing_candidates_and_images() {
        let empty: GeminiGenerateResponse =
            serde_json::from_value(json!({ "candidates": [] })).expect("payload");
        assert!(matches!(
            extract_gemini_image(empty),
            Err(ImageClientError::MissingField { .. })
        ));

        let text_only: GeminiGenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }]
        }))
        .expect("payload");
        assert!(matches!(
            extract_gemini_image(text_only),
            Err(ImageClientError::ResponseFormat(_))
        ));
    }

    #[test]
    fn status_is_exposed_for_http_errors_only() {
        let forbidden = ImageClientError::HttpStatus {
            status: StatusCode::FORBIDDEN,
            body: "denied".to_owned(),
        };
        assert_eq!(forbidden.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(
            ImageClientError::Configuration("missing key".to_owned()).status(),
            None
        );
    }
}
