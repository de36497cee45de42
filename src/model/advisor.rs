use futures_util::StreamExt;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StudioSettings;
use crate::credentials::SharedApiKey;
use crate::model::client::{
    GeminiContent, GeminiGenerateResponse, GeminiPart, ImageClientError, ensure_success,
};
use crate::thumbnail::ThumbnailConfig;

pub const ADVISOR_GREETING: &str = "I've looked at your current settings. Want a punchier headline or a more dramatic background?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisorRole {
    User,
    Advisor,
}

impl AdvisorRole {
    fn as_gemini_role(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Advisor => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorMessage {
    pub role: AdvisorRole,
    pub text: String,
}

impl AdvisorMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: AdvisorRole::User,
            text: text.into(),
        }
    }

    pub fn advisor(text: impl Into<String>) -> Self {
        Self {
            role: AdvisorRole::Advisor,
            text: text.into(),
        }
    }
}

/// Snapshot of the creative fields the advisor comments on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorContext {
    pub headline: String,
    pub background: String,
    pub action: String,
    pub expression: String,
}

impl From<&ThumbnailConfig> for AdvisorContext {
    fn from(config: &ThumbnailConfig) -> Self {
        Self {
            headline: config.overlay_text.clone(),
            background: config.background_details.clone(),
            action: config.character_action.clone(),
            expression: config.facial_expression.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisorEvent {
    Delta(String),
    Finished { reply: String },
    Failed { error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error(transparent)]
    Backend(#[from] ImageClientError),

    #[error("GEMINI_API_KEY is required for the advisor")]
    MissingApiKey,
}

impl From<reqwest::Error> for AdvisorError {
    fn from(error: reqwest::Error) -> Self {
        Self::Backend(ImageClientError::Transport(error))
    }
}

/// Streaming chat with a thumbnail consultant model.
#[derive(Debug, Clone)]
pub struct AdvisorClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SharedApiKey,
}

impl AdvisorClient {
    pub fn new(settings: &StudioSettings, api_key: SharedApiKey) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: settings.gemini_base_url.clone(),
            model: settings.gemini_advisor_model.clone(),
            api_key,
        }
    }

    /// Streams a reply on `handle`. The receiver yields deltas and then exactly one
    /// `Finished` or `Failed`, unless `cancel` fires first.
    pub fn spawn_reply(
        &self,
        handle: &Handle,
        history: Vec<AdvisorMessage>,
        context: AdvisorContext,
        cancel: CancellationToken,
    ) -> UnboundedReceiver<AdvisorEvent> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = self.clone();

        handle.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("advisor reply cancelled");
                }
                result = client.stream_reply(&history, &context, &event_tx) => {
                    let event = match result {
                        Ok(reply) => AdvisorEvent::Finished { reply },
                        Err(error) => {
                            warn!(error = %error, "advisor reply failed");
                            AdvisorEvent::Failed { error: error.to_string() }
                        }
                    };
                    let _ = event_tx.send(event);
                }
            }
        });

        event_rx
    }

    async fn stream_reply(
        &self,
        history: &[AdvisorMessage],
        context: &AdvisorContext,
        event_tx: &UnboundedSender<AdvisorEvent>,
    ) -> Result<String, AdvisorError> {
        let api_key = self.api_key.get().ok_or(AdvisorError::MissingApiKey)?;
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let request = AdvisorRequest::new(history, context);

        debug!(url = %url, turns = history.len(), "sending advisor request");

        let response = ensure_success(
            self.http_client
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&request)
                .send()
                .await?,
        )
        .await?;

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes = buffer.drain(..=newline_pos).collect::<Vec<_>>();
                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    continue;
                };
                if let Some(text) = parse_sse_line(line) {
                    reply.push_str(&text);
                    let _ = event_tx.send(AdvisorEvent::Delta(text));
                }
            }
        }

        Ok(reply)
    }
}

fn system_instruction(context: &AdvisorContext) -> String {
    format!(
        "You are a video thumbnail consultant. Be extremely concise: no greetings, no filler.\n\
         Current thumbnail:\n\
         - Headline: \"{}\"\n\
         - Background: \"{}\"\n\
         - Action: \"{}\"\n\
         - Expression: \"{}\"\n\
         Answer in at most four short bullets and use **bold** for emphasis. When asked how you can help, name three concrete things you can improve.\n\
         Format suggestions so they can be pasted straight into the form:\n\
         - **Headline:** <text>\n\
         - **BG:** <short visual description>\n\
         - **Action:** <pose>",
        context.headline, context.background, context.action, context.expression
    )
}

/// Text carried by one `data:` line of a server-sent event stream, if any.
fn parse_sse_line(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let response: GeminiGenerateResponse = serde_json::from_str(payload).ok()?;
    let text: String = response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect();

    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdvisorRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
}

impl AdvisorRequest {
    fn new(history: &[AdvisorMessage], context: &AdvisorContext) -> Self {
        Self {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(system_instruction(context))],
            },
            contents: history
                .iter()
                .filter(|message| !message.text.trim().is_empty())
                .map(|message| GeminiContent {
                    role: Some(message.role.as_gemini_role().to_owned()),
                    parts: vec![GeminiPart::text(message.text.clone())],
                })
                .collect(),
        }
    }
}
