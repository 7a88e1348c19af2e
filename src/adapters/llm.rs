use crate::config::TranslatorConfig;
use crate::domain::ports::Translator;
use crate::utils::error::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = "\
You control a robotic arm with three servos. Convert the user's request into servo commands.

Servos:
0: base rotation (yaw), 0-360 degrees, default 180
1: upper arm, 0-180 degrees, default 90
2: forearm, 0-180 degrees, default 90

Rules:
- Each command is \"<servo id> <angle>\", for example \"0 150\". Never add an \"id\" prefix.
- Put one command per line when several moves are needed.
- If the request is unclear or impossible, reply with a short explanation instead.
- Reply with only the commands or the explanation, nothing else.

Examples:
\"Turn the base to 90 degrees\" -> 0 90
\"Raise the upper arm a little\" -> 1 120
\"Reset all servos\" ->
0 180
1 90
2 90
\"Move the arm to the front position\" ->
0 180
1 60
2 120";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Translator backed by an OpenAI-compatible chat-completions endpoint.
pub struct ChatTranslator {
    client: Client,
    config: TranslatorConfig,
}

impl ChatTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    async fn translate(&self, intent: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: intent,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        tracing::debug!("Making chat completion request to: {}", self.endpoint());
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("Chat completion response status: {}", status);

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RelayError::TranslationError {
                message: format!("model endpoint returned {}: {}", status, detail.trim()),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| RelayError::TranslationError {
                message: "model returned an empty reply".to_string(),
            })?;

        Ok(content)
    }
}
