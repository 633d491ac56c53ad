//! Anthropic Messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docgen_shared::{ProviderConfig, Result};

use super::{
    Completion, GenerationProvider, ProviderError, build_http_client, endpoint, read_body,
    transport_error,
};
use crate::prompt::Prompt;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Talks to `POST {base_url}/v1/messages`.
pub struct AnthropicProvider {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.request_timeout)?,
            url: endpoint(&config.base_url, "v1/messages"),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for AnthropicProvider {
    async fn complete(&self, prompt: &Prompt) -> std::result::Result<Completion, ProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            system: &prompt.system,
            messages: [UserMessage {
                role: "user",
                content: &prompt.user,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let body = read_body(response).await?;
        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("invalid messages JSON: {e}")))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            return Err(ProviderError::Malformed(
                "response contained no text content".into(),
            ));
        }

        let (tokens_in, tokens_out) = parsed
            .usage
            .map_or((0, 0), |u| (u.input_tokens, u.output_tokens));

        debug!(tokens_in, tokens_out, chars = text.len(), "message received");

        Ok(Completion {
            text,
            tokens_in,
            tokens_out,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
