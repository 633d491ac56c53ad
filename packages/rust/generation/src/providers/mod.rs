//! Generation provider trait and built-in providers.
//!
//! A provider sends one [`Prompt`] to a language-model service and returns the
//! raw completion text. Retries, scheduling and response validation live in
//! the engine; providers only classify what went wrong.

mod anthropic;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use url::Url;

use docgen_shared::{DocgenError, ProviderConfig, ProviderKind, Result};

use crate::prompt::Prompt;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("dbt-docgen/", env!("CARGO_PKG_VERSION"));

/// Error bodies are cut to this many characters before being logged or reported.
const MAX_ERROR_BODY_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Raw text returned by a provider, with token usage when reported.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Why a single provider call failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after` carries the server's hint, if any.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection failure, timeout, truncated body, or a 5xx status.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other non-success status; retrying will not help.
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The service answered 2xx but the payload was unusable.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// A language-model service that can complete a prompt.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> std::result::Result<Completion, ProviderError>;

    /// Human-readable provider name for tracing.
    fn name(&self) -> &str;
}

/// Build the provider selected by `config.kind`.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn GenerationProvider>> {
    let provider: Arc<dyn GenerationProvider> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
    };
    tracing::info!(provider = provider.name(), model = %config.model, "generation provider ready");
    Ok(provider)
}

// ---------------------------------------------------------------------------
// HTTP helpers shared by providers
// ---------------------------------------------------------------------------

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| DocgenError::config(format!("failed to build HTTP client: {e}")))
}

/// `base` + `/` + `path`, regardless of whether `base` ends in a slash.
fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'))
}

fn transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transport(format!("request timed out: {err}"))
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Classify a response: `Ok` with the body text on 2xx, a typed error otherwise.
async fn read_body(response: Response) -> std::result::Result<String, ProviderError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        });
    }

    if status.is_success() {
        return response.text().await.map_err(|e| transport_error(&e));
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();

    if status.is_server_error() {
        Err(ProviderError::Transport(format!("HTTP {status}: {body}")))
    } else {
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Numeric `Retry-After` (seconds). HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn endpoint_joins_with_single_slash() {
        let base = Url::parse("https://api.openai.com/v1").unwrap();
        assert_eq!(endpoint(&base, "chat/completions"), "https://api.openai.com/v1/chat/completions");

        let base = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(endpoint(&base, "/v1/messages"), "http://127.0.0.1:8080/v1/messages");
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));

        for unusable in ["100000000000000000000", "-3", "NaN", "inf"] {
            headers.insert(RETRY_AFTER, HeaderValue::from_static(unusable));
            assert_eq!(parse_retry_after(&headers), None, "{unusable}");
        }
    }

    #[test]
    fn build_provider_selects_kind() {
        let section = docgen_shared::ProviderSection {
            kind: ProviderKind::Anthropic,
            ..Default::default()
        };
        let config = ProviderConfig::from_section(&section, "key".into()).unwrap();
        assert_eq!(build_provider(&config).unwrap().name(), "anthropic");

        let config =
            ProviderConfig::from_section(&docgen_shared::ProviderSection::default(), "key".into())
                .unwrap();
        assert_eq!(build_provider(&config).unwrap().name(), "openai");
    }
}
