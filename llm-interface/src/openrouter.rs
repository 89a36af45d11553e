use crate::{ChatMessage, ChatRequest, LlmProvider};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use threadscope_core::{
    ConfigError, CoreError, LlmError, OpenRouterSettings, PacingConfig, RateLimitedClient,
    RetryMetrics,
};
use tracing::debug;

const PROVIDER: &str = "openrouter";
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
}

/// Chat completions over the OpenRouter HTTP API.
pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_url: String,
    client: RateLimitedClient,
}

impl OpenRouterProvider {
    pub fn new(settings: &OpenRouterSettings, pacing: &PacingConfig) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .default_headers(headers(settings)?)
            .build()?;

        Ok(Self {
            http,
            api_url: settings.api_url.clone(),
            client: RateLimitedClient::new(pacing.min_interval, pacing.timeout, pacing.retry.clone()),
        })
    }

    pub fn metrics(&self) -> RetryMetrics {
        self.client.metrics()
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, CoreError> {
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!(
            "OpenRouter request: model={}, json_mode={}, prompt_chars={}",
            request.model,
            request.json_mode,
            request.user_prompt().len()
        );

        let response = self.http.post(&self.api_url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), retry_after, &text, &request.model).into());
        }

        let parsed: WireResponse = response.json().await.map_err(|e| LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details: e.to_string(),
        })?;

        content_of(parsed).map_err(CoreError::from)
    }
}

impl LlmProvider for OpenRouterProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError> {
        let operation = format!("chat completion ({})", request.model);
        self.client.call(&operation, || self.send(request)).await
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

fn headers(settings: &OpenRouterSettings) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
        .map_err(|_| ConfigError::invalid_value("OPENROUTER_API_KEY", "<contains invalid characters>"))?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Ok(val) = HeaderValue::from_str(&settings.app_name) {
        headers.insert("X-Title", val);
    }

    Ok(headers)
}

fn status_error(status_code: u16, retry_after: u64, body: &str, model: &str) -> LlmError {
    let provider = PROVIDER.to_string();
    match status_code {
        401 => LlmError::AuthenticationFailed { provider },
        402 => LlmError::InsufficientCredits { provider },
        403 => LlmError::InvalidApiKey { provider },
        404 => LlmError::ModelNotAvailable {
            model: model.to_string(),
        },
        408 => LlmError::RequestTimeout { provider },
        429 => LlmError::RateLimitExceeded {
            provider,
            retry_after,
        },
        500..=599 => LlmError::ServiceUnavailable {
            provider,
            status_code,
        },
        _ => LlmError::RequestRejected {
            provider,
            status_code,
            message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        },
    }
}

fn content_of(response: WireResponse) -> Result<String, LlmError> {
    if let Some(error) = response.error {
        return Err(LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details: format!("error payload: {}", error.message),
        });
    }

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details: "no message content in response".to_string(),
        })
}
