//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{InferenceClient, InferenceError, InferenceRequest, InferenceResponse};
use crate::config::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::utils::duration_ms;

/// Connection settings for [`OpenAiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Bearer token.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Endpoint base, without a trailing slash.
    pub api_base: String,
    /// Model name.
    pub model: String,
    /// Transport-level timeout; the stage runner applies its own as well.
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    /// Creates a config with the default endpoint and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(180),
        }
    }

    /// Sets the endpoint base.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the transport timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// HTTP inference client for `{api_base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

impl OpenAiClient {
    /// Builds the client.
    pub fn new(config: OpenAiConfig) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn request_body(&self, request: &InferenceRequest) -> Value {
        let shape = serde_json::to_string_pretty(&request.response_shape.example)
            .unwrap_or_default();
        let mut content = vec![json!({
            "type": "text",
            "text": format!(
                "{}\n\nRespond with a single JSON object shaped like this `{}` example:\n{}",
                request.prompt, request.response_shape.name, shape
            ),
        })];
        for image in &request.images {
            content.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", image.media_type, BASE64.encode(&image.data)),
                    "detail": "low",
                },
            }));
        }
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": content},
            ],
            "max_tokens": request.max_output_tokens,
            "response_format": {"type": "json_object"},
        })
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps a non-success HTTP status to an inference error.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> InferenceError {
    let snippet: String = body.chars().take(300).collect();
    match status.as_u16() {
        429 => InferenceError::RateLimited { retry_after },
        400 | 401 | 403 | 404 | 413 | 422 => {
            InferenceError::MalformedRequest(format!("HTTP {status}: {snippet}"))
        }
        _ => InferenceError::Upstream(format!("HTTP {status}: {snippet}")),
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.config.request_timeout)
                } else {
                    InferenceError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, hint, &body));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| InferenceError::Upstream(format!("unreadable completion: {e}")))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::Upstream("completion has no content".to_string()))?;

        debug!(
            stage = %request.stage,
            model = %completion.model,
            latency_ms = duration_ms(started.elapsed()),
            "inference call completed"
        );

        Ok(InferenceResponse {
            text,
            model: completion.model,
            input_tokens: completion.usage.as_ref().and_then(|u| u.prompt_tokens),
            output_tokens: completion.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageName;
    use crate::inference::{ImagePayload, ResponseShape};

    fn request() -> InferenceRequest {
        InferenceRequest::new(
            StageName::Extract,
            "You analyze comics.",
            "Describe the page.",
            ResponseShape {
                name: "page".into(),
                example: json!({"description": "..."}),
            },
        )
        .with_images(vec![ImagePayload::new("image/png", vec![0x89, 0x50])])
    }

    #[test]
    fn test_request_body_shape() {
        let client = OpenAiClient::new(OpenAiConfig::new("sk-test").with_model("gpt-4o-mini")).unwrap();
        let body = client.request_body(&request());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["response_format"]["type"], "json_object");
        let content = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,iVA=");
        assert_eq!(content[1]["image_url"]["detail"], "low");
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2)), ""),
            InferenceError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            InferenceError::MalformedRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::PAYLOAD_TOO_LARGE, None, ""),
            InferenceError::MalformedRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, ""),
            InferenceError::Upstream(_)
        ));
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let config = OpenAiConfig::new("sk-x").with_api_base("http://localhost:8080/v1/");
        assert_eq!(config.api_base, "http://localhost:8080/v1");
    }
}
