use crate::config::CompletionConfig;
use cardpipe_core::{CompletionBackend, CompletionRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ERROR_BODY_EXCERPT_CHARS: usize = 300;

/// Client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatClient {
    /// Fails with `CredentialMissing` when no API key is configured; no request is made.
    pub fn new(client: reqwest::Client, cfg: &CompletionConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::CredentialMissing(
                    "no API key configured (set CARDPIPE_API_KEY or apiKey in the settings file)"
                        .to_string(),
                )
            })?
            .to_string();
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            api_key,
            model: crate::config::normalize_model_id(&cfg.model),
            timeout: Duration::from_millis(cfg.timeout_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_chat_completions(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        // Accept both "https://host" and "https://host/v1".
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    pub async fn chat(&self, req: &CompletionRequest) -> Result<String> {
        let body = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: req.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: req.user.clone(),
                },
            ],
            max_tokens: Some(req.max_tokens),
            temperature: Some(req.temperature),
            top_p: Some(req.top_p),
            frequency_penalty: Some(req.frequency_penalty),
            response_format: req.json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
            stream: Some(false),
        };

        let t0 = std::time::Instant::now();
        let resp = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let excerpt: String = text.trim().chars().take(ERROR_BODY_EXCERPT_CHARS).collect();
            return Err(Error::Completion(if excerpt.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {excerpt}")
            }));
        }

        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Completion(format!("unreadable completion response: {e}")))?;
        tracing::debug!(
            model = %self.model,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "completion received"
        );
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl CompletionBackend for OpenAiCompatClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<String> {
        self.chat(req).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
