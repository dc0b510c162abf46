//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to the configured endpoint, optionally
//! streaming, and retries transient failures with exponential backoff.
//! Agents talk to the model through the [`ChatModel`] trait so they can be
//! exercised against scripted models in tests.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::streaming::{collect_stream, parse_non_streaming_response, parse_sse_stream, Completion};
use super::types::{ChatCompletionRequest, Message, ToolChoice, ToolDefinition};
use crate::config::settings::ModelSettings;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout, streaming included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// The two ways agents talk to the model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Plain completion. Returns trimmed, non-empty text.
    async fn ask(&self, messages: &[Message], stream: bool) -> Result<String, InferenceError>;

    /// Function-calling completion. Returns an assistant message carrying
    /// content, tool calls, or both.
    async fn ask_tool(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        stream: bool,
    ) -> Result<Message, InferenceError>;
}

// ─── Retry ───────────────────────────────────────────────────────────────────

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(InferenceError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible chat completion endpoint.
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl InferenceClient {
    /// Create a client from the `[model]` settings.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self, InferenceError> {
        if settings.api_key.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model.api_key is required".to_string(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: settings.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: Option<ToolChoice>,
        stream: bool,
    ) -> ChatCompletionRequest {
        let tools = (!tools.is_empty()).then(|| tools.to_vec());
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tool_choice: tools.as_ref().and(tool_choice),
            tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    /// Perform a single completion round trip.
    async fn try_complete(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<Completion, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            tool_choice = ?body.tool_choice,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let mut request = self.http.post(&url).bearer_auth(&self.api_key).json(body);
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: REQUEST_TIMEOUT.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let completion = if body.stream {
            collect_stream(parse_sse_stream(response.bytes_stream())).await?
        } else {
            let text = response.text().await.map_err(|e| InferenceError::StreamError {
                reason: format!("failed to read response body: {e}"),
            })?;
            parse_non_streaming_response(&text)?
        };

        tracing::debug!(
            content_len = completion.content.len(),
            tool_calls = completion.tool_calls.len(),
            finish_reason = ?completion.finish_reason,
            "=== LLM RESPONSE ==="
        );
        Ok(completion)
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn ask(&self, messages: &[Message], stream: bool) -> Result<String, InferenceError> {
        let body = self.build_request(messages, &[], None, stream);
        self.retry
            .run(|| async {
                let completion = self.try_complete(&body).await?;
                let text = completion.content.trim();
                if text.is_empty() {
                    return Err(InferenceError::EmptyResponse);
                }
                Ok(text.to_string())
            })
            .await
    }

    async fn ask_tool(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        stream: bool,
    ) -> Result<Message, InferenceError> {
        let body = self.build_request(messages, tools, Some(tool_choice), stream);
        self.retry
            .run(|| async {
                let completion = self.try_complete(&body).await?;
                Message::assistant(Some(completion.content), completion.tool_calls)
            })
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
