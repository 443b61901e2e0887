//! OpenRouter backend implementation.
//!
//! Works with OpenRouter and any OpenAI-compatible `/v1/chat/completions`
//! endpoint. All transport and provider failures are classified into
//! [`UpstreamError`] here, at the boundary; nothing downstream matches on
//! HTTP status codes or provider error strings.
//!
//! One provider quirk this module owns: a request with `stream: true` may
//! still be answered with a complete JSON body. Both shapes are accepted and
//! surfaced through [`RawReply`].

use async_trait::async_trait;
use futures::StreamExt;
use leadscout_core::backend::{ChatBackend, CompletionRequest, RawReply, StreamDelta};
use leadscout_core::error::UpstreamError;
use leadscout_core::message::{Message, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Marker OpenRouter embeds in error bodies when a model has no endpoint
/// with tool-use support. Matched case-insensitively.
const NO_TOOL_ENDPOINT_MARKER: &str = "no endpoints found that support tool use";

/// An OpenRouter (OpenAI-compatible) chat backend.
pub struct OpenRouterBackend {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenRouterBackend {
    /// Create a backend for any OpenAI-compatible endpoint.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| UpstreamError::Unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenRouter backend (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, UpstreamError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Convert our Message types to wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// Classify a non-200 response into an [`UpstreamError`].
    fn classify_status(&self, model: &str, status: u16, body: &str) -> UpstreamError {
        if status == 429 {
            return UpstreamError::RateLimited {
                retry_after_secs: 5,
            };
        }

        let lowered = body.to_ascii_lowercase();
        if status == 404 || lowered.contains(NO_TOOL_ENDPOINT_MARKER) {
            return UpstreamError::EndpointUnsupported {
                model: model.to_string(),
                reason: if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.to_string()
                },
            };
        }

        UpstreamError::Unknown(format!("HTTP {status}: {body}"))
    }

    /// Classify a reqwest transport failure.
    fn classify_transport(err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else {
            UpstreamError::Unknown(err.to_string())
        }
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": request.stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    /// Extract the assistant text from a complete chat-completions body.
    fn extract_complete(body: &str, model: &str) -> Option<RawReply> {
        let api_response: ApiResponse = serde_json::from_str(body).ok()?;
        let choice = api_response.choices.into_iter().next()?;
        Some(RawReply::Complete {
            text: choice.message.content.unwrap_or_default(),
            model: if api_response.model.is_empty() {
                model.to_string()
            } else {
                api_response.model
            },
        })
    }
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<RawReply, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);
        let model = request.model.clone();

        debug!(backend = %self.name, model = %model, stream = request.stream, "Sending completion request");

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        if request.stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status().as_u16();

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(self.classify_status(&model, status, &error_body));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Providers sometimes answer a streaming request with a complete
        // JSON body. Shape is decided by what actually arrived, not by
        // what was asked for.
        if request.stream && content_type.contains("text/event-stream") {
            return Ok(self.spawn_sse_reader(response, model));
        }

        let text = response
            .text()
            .await
            .map_err(Self::classify_transport)?;

        match Self::extract_complete(&text, &model) {
            Some(reply) => Ok(reply),
            None => {
                warn!(backend = %self.name, model = %model, "Response body matched no known shape");
                Ok(RawReply::Malformed {
                    detail: format!(
                        "body is neither a chat completion nor an event stream ({} bytes)",
                        text.len()
                    ),
                })
            }
        }
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, UpstreamError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(Self::classify_transport)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(Self::classify_transport)?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

impl OpenRouterBackend {
    /// Spawn a task reading the SSE byte stream into a delta channel.
    fn spawn_sse_reader(&self, response: reqwest::Response, model: String) -> RawReply {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let backend_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(Self::classify_transport(e))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();

                        if data == "[DONE]" {
                            let _ = tx
                                .send(Ok(StreamDelta {
                                    content: None,
                                    done: true,
                                }))
                                .await;
                            return;
                        }

                        match serde_json::from_str::<StreamResponse>(data) {
                            Ok(stream_resp) => {
                                if let Some(choice) = stream_resp.choices.first() {
                                    let content = choice.delta.content.clone();
                                    let finished = choice.finish_reason.is_some();

                                    let has_content =
                                        content.as_ref().is_some_and(|c| !c.is_empty());
                                    if has_content || finished {
                                        let delta = StreamDelta {
                                            content,
                                            done: finished,
                                        };
                                        if tx.send(Ok(delta)).await.is_err() {
                                            return; // receiver dropped
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                trace!(
                                    backend = %backend_name,
                                    data = %data,
                                    error = %e,
                                    "Ignoring unparseable SSE chunk"
                                );
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE] — close with a final done delta
            let _ = tx
                .send(Ok(StreamDelta {
                    content: None,
                    done: true,
                }))
                .await;
        });

        RawReply::Streamed { deltas: rx, model }
    }
}

// --- Wire types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> OpenRouterBackend {
        OpenRouterBackend::openrouter("sk-test").unwrap()
    }

    #[test]
    fn openrouter_constructor() {
        let b = backend();
        assert_eq!(b.name(), "openrouter");
        assert!(b.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let b = OpenRouterBackend::new("local", "http://localhost:8000/v1/", "k").unwrap();
        assert_eq!(b.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You research leads"), Message::user("Go")];
        let api_messages = OpenRouterBackend::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    // --- Classification tests ---

    #[test]
    fn status_429_is_rate_limited() {
        let err = backend().classify_status("m", 429, "slow down");
        assert!(matches!(err, UpstreamError::RateLimited { .. }));
    }

    #[test]
    fn status_404_is_endpoint_unsupported() {
        let err = backend().classify_status("qwen/qwen2.5-32b-instruct", 404, "not found");
        match err {
            UpstreamError::EndpointUnsupported { model, .. } => {
                assert_eq!(model, "qwen/qwen2.5-32b-instruct");
            }
            other => panic!("expected EndpointUnsupported, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_marker_is_endpoint_unsupported_regardless_of_status() {
        let err = backend().classify_status(
            "deepseek/deepseek-chat",
            400,
            "No endpoints found that support tool use for this model",
        );
        assert_eq!(err.kind(), "endpoint_unsupported");
    }

    #[test]
    fn other_statuses_are_unknown() {
        let err = backend().classify_status("m", 500, "internal");
        assert_eq!(err.kind(), "unknown");
        assert!(err.to_string().contains("500"));
    }

    // --- Body shape tests ---

    #[test]
    fn extract_complete_body() {
        let body = r#"{"model":"deepseek/deepseek-chat","choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let reply = OpenRouterBackend::extract_complete(body, "fallback-model").unwrap();
        match reply {
            RawReply::Complete { text, model } => {
                assert_eq!(text, "hello");
                assert_eq!(model, "deepseek/deepseek-chat");
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn extract_complete_falls_back_to_requested_model() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"x"}}]}"#;
        let reply = OpenRouterBackend::extract_complete(body, "requested").unwrap();
        match reply {
            RawReply::Complete { model, .. } => assert_eq!(model, "requested"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn garbage_body_is_not_complete() {
        assert!(OpenRouterBackend::extract_complete("<html>oops</html>", "m").is_none());
        assert!(OpenRouterBackend::extract_complete("{\"no_choices\":true}", "m").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(parsed.choices[0].finish_reason.is_none());
    }

    #[test]
    fn parse_stream_finish_chunk() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(parsed.choices[0].delta.content.is_none());
    }

    #[test]
    fn parse_empty_delta() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.choices[0].delta.content.is_none());
    }
}
