//! ChatBackend trait — the abstraction over upstream model providers.
//!
//! A backend knows how to send a conversation to a model and hand back the
//! raw reply in one of a small closed set of shapes. Downstream code never
//! inspects provider objects: the [`RawReply`] variants are produced once,
//! at the provider boundary, and everything after operates on them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::UpstreamError;
use crate::message::Message;

/// Configuration for one upstream completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (full provider IDs, e.g. "anthropic/claude-3-haiku")
    pub model: String,

    /// The conversation messages, system prompt first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to request a streamed reply. The provider may answer with a
    /// complete body anyway; callers must accept either shape.
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.0
}

/// A single incremental chunk of a streamed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Partial content. Role-only and termination chunks carry none.
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk.
    #[serde(default)]
    pub done: bool,
}

/// The raw upstream reply, shaped at the provider boundary.
pub enum RawReply {
    /// A finished message arrived in one piece. The common case even when
    /// the request asked for streaming.
    Complete { text: String, model: String },

    /// Incremental chunks; the receiver yields deltas until the sender
    /// closes. Must be fully drained by the normalizer.
    Streamed {
        deltas: mpsc::Receiver<std::result::Result<StreamDelta, UpstreamError>>,
        model: String,
    },

    /// The body matched neither shape. Not an error at this layer; the
    /// normalizer turns it into an empty result the caller classifies.
    Malformed { detail: String },
}

impl std::fmt::Debug for RawReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete { text, model } => f
                .debug_struct("Complete")
                .field("text_len", &text.len())
                .field("model", model)
                .finish(),
            Self::Streamed { model, .. } => {
                f.debug_struct("Streamed").field("model", model).finish()
            }
            Self::Malformed { detail } => {
                f.debug_struct("Malformed").field("detail", detail).finish()
            }
        }
    }
}

/// Which wire shape a normalized reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawKind {
    Complete,
    Streamed,
    Malformed,
}

/// The canonical reply shape every upstream response is reduced to.
///
/// `text` is always fully materialized: no partial or streaming state
/// leaks past the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
    pub raw_kind: RawKind,
    pub model_used: String,
}

/// The core backend trait.
///
/// Implemented by the OpenRouter HTTP client in `leadscout-providers` and by
/// in-memory mocks in tests. The completion client calls `request()` without
/// knowing which backend answers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// A human-readable name for this backend (e.g. "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get the raw reply in one of the closed shapes.
    ///
    /// Transport and provider failures are classified into [`UpstreamError`]
    /// here, at the boundary.
    async fn request(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<RawReply, UpstreamError>;

    /// List available models. Backends without a listing endpoint return
    /// an empty vector.
    async fn list_models(&self) -> std::result::Result<Vec<String>, UpstreamError> {
        Ok(Vec::new())
    }
}
