//! Completion client.
//!
//! The single path every decision request takes to the upstream provider:
//! model selection through the governor, pacing, the backend call,
//! normalization, and outcome recording. Callers get back a canonical
//! [`CompletionResult`] or a classified [`UpstreamError`] and never touch
//! raw provider shapes.

use leadscout_core::action::ParsedAction;
use leadscout_core::backend::{ChatBackend, CompletionRequest, CompletionResult, RawKind};
use leadscout_core::error::UpstreamError;
use leadscout_core::message::{Conversation, Message};
use leadscout_core::protocol;
use leadscout_core::schema::ToolSchema;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::governor::ModelGovernor;
use crate::normalizer::normalize;

/// Reminder appended after the conversation so the tag format survives long
/// contexts, where instructions at the top of the prompt get diluted.
const TAIL_REMINDER: &str =
    "Reminder: respond with exactly one tagged tool call in the format shown in \
     the tool list, or plain text if no tool is needed.";

/// Settings for the completion client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask for a streamed reply. The provider may ignore this; both shapes
    /// are handled either way.
    pub stream: bool,
}

/// The completion client. Cheap to clone via the shared backend/governor.
pub struct CompletionClient {
    backend: Arc<dyn ChatBackend>,
    governor: Arc<ModelGovernor>,
    options: ClientOptions,
}

impl CompletionClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        governor: Arc<ModelGovernor>,
        options: ClientOptions,
    ) -> Self {
        Self {
            backend,
            governor,
            options,
        }
    }

    pub fn governor(&self) -> &ModelGovernor {
        &self.governor
    }

    /// Assemble the message list for a decision request: system prompt with
    /// the rendered tool schema, the conversation so far, then the tail
    /// reminder as a final user message.
    pub fn build_messages(
        &self,
        persona: &str,
        conversation: &Conversation,
        schema: &ToolSchema,
    ) -> Vec<Message> {
        let system = format!("{persona}\n\n{}", schema.render_prompt());

        let mut messages = Vec::with_capacity(conversation.messages.len() + 2);
        messages.push(Message::system(system));
        messages.extend(conversation.messages.iter().cloned());
        messages.push(Message::user(TAIL_REMINDER));
        messages
    }

    /// Run one full decision request: prompt assembly, completion, and
    /// parsing of the reply against `schema`.
    ///
    /// Protocol violations come back as [`leadscout_core::Error::Protocol`]
    /// so the caller can distinguish a misbehaving model from a failing
    /// provider.
    pub async fn decide(
        &self,
        persona: &str,
        conversation: &Conversation,
        schema: &ToolSchema,
    ) -> leadscout_core::Result<ParsedAction> {
        let messages = self.build_messages(persona, conversation, schema);
        let result = self.complete(messages).await?;
        let action = protocol::parse(&result.text, schema)?;
        Ok(action)
    }

    /// Run one completion through the full pipeline.
    ///
    /// Success is recorded against the model as soon as a usable body is
    /// normalized; whether the text later parses as a tool call is the
    /// caller's concern, not the model's health.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
    ) -> std::result::Result<CompletionResult, UpstreamError> {
        let model = self
            .governor
            .select_model(&self.options.default_model, &self.options.fallback_models);

        if model != self.options.default_model {
            info!(model = %model, preferred = %self.options.default_model, "Using fallback model");
        }

        let wait = self.governor.pace(&model);
        if !wait.is_zero() {
            debug!(model = %model, wait_ms = wait.as_millis() as u64, "Pacing before request");
            tokio::time::sleep(wait).await;
        }

        let request = CompletionRequest {
            model: model.clone(),
            messages,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            stream: self.options.stream,
        };

        let started = tokio::time::Instant::now();
        let raw = match self.backend.request(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(model = %model, kind = e.kind(), "Upstream request failed");
                self.governor.record_failure(&model, &e);
                return Err(e);
            }
        };

        let mut result = normalize(raw).await;

        if result.raw_kind == RawKind::Malformed {
            let err = UpstreamError::Unknown(format!(
                "model '{model}' returned a body with no recognizable completion"
            ));
            self.governor.record_failure(&model, &err);
            return Err(err);
        }

        if result.model_used.is_empty() {
            result.model_used = model.clone();
        }

        self.governor
            .record_success(&result.model_used, started.elapsed());
        Ok(result)
    }
}
