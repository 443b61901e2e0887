//! Reply normalization.
//!
//! Reduces every [`RawReply`] shape to one canonical [`CompletionResult`]
//! with fully materialized text. Normalization is total: it never fails,
//! it only records which shape the reply arrived in. Callers decide what an
//! empty or malformed result means for them.

use leadscout_core::backend::{CompletionResult, RawKind, RawReply};
use tracing::{debug, warn};

/// Reduce a raw upstream reply to the canonical result shape.
///
/// Streamed replies are drained to completion here so that no partial
/// state escapes this function. A transport failure mid-stream ends the
/// drain; whatever text accumulated before the failure is kept.
pub async fn normalize(reply: RawReply) -> CompletionResult {
    match reply {
        RawReply::Complete { text, model } => {
            debug!(model = %model, len = text.len(), "Normalized complete reply");
            CompletionResult {
                text,
                raw_kind: RawKind::Complete,
                model_used: model,
            }
        }

        RawReply::Streamed { mut deltas, model } => {
            let mut text = String::new();
            let mut interrupted = false;

            while let Some(item) = deltas.recv().await {
                match item {
                    Ok(delta) => {
                        if let Some(content) = delta.content {
                            text.push_str(&content);
                        }
                        if delta.done {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(model = %model, error = %e, "Stream interrupted, keeping partial text");
                        interrupted = true;
                        break;
                    }
                }
            }

            debug!(
                model = %model,
                len = text.len(),
                interrupted,
                "Normalized streamed reply"
            );

            CompletionResult {
                text,
                raw_kind: RawKind::Streamed,
                model_used: model,
            }
        }

        RawReply::Malformed { detail } => {
            warn!(detail = %detail, "Normalizing malformed reply to empty result");
            CompletionResult {
                text: String::new(),
                raw_kind: RawKind::Malformed,
                model_used: String::new(),
            }
        }
    }
}
