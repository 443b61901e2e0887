//! Parsed actions and execution outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The concrete decision extracted from a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedAction {
    /// A validated tool invocation. Every required argument for the named
    /// tool is guaranteed present; extra arguments are carried through.
    ToolCall {
        name: String,
        arguments: BTreeMap<String, String>,
    },

    /// The model produced a conversational reply with no tool call.
    /// A valid outcome, not an error.
    PlainText { content: String },
}

impl ParsedAction {
    /// Convenience constructor for a tool call.
    pub fn tool_call<I, K, V>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::ToolCall {
            name: name.into(),
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The tool name, if this is a call.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolCall { name, .. } => Some(name),
            Self::PlainText { .. } => None,
        }
    }

    /// Re-render the action in the tagged protocol syntax, for recording
    /// the assistant's decision in conversation history.
    pub fn to_tagged_text(&self) -> String {
        match self {
            Self::ToolCall { name, arguments } => {
                let mut out = format!("<{name}>");
                for (arg, value) in arguments {
                    out.push_str(&format!("<{arg}>{value}</{arg}>"));
                }
                out.push_str(&format!("</{name}>"));
                out
            }
            Self::PlainText { content } => content.clone(),
        }
    }
}

/// The result of handing an action to the external executor.
///
/// An error outcome is an ordinary observation for the next decision cycle,
/// never a fatal condition by itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: String,
}

impl ActionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}
