//! # LeadScout Core
//!
//! Domain types, traits, and error definitions for the LeadScout research
//! agent runtime. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem boundary is a trait here ([`ChatBackend`],
//! [`ActionExecutor`]). Implementations live in their respective crates.
//! This enables:
//! - Swapping the upstream provider via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod action;
pub mod backend;
pub mod error;
pub mod executor;
pub mod message;
pub mod protocol;
pub mod schema;

// Re-export key types at crate root for ergonomics
pub use action::{ActionOutcome, ParsedAction};
pub use backend::{ChatBackend, CompletionRequest, CompletionResult, RawKind, RawReply, StreamDelta};
pub use error::{CredentialsError, Error, ProtocolError, Result, UpstreamError};
pub use executor::ActionExecutor;
pub use message::{Conversation, ConversationId, Message, Role};
pub use schema::{ToolSchema, ToolSpec};
