//! # LeadScout Providers
//!
//! The upstream boundary: the OpenRouter HTTP backend, the reply
//! normalizer, the rate/model governor, and the completion client that
//! threads them together. Everything above this crate sees only
//! [`leadscout_core::CompletionResult`] and classified errors.

pub mod client;
pub mod governor;
pub mod normalizer;
pub mod openrouter;

pub use client::{ClientOptions, CompletionClient};
pub use governor::{ModelGovernor, ModelStats};
pub use normalizer::normalize;
pub use openrouter::OpenRouterBackend;
