//! # LeadScout Agent
//!
//! The research loop: a step scheduler that alternates model decisions with
//! action execution, and the deterministic fallback policy it leans on when
//! a decision cycle produces nothing actionable.

pub mod fallback;
pub mod scheduler;

pub use fallback::FallbackPlan;
pub use scheduler::{RunOutcome, RunReport, StepScheduler};
