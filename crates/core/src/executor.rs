//! ActionExecutor trait — the boundary to browser/CRM capabilities.
//!
//! The research loop decides; an executor acts. Browser automation and CRM
//! access live behind this trait and are supplied by the embedding
//! application. Error outcomes are observations, not failures of the loop.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::action::ActionOutcome;

/// Executes a named action with string arguments.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute the action and report what happened. Implementations are
    /// expected to bound their own execution time; the scheduler does not
    /// wrap this call in a deadline.
    async fn execute(&self, action: &str, arguments: &BTreeMap<String, String>) -> ActionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;

    #[async_trait]
    impl ActionExecutor for EchoExecutor {
        async fn execute(
            &self,
            action: &str,
            arguments: &BTreeMap<String, String>,
        ) -> ActionOutcome {
            ActionOutcome::ok(format!("{action}: {} args", arguments.len()))
        }
    }

    #[tokio::test]
    async fn executor_is_object_safe() {
        let executor: Box<dyn ActionExecutor> = Box::new(EchoExecutor);
        let args = BTreeMap::from([("url".to_string(), "https://acme.com".to_string())]);
        let outcome = executor.execute("navigate", &args).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "navigate: 1 args");
    }
}
