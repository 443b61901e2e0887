//! Step scheduler.
//!
//! Drives a research run as a sequence of decision cycles: ask the model
//! for the next action, execute it, record the observation, repeat. Every
//! cycle ends in exactly one of: an executed action, a finished run, or a
//! deterministic fallback. The loop never spins waiting for a model that
//! will not answer.
//!
//! Forced actions travel through an explicit field on the loop, never
//! through conversation history. History is pure dialogue and observation
//! data; control flow lives in the scheduler's own state.

use leadscout_config::AgentConfig;
use leadscout_core::action::ParsedAction;
use leadscout_core::error::Error;
use leadscout_core::executor::ActionExecutor;
use leadscout_core::message::{Conversation, Message};
use leadscout_core::schema::ToolSchema;
use leadscout_providers::CompletionClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::fallback;

/// The tool name that ends a run.
const FINISH_TOOL: &str = "finish";

/// Where the loop is within one decision cycle. Logged, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Deciding,
    Acting,
    Observing,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model called `finish`.
    Completed { summary: String },
    /// The run hit a terminal condition: step budget exhausted or repeated
    /// identical failures.
    Failed { reason: String },
    /// The caller cancelled the run.
    Cancelled,
}

/// Everything a caller gets back from a run, including the full history
/// regardless of how the run ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub conversation: Conversation,
    pub cycles: u32,
    /// Set when the deterministic fallback had nothing to offer at least
    /// once; the run likely needs a human to refine the goal.
    pub needs_attention: bool,
}

/// The step scheduler.
pub struct StepScheduler {
    client: CompletionClient,
    executor: Arc<dyn ActionExecutor>,
    schema: ToolSchema,
    persona: String,
    config: AgentConfig,
}

impl StepScheduler {
    pub fn new(
        client: CompletionClient,
        executor: Arc<dyn ActionExecutor>,
        schema: ToolSchema,
        persona: impl Into<String>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            executor,
            schema,
            persona: persona.into(),
            config,
        }
    }

    /// Run the loop for `goal` until it finishes, fails, or is cancelled
    /// through `cancel`.
    pub async fn run(&self, goal: &str, mut cancel: watch::Receiver<bool>) -> RunReport {
        let mut conversation = Conversation::new();
        conversation.push(Message::user(goal));

        let decide_timeout = Duration::from_secs(self.config.decide_timeout_secs);
        let mut pending_forced: Option<ParsedAction> = None;
        let mut needs_attention = false;
        let mut last_failure: Option<String> = None;
        let mut failure_streak = 0u32;
        let mut cycles = 0u32;

        info!(conversation = %conversation.id, goal_len = goal.len(), "Starting run");

        for cycle in 1..=self.config.max_steps {
            cycles = cycle;

            if *cancel.borrow() {
                info!(cycle, "Run cancelled");
                return self.report(RunOutcome::Cancelled, conversation, cycles, needs_attention);
            }

            // A forced action pre-empts the model entirely this cycle.
            let action = if let Some(forced) = pending_forced.take() {
                info!(cycle, tool = ?forced.tool_name(), "Executing forced action");
                conversation.push(Message::assistant(forced.to_tagged_text()));
                forced
            } else {
                debug!(cycle, state = ?RunState::Deciding, "Requesting decision");
                let decide = self
                    .client
                    .decide(&self.persona, &conversation, &self.schema);

                let decided = tokio::select! {
                    res = tokio::time::timeout(decide_timeout, decide) => Some(res),
                    _ = wait_for_cancel(&mut cancel) => None,
                };

                let Some(decided) = decided else {
                    info!(cycle, "Run cancelled during decision");
                    return self.report(
                        RunOutcome::Cancelled,
                        conversation,
                        cycles,
                        needs_attention,
                    );
                };

                let decision = match decided {
                    Ok(Ok(action @ ParsedAction::ToolCall { .. })) => {
                        conversation.push(Message::assistant(action.to_tagged_text()));
                        Some(action)
                    }
                    Ok(Ok(ParsedAction::PlainText { content })) => {
                        debug!(cycle, "Model answered with plain text, no tool call");
                        conversation.push(Message::assistant(content));
                        None
                    }
                    Ok(Err(Error::Protocol(violation))) => {
                        warn!(cycle, %violation, "Reply violated the tool-call protocol");
                        conversation
                            .push(Message::observation(format!("Protocol error: {violation}")));
                        None
                    }
                    Ok(Err(err)) => {
                        warn!(cycle, %err, "Decision request failed");
                        None
                    }
                    Err(_elapsed) => {
                        warn!(
                            cycle,
                            timeout_secs = self.config.decide_timeout_secs,
                            "Decision request timed out"
                        );
                        None
                    }
                };

                match decision {
                    Some(action) => action,
                    None => {
                        // Decision making produced nothing actionable.
                        let plan = fallback::plan(goal);
                        needs_attention |= plan.needs_attention;
                        info!(cycle, tool = ?plan.action.tool_name(), "Applying fallback action");
                        pending_forced = plan.forced_followup;
                        conversation.push(Message::assistant(plan.action.to_tagged_text()));
                        plan.action
                    }
                }
            };

            // Plain text never reaches this point: decision handling above
            // converts it into a fallback action or skips the cycle.
            let ParsedAction::ToolCall { name, arguments } = &action else {
                continue;
            };

            // A finish call ends the run; there is nothing to execute.
            if name == FINISH_TOOL {
                let summary = arguments
                    .get("summary")
                    .cloned()
                    .unwrap_or_else(|| "Run finished.".into());
                info!(cycle, "Run completed");
                return self.report(
                    RunOutcome::Completed { summary },
                    conversation,
                    cycles,
                    needs_attention,
                );
            }

            debug!(cycle, state = ?RunState::Acting, tool = %name, "Executing action");
            let outcome = self.executor.execute(name, arguments).await;

            debug!(cycle, state = ?RunState::Observing, success = outcome.success, "Recording observation");
            let observation = if outcome.success {
                format!("[{name}] {}", outcome.output)
            } else {
                format!("[{name}] ERROR: {}", outcome.output)
            };
            conversation.push(Message::observation(observation.clone()));

            if outcome.success {
                last_failure = None;
                failure_streak = 0;
            } else if let Some(reason) = bump_streak(
                &mut last_failure,
                &mut failure_streak,
                &observation,
                self.config.repeated_failure_limit,
            ) {
                return self.report(
                    RunOutcome::Failed { reason },
                    conversation,
                    cycles,
                    needs_attention,
                );
            }
        }

        info!(max_steps = self.config.max_steps, "Step budget exhausted");
        self.report(
            RunOutcome::Failed {
                reason: format!("step budget of {} exhausted", self.config.max_steps),
            },
            conversation,
            cycles,
            needs_attention,
        )
    }

    fn report(
        &self,
        outcome: RunOutcome,
        conversation: Conversation,
        cycles: u32,
        needs_attention: bool,
    ) -> RunReport {
        RunReport {
            outcome,
            conversation,
            cycles,
            needs_attention,
        }
    }
}

/// Track consecutive identical failures. Returns the terminal reason once
/// the limit is reached.
fn bump_streak(
    last_failure: &mut Option<String>,
    streak: &mut u32,
    observation: &str,
    limit: u32,
) -> Option<String> {
    if last_failure.as_deref() == Some(observation) {
        *streak += 1;
    } else {
        *last_failure = Some(observation.to_string());
        *streak = 1;
    }

    if *streak >= limit {
        Some(format!(
            "same failure repeated {} times: {observation}",
            *streak
        ))
    } else {
        None
    }
}

/// Resolve only when the cancel flag flips to true. Never resolves if the
/// sender is dropped without cancelling.
async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use leadscout_config::GovernorConfig;
    use leadscout_core::action::ActionOutcome;
    use leadscout_core::backend::{ChatBackend, CompletionRequest, RawReply};
    use leadscout_core::error::UpstreamError;
    use leadscout_core::message::Role;
    use leadscout_providers::{ClientOptions, ModelGovernor};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    fn schema() -> ToolSchema {
        ToolSchema::new()
            .tool("navigate", "Open a URL", &["url"], &[])
            .tool(
                "extract_content",
                "Extract page content",
                &["goal"],
                &["format"],
            )
            .tool("finish", "End the run", &[], &["summary"])
    }

    fn agent_config() -> AgentConfig {
        AgentConfig::default()
    }

    fn client(backend: Arc<dyn ChatBackend>) -> CompletionClient {
        CompletionClient::new(
            backend,
            Arc::new(ModelGovernor::new(GovernorConfig::default())),
            ClientOptions {
                default_model: "test-model".into(),
                fallback_models: vec![],
                temperature: 0.0,
                max_tokens: None,
                stream: false,
            },
        )
    }

    fn scheduler(
        backend: Arc<dyn ChatBackend>,
        executor: Arc<dyn ActionExecutor>,
        config: AgentConfig,
    ) -> StepScheduler {
        StepScheduler::new(
            client(backend),
            executor,
            schema(),
            "You research sales leads.",
            config,
        )
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the whole test.
        std::mem::forget(tx);
        rx
    }

    /// Replies from a queue; `<finish>` once the queue runs dry.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn request(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<RawReply, UpstreamError> {
            let text = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "<finish><summary>out of script</summary></finish>".into());
            Ok(RawReply::Complete {
                text,
                model: request.model,
            })
        }
    }

    /// Never answers; every decision cycle times out.
    struct HangingBackend;

    #[async_trait]
    impl ChatBackend for HangingBackend {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn request(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<RawReply, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            Err(UpstreamError::Timeout("unreachable".into()))
        }
    }

    /// Records every executed action and always succeeds.
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
        fn calls(&self) -> Vec<(String, BTreeMap<String, String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(
            &self,
            action: &str,
            arguments: &BTreeMap<String, String>,
        ) -> ActionOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((action.to_string(), arguments.clone()));
            ActionOutcome::ok(format!("{action} done"))
        }
    }

    /// Always fails with the same message.
    struct BrokenExecutor;

    #[async_trait]
    impl ActionExecutor for BrokenExecutor {
        async fn execute(&self, _: &str, _: &BTreeMap<String, String>) -> ActionOutcome {
            ActionOutcome::error("browser crashed")
        }
    }

    #[tokio::test]
    async fn finish_call_completes_the_run() {
        let backend = ScriptedBackend::new(&["<finish><summary>All gathered.</summary></finish>"]);
        let s = scheduler(backend, RecordingExecutor::new(), agent_config());

        let report = s.run("Research https://acme.com", no_cancel()).await;
        assert_eq!(
            report.outcome,
            RunOutcome::Completed {
                summary: "All gathered.".into()
            }
        );
        assert_eq!(report.cycles, 1);
        assert!(!report.needs_attention);
    }

    #[tokio::test]
    async fn actions_execute_and_observations_accumulate() {
        let backend = ScriptedBackend::new(&[
            "<navigate><url>https://acme.com</url></navigate>",
            "<extract_content><goal>find the team page</goal></extract_content>",
            "<finish><summary>done</summary></finish>",
        ]);
        let executor = RecordingExecutor::new();
        let s = scheduler(backend, executor.clone(), agent_config());

        let report = s.run("Research https://acme.com", no_cancel()).await;
        assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
        assert_eq!(report.cycles, 3);

        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "navigate");
        assert_eq!(calls[1].0, "extract_content");

        let observations: Vec<_> = report
            .conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(observations.len(), 2);
        assert!(observations[0].content.contains("navigate done"));
    }

    #[tokio::test(start_paused = true)]
    async fn decision_timeout_triggers_fallback_with_forced_followup() {
        let mut config = agent_config();
        config.max_steps = 2;
        let executor = RecordingExecutor::new();
        let s = scheduler(Arc::new(HangingBackend), executor.clone(), config);

        let report = s.run("go to example.com and analyze it", no_cancel()).await;

        // Cycle 1: timeout -> fallback navigate. Cycle 2: forced extract.
        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "navigate");
        assert_eq!(
            calls[0].1.get("url").map(String::as_str),
            Some("https://example.com")
        );
        assert_eq!(calls[1].0, "extract_content");

        // Budget runs out after the two cycles.
        assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
        assert!(!report.needs_attention);
    }

    #[tokio::test]
    async fn unknown_tool_falls_back_then_recovers() {
        let backend = ScriptedBackend::new(&[
            "<calculator><expr>2+2</expr></calculator>",
            "<finish><summary>recovered</summary></finish>",
        ]);
        let executor = RecordingExecutor::new();
        let s = scheduler(backend, executor.clone(), agent_config());

        let report = s.run("Research https://acme.com", no_cancel()).await;

        // Unknown tool -> fallback navigate, forced extract, then the
        // scripted finish.
        let calls = executor.calls();
        assert_eq!(calls[0].0, "navigate");
        assert_eq!(calls[1].0, "extract_content");
        assert!(matches!(report.outcome, RunOutcome::Completed { .. }));

        // The protocol violation is visible in history.
        assert!(report
            .conversation
            .messages
            .iter()
            .any(|m| m.content.contains("Protocol error")));
    }

    #[tokio::test]
    async fn missing_required_arg_falls_back() {
        let backend = ScriptedBackend::new(&[
            "<navigate></navigate>",
            "<finish><summary>ok</summary></finish>",
        ]);
        let executor = RecordingExecutor::new();
        let s = scheduler(backend, executor.clone(), agent_config());

        let report = s.run("Look at https://acme.com", no_cancel()).await;
        assert!(matches!(report.outcome, RunOutcome::Completed { .. }));

        // The fallback navigate carries the URL the model omitted.
        let calls = executor.calls();
        assert_eq!(
            calls[0].1.get("url").map(String::as_str),
            Some("https://acme.com")
        );
    }

    #[tokio::test]
    async fn plain_text_reply_falls_back() {
        let backend = ScriptedBackend::new(&[
            "I think we should probably look at their website first.",
            "<finish><summary>ok</summary></finish>",
        ]);
        let executor = RecordingExecutor::new();
        let s = scheduler(backend, executor.clone(), agent_config());

        let report = s.run("Research https://acme.com", no_cancel()).await;
        assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
        assert_eq!(executor.calls()[0].0, "navigate");
    }

    #[tokio::test]
    async fn repeated_identical_failures_end_the_run() {
        let backend = ScriptedBackend::new(&[
            "<navigate><url>https://acme.com</url></navigate>",
            "<navigate><url>https://acme.com</url></navigate>",
            "<navigate><url>https://acme.com</url></navigate>",
            "<navigate><url>https://acme.com</url></navigate>",
        ]);
        let s = scheduler(backend, Arc::new(BrokenExecutor), agent_config());

        let report = s.run("Research https://acme.com", no_cancel()).await;
        match report.outcome {
            RunOutcome::Failed { reason } => {
                assert!(reason.contains("repeated"));
                assert!(reason.contains("browser crashed"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        // Default limit is 3 identical failures.
        assert_eq!(report.cycles, 3);
    }

    #[tokio::test]
    async fn goal_without_url_flags_attention() {
        let backend = ScriptedBackend::new(&[
            "just chatting, no tool call here",
            "<finish><summary>wrapped up</summary></finish>",
        ]);
        let s = scheduler(backend, RecordingExecutor::new(), agent_config());

        let report = s.run("Summarize our pipeline health", no_cancel()).await;
        assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
        assert!(report.needs_attention);
    }

    #[tokio::test]
    async fn step_budget_exhaustion_keeps_history() {
        let mut config = agent_config();
        config.max_steps = 2;
        let backend = ScriptedBackend::new(&[
            "<navigate><url>https://acme.com</url></navigate>",
            "<navigate><url>https://acme.com/about</url></navigate>",
        ]);
        let s = scheduler(backend, RecordingExecutor::new(), config);

        let report = s.run("Research https://acme.com", no_cancel()).await;
        match report.outcome {
            RunOutcome::Failed { reason } => assert!(reason.contains("step budget")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(report.cycles, 2);
        // Partial history survives: goal + 2 decisions + 2 observations.
        assert_eq!(report.conversation.messages.len(), 5);
    }

    #[tokio::test]
    async fn pre_cancelled_run_does_nothing() {
        let (tx, rx) = watch::channel(true);
        let executor = RecordingExecutor::new();
        let s = scheduler(
            ScriptedBackend::new(&["<finish></finish>"]),
            executor.clone(),
            agent_config(),
        );

        let report = s.run("Research https://acme.com", rx).await;
        drop(tx);
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_decision_stops_the_run() {
        let (tx, rx) = watch::channel(false);
        let s = scheduler(
            Arc::new(HangingBackend),
            RecordingExecutor::new(),
            agent_config(),
        );

        let run = tokio::spawn(async move { s.run("Research https://acme.com", rx).await });

        // Let the run enter its decision await, then cancel.
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let report = run.await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
    }

    #[test]
    fn streak_resets_on_different_failure() {
        let mut last = None;
        let mut streak = 0;
        assert!(bump_streak(&mut last, &mut streak, "a", 3).is_none());
        assert!(bump_streak(&mut last, &mut streak, "a", 3).is_none());
        assert!(bump_streak(&mut last, &mut streak, "b", 3).is_none());
        assert!(bump_streak(&mut last, &mut streak, "b", 3).is_none());
        assert!(bump_streak(&mut last, &mut streak, "b", 3).is_some());
    }
}
