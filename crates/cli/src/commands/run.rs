//! `leadscout run` — Execute a research run for a goal.
//!
//! The CLI ships a dry-run executor: decided actions are printed instead of
//! driving a real browser or CRM. Embedding applications supply their own
//! [`ActionExecutor`] with real capabilities.

use async_trait::async_trait;
use leadscout_agent::{RunOutcome, StepScheduler};
use leadscout_config::AppConfig;
use leadscout_core::action::ActionOutcome;
use leadscout_core::executor::ActionExecutor;
use leadscout_core::message::Role;
use leadscout_core::schema::ToolSchema;
use leadscout_providers::{ClientOptions, CompletionClient, ModelGovernor, OpenRouterBackend};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

const PERSONA: &str = "You are LeadScout, an autonomous research agent. You investigate \
                       companies and people on the web to qualify sales leads. Work step \
                       by step: one tool call per reply, then wait for the observation.";

/// Prints actions instead of executing them.
struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, action: &str, arguments: &BTreeMap<String, String>) -> ActionOutcome {
        println!("→ [dry-run] {action} {arguments:?}");
        ActionOutcome::ok(format!(
            "(dry run) '{action}' acknowledged; no real browser is attached"
        ))
    }
}

/// The tool vocabulary the CLI advertises to the model.
fn research_schema() -> ToolSchema {
    ToolSchema::new()
        .tool(
            "navigate",
            "Open a URL in the research browser.",
            &["url"],
            &[],
        )
        .tool(
            "extract_content",
            "Read the current page and extract the information described by the goal.",
            &["goal"],
            &["format"],
        )
        .tool(
            "search",
            "Run a web search and list the top results.",
            &["query"],
            &[],
        )
        .tool(
            "finish",
            "End the run with a summary of findings.",
            &[],
            &["summary"],
        )
}

pub async fn run(goal: &str, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let api_key = config.resolve_api_key()?;

    let backend = OpenRouterBackend::new(config.provider.clone(), config.base_url.clone(), api_key)?;
    let governor = Arc::new(ModelGovernor::new(config.governor.clone()));
    let client = CompletionClient::new(
        Arc::new(backend),
        governor.clone(),
        ClientOptions {
            default_model: config.default_model.clone(),
            fallback_models: config.fallback_models.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            stream: true,
        },
    );

    let scheduler = StepScheduler::new(
        client,
        Arc::new(DryRunExecutor),
        research_schema(),
        PERSONA,
        config.agent.clone(),
    );

    // Ctrl-C flips the cancel flag; the scheduler winds down at the next
    // check instead of being killed mid-cycle.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    info!(model = %config.default_model, "Starting research run");
    let report = scheduler.run(goal, cancel_rx).await;

    println!();
    match &report.outcome {
        RunOutcome::Completed { summary } => {
            println!("✅ Run completed in {} cycle(s)", report.cycles);
            println!("\n{summary}");
        }
        RunOutcome::Failed { reason } => {
            println!("❌ Run failed after {} cycle(s): {reason}", report.cycles);
        }
        RunOutcome::Cancelled => {
            println!("🛑 Run cancelled after {} cycle(s)", report.cycles);
        }
    }

    if report.needs_attention {
        println!("\n⚠️  This run needs attention: the goal gave the fallback policy");
        println!("   nothing deterministic to do. Consider including a URL in the goal.");
    }

    let observations = report
        .conversation
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .count();
    println!(
        "\nHistory: {} message(s), {} observation(s)",
        report.conversation.messages.len(),
        observations
    );

    let stats = governor.stats();
    if !stats.is_empty() {
        println!("\nModel health:");
        for s in stats {
            println!(
                "  {} — {} ok / {} failed{}",
                s.model,
                s.successes,
                s.failures,
                s.blocked_for
                    .map(|d| format!(" (cooling down {}s)", d.as_secs()))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}
