//! Deterministic fallback policy.
//!
//! When a decision cycle produces no actionable tool call (upstream timeout,
//! protocol violation, plain chatter), the scheduler consults this policy
//! instead of retrying blindly. The plan is derived from the goal text
//! alone, so the same goal always yields the same fallback behavior.

use leadscout_core::action::ParsedAction;

/// Goal words that signal the user wants something read or analyzed, not
/// just visited.
const INTENT_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "research", "summarize", "summarise", "extract", "read", "review",
    "look", "find", "check", "investigate", "gather", "learn", "study",
];

/// What the scheduler should do when decision making failed this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPlan {
    /// The action to execute now.
    pub action: ParsedAction,
    /// An action to force on the next cycle, before any model decision.
    pub forced_followup: Option<ParsedAction>,
    /// Whether the run should be flagged for human attention.
    pub needs_attention: bool,
}

/// Build a fallback plan from the goal text.
///
/// A goal carrying both a URL-like token and an analysis intent yields a
/// `navigate` to the URL with a forced `extract_content` follow-up, so the
/// navigate-then-read sequence completes even if the model never answers
/// again. Anything else gets a no-op `status` action and an attention flag:
/// there is nothing deterministic to do for such a goal.
pub fn plan(goal: &str) -> FallbackPlan {
    let url = locate_url(goal);
    let intent = has_intent(goal);

    match url {
        Some(url) if intent => FallbackPlan {
            action: ParsedAction::tool_call("navigate", [("url", url.as_str())]),
            forced_followup: Some(ParsedAction::tool_call(
                "extract_content",
                [("goal", goal)],
            )),
            needs_attention: false,
        },
        _ => FallbackPlan {
            action: ParsedAction::tool_call(
                "status",
                [(
                    "message",
                    "decision making failed and the goal offers no deterministic next step",
                )],
            ),
            forced_followup: None,
            needs_attention: true,
        },
    }
}

fn has_intent(goal: &str) -> bool {
    let lowered = goal.to_ascii_lowercase();
    INTENT_KEYWORDS
        .iter()
        .any(|kw| lowered.split(|c: char| !c.is_ascii_alphabetic()).any(|w| w == *kw))
}

/// Find the first URL-looking token in the goal text.
///
/// Accepts explicit `http(s)://` URLs, `www.` hosts, and bare domains like
/// `example.com` (all normalized to https). Trailing sentence punctuation
/// is stripped.
pub fn locate_url(goal: &str) -> Option<String> {
    for token in goal.split_whitespace() {
        let token = token.trim_matches(|c: char| matches!(c, ',' | ';' | ')' | '(' | '"' | '\''));
        let token = token.trim_end_matches(['.', '!', '?']);

        if token.starts_with("http://") || token.starts_with("https://") {
            return Some(token.to_string());
        }
        if token.starts_with("www.") || looks_like_domain(token) {
            return Some(format!("https://{token}"));
        }
    }
    None
}

/// A bare-domain heuristic: dotted labels of hostname characters with an
/// alphabetic final label, optionally followed by a path.
fn looks_like_domain(token: &str) -> bool {
    let host = token.split('/').next().unwrap_or(token);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    tld_ok
        && labels.iter().all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
