//! Component J — Supervisor: reviews a round of worker outputs and renders
//! an approve/revise/reject decision. Grounded on
//! `original_source/backend/app/agents/supervisor.py`: the truncation
//! constants, the fenced-json-then-brace-substring parse chain, and the
//! default-to-revise behavior on an unparseable response are all carried
//! over verbatim; only the surrounding plumbing (provider call, retry) is
//! reshaped into this crate's `Provider` trait.

use engine_providers::{ChatMessage, CompletionRequest, Provider, ProviderError};
use engine_types::{SupervisorDecision, SupervisorReview, Task};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

/// Per-worker output is truncated before being handed to the supervisor
/// prompt, and the concatenation of all of them is truncated again.
const MAX_OUTPUT_PER_WORKER: usize = 4000;
const MAX_TOTAL_OUTPUT: usize = 12000;

const SUPERVISOR_SYSTEM_PROMPT: &str = "You are a supervisor reviewing the combined output of a team \
of worker agents against the original task. Respond with a JSON object of the \
shape {\"decision\": \"approve\" | \"revise\" | \"reject\", \"feedback\": \"...\"}.";

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    decision: String,
    #[serde(default)]
    feedback: String,
}

/// Build the supervisor's view of a revision round: the task description
/// plus every current-round worker output, each truncated individually and
/// then truncated again as a whole (source's `_build_review_prompt`).
fn build_review_prompt(task: &Task) -> String {
    let mut sections = Vec::new();
    for output in task.current_round_outputs() {
        let truncated = smart_truncate(&output.output, MAX_OUTPUT_PER_WORKER);
        sections.push(format!("### {}\n{}", output.agent_name, truncated));
    }
    let combined = sections.join("\n\n");
    let combined = smart_truncate(&combined, MAX_TOTAL_OUTPUT);

    format!(
        "Original task: {}\n\nWorker outputs this round:\n\n{}",
        task.description, combined
    )
}

/// Truncate to at most `limit` characters, preferring to cut at the last
/// whitespace boundary before the limit so words aren't split mid-token.
fn smart_truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    match truncated.rfind(char::is_whitespace) {
        Some(idx) if idx > limit / 2 => format!("{}...", &truncated[..idx]),
        _ => format!("{truncated}..."),
    }
}

/// Ask the supervisor's provider to review the current revision round and
/// return a decision. Never fails the task on a transport error for the
/// review itself; a provider error here surfaces as `ProviderError` to the
/// caller, which treats it like any other worker-side failure per spec §7.
pub async fn review(
    provider: Arc<dyn Provider>,
    model: &str,
    api_key: Option<&str>,
    task: &Task,
) -> Result<SupervisorReview, ProviderError> {
    let prompt = build_review_prompt(task);
    let request = CompletionRequest {
        system_prompt: SUPERVISOR_SYSTEM_PROMPT.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        model: model.to_string(),
    };

    let content = provider.complete(request, api_key).await?;
    let decision = parse_decision(&content.to_text(), task.current_revision);
    Ok(decision)
}

/// Parse the supervisor's raw reply into a decision. Tries, in order: a
/// fenced ```json ... ``` block, then the first top-level `{...}` substring,
/// then gives up and defaults to `revise` with an explanatory feedback
/// string — a parse failure should never crash the review round (spec §7
/// item 4, resolved open question (b)).
fn parse_decision(raw: &str, revision: u32) -> SupervisorReview {
    let parsed = extract_fenced_json(raw)
        .or_else(|| extract_brace_substring(raw))
        .and_then(|candidate| serde_json::from_str::<DecisionPayload>(&candidate).ok());

    let (decision, feedback) = match parsed {
        Some(payload) => match payload.decision.to_lowercase().as_str() {
            "approve" => (SupervisorDecision::Approve, payload.feedback),
            "reject" => (SupervisorDecision::Reject, payload.feedback),
            "revise" => (SupervisorDecision::Revise, payload.feedback),
            other => (
                SupervisorDecision::Revise,
                format!("Unrecognized decision '{other}', defaulting to revise."),
            ),
        },
        None => (
            SupervisorDecision::Revise,
            "Could not parse supervisor response into a decision.".to_string(),
        ),
    };

    SupervisorReview { decision, feedback, revision, created_at: chrono::Utc::now() }
}

fn extract_fenced_json(raw: &str) -> Option<String> {
    let re = Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").ok()?;
    re.captures(raw).map(|c| c[1].to_string())
}

fn extract_brace_substring(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::WorkerOutput;

    fn task_with_output(text: &str) -> Task {
        let mut task = Task::new_root("build a thing", vec!["w1".into()]);
        task.worker_outputs.push(WorkerOutput {
            agent_id: "w1".into(),
            agent_name: "Worker One".into(),
            output: text.to_string(),
            revision: 0,
            created_at: chrono::Utc::now(),
        });
        task
    }

    #[test]
    fn parses_fenced_json_decision() {
        let raw = "Here is my review:\n```json\n{\"decision\": \"approve\", \"feedback\": \"looks good\"}\n```";
        let review = parse_decision(raw, 0);
        assert_eq!(review.decision, SupervisorDecision::Approve);
        assert_eq!(review.feedback, "looks good");
    }

    #[test]
    fn parses_bare_brace_substring() {
        let raw = "decision: {\"decision\": \"revise\", \"feedback\": \"add tests\"} thanks";
        let review = parse_decision(raw, 1);
        assert_eq!(review.decision, SupervisorDecision::Revise);
        assert_eq!(review.feedback, "add tests");
    }

    #[test]
    fn unparseable_response_defaults_to_revise() {
        let review = parse_decision("not json at all", 2);
        assert_eq!(review.decision, SupervisorDecision::Revise);
        assert!(review.feedback.contains("Could not parse"));
    }

    #[test]
    fn review_prompt_truncates_long_worker_output() {
        let long_output = "word ".repeat(2000);
        let task = task_with_output(&long_output);
        let prompt = build_review_prompt(&task);
        assert!(prompt.len() < long_output.len());
        assert!(prompt.contains("Worker One"));
    }

    #[test]
    fn smart_truncate_respects_limit_and_adds_ellipsis() {
        let text = "a".repeat(100);
        let truncated = smart_truncate(&text, 20);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 24);
    }
}
