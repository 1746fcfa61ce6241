//! Component I — Worker Executor: parallel fan-out with per-agent status
//! bookkeeping and error isolation (spec §4.2). Grounded on
//! `original_source/backend/app/agents/graph.py`'s `dispatch_workers`
//! (`asyncio.gather` over one coroutine per agent, status set to busy then
//! always restored to idle in a `finally`) and the provider-transport retry
//! policy of spec §7 item 2.

use std::sync::Arc;
use std::time::Duration;

use engine_core::{AgentService, RateLimiter};
use engine_providers::{ChatMessage, CompletionRequest, Provider, ProviderError, ProviderRegistry};
use engine_types::{preview, Agent, AgentStatus, EngineEvent, EventEnvelope, RequestContext, Task};
use futures::future::join_all;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);

/// One worker's resolved output, prior to being stamped with a revision and
/// timestamp and appended to the task record (spec §4.2's public contract).
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub agent_id: String,
    pub agent_name: String,
    pub output: String,
}

pub struct DispatchDeps<'a> {
    pub agents: &'a AgentService,
    pub providers: &'a ProviderRegistry,
    pub rate_limiter: &'a RateLimiter,
    pub event_bus: &'a engine_core::EventBus,
    pub ctx: &'a RequestContext,
}

/// Run every assigned agent concurrently against its configured provider.
/// Unknown agent ids are skipped with a warning, not an error (spec §4.2).
/// Each worker's failure is captured into its own `WorkerResult` — one
/// broken worker never aborts the round (spec §7 item 3).
pub async fn dispatch_workers(
    deps: &DispatchDeps<'_>,
    task: &Task,
    revision: u32,
    feedback: &str,
) -> Vec<WorkerResult> {
    let futures = task
        .assigned_agents
        .iter()
        .map(|agent_id| run_single_worker(deps, task, agent_id.as_str(), revision, feedback));
    join_all(futures).await.into_iter().flatten().collect()
}

async fn run_single_worker(
    deps: &DispatchDeps<'_>,
    task: &Task,
    agent_id: &str,
    revision: u32,
    feedback: &str,
) -> Option<WorkerResult> {
    let agent = match deps.agents.get(agent_id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            tracing::warn!(agent_id, "assigned agent not found, skipping");
            return None;
        }
        Err(err) => {
            tracing::warn!(agent_id, error = %err, "failed to load assigned agent, skipping");
            return None;
        }
    };

    let _ = deps.agents.set_status(agent_id, AgentStatus::Busy).await;

    let result = invoke_worker(deps, &agent, task, revision, feedback).await;

    let (output, final_status) = match result {
        Ok(text) => (text, AgentStatus::Idle),
        Err(err) => (format!("Error: {err}"), AgentStatus::Error),
    };

    // Mirror the source's try/except/finally: set error on failure, then
    // always restore idle before returning, success or failure alike.
    if final_status == AgentStatus::Error {
        let _ = deps.agents.set_status(agent_id, AgentStatus::Error).await;
    }
    let _ = deps.agents.set_status(agent_id, AgentStatus::Idle).await;

    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::WorkerOutput {
            task_id: task.id.clone(),
            output: engine_types::WorkerOutput {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                output: output.clone(),
                revision,
                created_at: chrono::Utc::now(),
            },
            preview: preview(&output),
        }))
        .await;

    Some(WorkerResult { agent_id: agent.id, agent_name: agent.name, output })
}

async fn invoke_worker(
    deps: &DispatchDeps<'_>,
    agent: &Agent,
    task: &Task,
    revision: u32,
    feedback: &str,
) -> Result<String, ProviderError> {
    let provider = deps
        .providers
        .get(&agent.provider_id)
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let mut message = task.description.clone();
    if revision > 0 && !feedback.is_empty() {
        message.push_str("\n\nRevision feedback: ");
        message.push_str(feedback);
    }

    let request = CompletionRequest {
        system_prompt: agent.system_prompt.clone(),
        messages: vec![ChatMessage::user(message)],
        model: agent.model_id.clone(),
    };

    let api_key = deps.ctx.key_for(&agent.provider_id, None);
    if let Some(key) = &api_key {
        deps.rate_limiter.acquire(&agent.provider_id, key).await;
    } else {
        deps.rate_limiter.acquire(&agent.provider_id, "default").await;
    }

    let content = retry_with_backoff(provider, request, api_key.as_deref()).await?;
    Ok(content.to_text())
}

/// Retry a provider call with exponential backoff: 3 attempts, 1s base,
/// 30s cap (spec §7 item 2). Retries never cross FSM boundaries — this is
/// the entire retry budget for a single worker invocation.
async fn retry_with_backoff(
    provider: Arc<dyn Provider>,
    request: CompletionRequest,
    api_key: Option<&str>,
) -> Result<engine_types::Content, ProviderError> {
    let mut attempt = 0;
    let mut delay = RETRY_BASE;
    loop {
        attempt += 1;
        match provider.complete(request.clone(), api_key).await {
            Ok(content) => return Ok(content),
            Err(err) if attempt < RETRY_ATTEMPTS => {
                tracing::warn!(attempt, error = %err, "provider call failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_CAP);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{AgentService, EventBus, InMemoryAgentRepository, RateLimiter};
    use engine_providers::{ProviderRegistry, Scripted, ScriptedProvider};
    use engine_types::AgentRole;

    async fn setup() -> (AgentService, ProviderRegistry, RateLimiter, engine_core::EventBus) {
        let agents = AgentService::new(Arc::new(InMemoryAgentRepository::new()));
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(ScriptedProvider::new("stub", vec![Scripted::text("hello")])));
        let rate_limiter = RateLimiter::new(6000);
        let bus = EventBus::with_capacity(16);
        (agents, providers, rate_limiter, bus)
    }

    #[tokio::test]
    async fn dispatch_runs_known_agents_and_restores_idle() {
        let (agents, providers, rate_limiter, bus) = setup().await;
        let agent = agents
            .create("Worker1".into(), AgentRole::Worker, String::new(), "stub".into(), "m".into())
            .await
            .unwrap();
        let ctx = RequestContext::default();
        let deps = DispatchDeps { agents: &agents, providers: &providers, rate_limiter: &rate_limiter, event_bus: &bus, ctx: &ctx };
        let task = Task::new_root("do the thing", vec![agent.id.clone()]);

        let results = dispatch_workers(&deps, &task, 0, "").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "hello");
        assert_eq!(agents.get(&agent.id).await.unwrap().unwrap().status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn unknown_agent_is_skipped_not_fatal() {
        let (agents, providers, rate_limiter, bus) = setup().await;
        let ctx = RequestContext::default();
        let deps = DispatchDeps { agents: &agents, providers: &providers, rate_limiter: &rate_limiter, event_bus: &bus, ctx: &ctx };
        let task = Task::new_root("do the thing", vec!["missing".to_string()]);

        let results = dispatch_workers(&deps, &task, 0, "").await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_captured_not_propagated() {
        let agents = AgentService::new(Arc::new(InMemoryAgentRepository::new()));
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(ScriptedProvider::new(
            "stub",
            vec![Scripted::Fail("boom".into()), Scripted::Fail("boom".into()), Scripted::Fail("boom".into())],
        )));
        let rate_limiter = RateLimiter::new(6000);
        let bus = EventBus::with_capacity(16);
        let agent = agents
            .create("WorkerB".into(), AgentRole::Worker, String::new(), "stub".into(), "m".into())
            .await
            .unwrap();
        let ctx = RequestContext::default();
        let deps = DispatchDeps { agents: &agents, providers: &providers, rate_limiter: &rate_limiter, event_bus: &bus, ctx: &ctx };
        let task = Task::new_root("do the thing", vec![agent.id.clone()]);

        let results = dispatch_workers(&deps, &task, 0, "").await;
        assert_eq!(results.len(), 1);
        assert!(results[0].output.starts_with("Error:"));
        assert_eq!(agents.get(&agent.id).await.unwrap().unwrap().status, AgentStatus::Idle);
    }
}
