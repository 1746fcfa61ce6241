//! Component H — Orchestration State Machine (spec §4.1). A fixed,
//! hand-rolled FSM rather than a generic graph library (spec §9): the
//! topology never varies, so encoding it directly as a loop with an
//! explicit routing predicate is simpler to read and test than a
//! compiled-graph abstraction would be.

use std::sync::Arc;
use std::time::Duration;

use engine_core::{AgentService, EngineError, EventBus, RateLimiter, TaskLocks, TaskRepository};
use engine_observability::{emit_event, ObservabilityEvent};
use engine_providers::ProviderRegistry;
use engine_types::{
    EngineEvent, EventEnvelope, RequestContext, SupervisorDecision, SupervisorReview, Task,
    TaskStatus,
};
use tokio::sync::oneshot;
use tracing::Level;

use crate::interrupt::InterruptController;
use crate::worker_executor::{self, DispatchDeps};
use crate::{supervisor, TaskServiceError};

/// Everything a single FSM run needs, bundled so the function signatures
/// stay readable. Cloneable: every field is itself `Arc`-backed or `Clone`.
#[derive(Clone)]
pub struct FsmDeps {
    pub tasks: Arc<dyn TaskRepository>,
    pub agents: AgentService,
    pub providers: ProviderRegistry,
    pub rate_limiter: RateLimiter,
    pub event_bus: EventBus,
    pub task_locks: TaskLocks,
    pub interrupt: Arc<dyn InterruptController>,
    pub graph_timeout: Duration,
    pub max_revisions: u32,
}

/// The terminal result of routing a review: which branch of §4.1's graph
/// the FSM took.
#[derive(Clone, Copy)]
enum Route {
    Approve,
    Reject,
    Revise,
}

/// Given the decision that applies to this round and the revision budget,
/// pick the next graph edge (spec §4.1's routing predicate).
fn route(review: &SupervisorReview, current_revision: u32, max_revisions: u32) -> Route {
    match review.decision {
        SupervisorDecision::Approve => Route::Approve,
        SupervisorDecision::Reject => Route::Reject,
        SupervisorDecision::Revise if current_revision >= max_revisions => Route::Approve,
        SupervisorDecision::Revise => Route::Revise,
    }
}

fn obs_event<'a>(event: &'a str, task_id: &'a str, revision: u32, detail: Option<&'a str>) -> ObservabilityEvent<'a> {
    ObservabilityEvent {
        event,
        component: "orchestrator",
        task_id: Some(task_id),
        agent_id: None,
        revision: Some(revision),
        provider_id: None,
        model_id: None,
        status: None,
        error_code: None,
        detail,
    }
}

/// Entry point: run the FSM for `task_id` to a terminal (or suspended)
/// state, under the global deadline (spec §4.1's "Global timeout").
pub async fn run(deps: &FsmDeps, task_id: &str, ctx: RequestContext) -> Result<(), TaskServiceError> {
    match tokio::time::timeout(deps.graph_timeout, run_inner(deps, task_id, &ctx)).await {
        Ok(result) => result,
        Err(_) => {
            fail_task(deps, task_id, format!(
                "task timed out after {}s",
                deps.graph_timeout.as_secs()
            ))
            .await;
            Err(TaskServiceError::Engine(EngineError::TaskTimeout(deps.graph_timeout.as_secs())))
        }
    }
}

async fn run_inner(
    deps: &FsmDeps,
    task_id: &str,
    ctx: &RequestContext,
) -> Result<(), TaskServiceError> {
    loop {
        let mut task = load_task(deps, task_id).await?;

        dispatch_round(deps, &mut task, ctx).await?;

        let review = run_review(deps, &task).await?;
        persist_review(deps, &mut task, review.clone()).await?;

        let mut ack: Option<oneshot::Sender<()>> = None;
        let effective_review = if task.requires_human_approval {
            match suspend_for_human_approval(deps, &mut task).await? {
                Some((review, ack_tx)) => {
                    ack = Some(ack_tx);
                    review
                }
                None => {
                    // Durable suspension: task left in `pending_human_approval`,
                    // this runner exits without finalizing. Resume happens via
                    // `resume_after_human_decision`.
                    return Ok(());
                }
            }
        } else {
            review
        };

        let route_taken = route(&effective_review, task.current_revision, deps.max_revisions);
        if matches!(route_taken, Route::Approve)
            && effective_review.decision == SupervisorDecision::Revise
        {
            emit_event(
                Level::INFO,
                obs_event(
                    "revision_budget_exhausted_forces_approve",
                    task_id,
                    task.current_revision,
                    Some(&format!("max_revisions={}", deps.max_revisions)),
                ),
            );
        }

        // Apply the route's action first, then ack the suspended submitter
        // (if any) so `approve` only returns once the task record reflects
        // the decision — otherwise `approve`'s caller can observe the
        // still-`pending_human_approval` task (a race between the oneshot
        // wakeup and this task actually finishing the write).
        let outcome = match route_taken {
            Route::Approve => finalize_approved(deps, &mut task).await,
            Route::Reject => finalize_rejected(deps, &mut task, &effective_review).await,
            Route::Revise => advance_revision(deps, &mut task).await,
        };
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        outcome?;

        match route_taken {
            Route::Approve | Route::Reject => return Ok(()),
            Route::Revise => continue,
        }
    }
}

/// Resume a durably-suspended task with a human decision arriving from a
/// (possibly new) process. Applies the decision, routes, and either
/// finalizes or re-enters the dispatch/review loop for another round.
pub async fn resume_after_human_decision(
    deps: &FsmDeps,
    task_id: &str,
    review: SupervisorReview,
    ctx: RequestContext,
) -> Result<(), TaskServiceError> {
    let mut task = load_task(deps, task_id).await?;
    if task.status != TaskStatus::PendingHumanApproval {
        return Err(TaskServiceError::Engine(EngineError::validation(format!(
            "task {task_id} is not pending human approval"
        ))));
    }

    persist_review(deps, &mut task, review.clone()).await?;
    emit_event(
        Level::INFO,
        obs_event("human_decision_applied", task_id, task.current_revision, Some("durable resume")),
    );

    match route(&review, task.current_revision, deps.max_revisions) {
        Route::Approve => finalize_approved(deps, &mut task).await,
        Route::Reject => finalize_rejected(deps, &mut task, &review).await,
        Route::Revise => {
            advance_revision(deps, &mut task).await?;
            run_inner(deps, task_id, &ctx).await
        }
    }
}

async fn load_task(deps: &FsmDeps, task_id: &str) -> Result<Task, TaskServiceError> {
    deps.tasks
        .get(task_id)
        .await
        .map_err(|e| TaskServiceError::Engine(EngineError::Fatal(e.to_string())))?
        .ok_or_else(|| TaskServiceError::Engine(EngineError::not_found(format!("task {task_id}"))))
}

async fn save_task(deps: &FsmDeps, task: Task) -> Result<Task, TaskServiceError> {
    deps.tasks
        .save(task)
        .await
        .map_err(|e| TaskServiceError::Engine(EngineError::Fatal(e.to_string())))
}

async fn dispatch_round(
    deps: &FsmDeps,
    task: &mut Task,
    ctx: &RequestContext,
) -> Result<(), TaskServiceError> {
    task.status = TaskStatus::Running;
    *task = save_task(deps, task.clone()).await?;
    emit_event(
        Level::INFO,
        obs_event(
            "dispatch_round_started",
            &task.id,
            task.current_revision,
            Some(&format!("{} assigned agents", task.assigned_agents.len())),
        ),
    );

    let feedback = task
        .supervisor_reviews
        .iter()
        .rev()
        .find(|r| r.revision + 1 == task.current_revision)
        .map(|r| r.feedback.clone())
        .unwrap_or_default();

    let dispatch_deps = DispatchDeps {
        agents: &deps.agents,
        providers: &deps.providers,
        rate_limiter: &deps.rate_limiter,
        event_bus: &deps.event_bus,
        ctx,
    };
    let results = worker_executor::dispatch_workers(
        &dispatch_deps,
        task,
        task.current_revision,
        &feedback,
    )
    .await;

    let _guard = deps.task_locks.acquire(&task.id).await;
    let mut fresh = load_task(deps, &task.id).await?;
    for result in results {
        fresh.worker_outputs.push(engine_types::WorkerOutput {
            agent_id: result.agent_id,
            agent_name: result.agent_name,
            output: result.output,
            revision: fresh.current_revision,
            created_at: chrono::Utc::now(),
        });
    }
    fresh.status = TaskStatus::UnderReview;
    fresh.touch();
    let worker_output_count = fresh.current_round_outputs().len();
    *task = save_task(deps, fresh).await?;

    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::TaskUpdate {
            task_id: task.id.clone(),
            status: "under_review".to_string(),
            reason: "worker round complete".to_string(),
        }))
        .await;
    emit_event(
        Level::INFO,
        obs_event(
            "dispatch_round_finished",
            &task.id,
            task.current_revision,
            Some(&format!("{worker_output_count} worker outputs")),
        ),
    );

    Ok(())
}

async fn run_review(deps: &FsmDeps, task: &Task) -> Result<SupervisorReview, TaskServiceError> {
    let first_agent_id = task.assigned_agents.first();
    let Some(first_agent_id) = first_agent_id else {
        return Ok(SupervisorReview {
            decision: SupervisorDecision::Approve,
            feedback: "no assigned agents; defaulting to approve".to_string(),
            revision: task.current_revision,
            created_at: chrono::Utc::now(),
        });
    };

    let Ok(Some(agent)) = deps.agents.get(first_agent_id).await else {
        return Ok(SupervisorReview {
            decision: SupervisorDecision::Approve,
            feedback: "assigned agent missing; defaulting to approve".to_string(),
            revision: task.current_revision,
            created_at: chrono::Utc::now(),
        });
    };

    let provider = match deps.providers.get(&agent.provider_id) {
        Ok(provider) => provider,
        Err(_) => {
            return Ok(SupervisorReview {
                decision: SupervisorDecision::Revise,
                feedback: "supervisor provider unavailable".to_string(),
                revision: task.current_revision,
                created_at: chrono::Utc::now(),
            })
        }
    };

    match supervisor::review(provider, &agent.model_id, None, task).await {
        Ok(review) => Ok(review),
        Err(err) => Ok(SupervisorReview {
            decision: SupervisorDecision::Revise,
            feedback: format!("supervisor call failed: {err}"),
            revision: task.current_revision,
            created_at: chrono::Utc::now(),
        }),
    }
}

async fn persist_review(
    deps: &FsmDeps,
    task: &mut Task,
    review: SupervisorReview,
) -> Result<(), TaskServiceError> {
    let _guard = deps.task_locks.acquire(&task.id).await;
    let mut fresh = load_task(deps, &task.id).await?;
    fresh.supervisor_reviews.push(review.clone());
    fresh.touch();
    *task = save_task(deps, fresh).await?;

    emit_event(
        Level::INFO,
        obs_event(
            "supervisor_review_parsed",
            &task.id,
            review.revision,
            Some(&format!("decision={:?}", review.decision)),
        ),
    );
    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::SupervisorReview {
            task_id: task.id.clone(),
            review,
        }))
        .await;
    Ok(())
}

/// Applies the human-approval branch. Returns `Some((review, ack))` to keep
/// driving the loop in-process — `ack` must be fired once the route this
/// review leads to has been fully applied — or `None` when the runner must
/// exit because suspension is durable (resumption happens out-of-band).
async fn suspend_for_human_approval(
    deps: &FsmDeps,
    task: &mut Task,
) -> Result<Option<(SupervisorReview, oneshot::Sender<()>)>, TaskServiceError> {
    {
        let _guard = deps.task_locks.acquire(&task.id).await;
        let mut fresh = load_task(deps, &task.id).await?;
        fresh.status = TaskStatus::PendingHumanApproval;
        fresh.touch();
        *task = save_task(deps, fresh).await?;
    }

    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::HumanApprovalRequired {
            task_id: task.id.clone(),
            revision: task.current_revision,
        }))
        .await;
    emit_event(
        Level::INFO,
        obs_event("human_approval_requested", &task.id, task.current_revision, None),
    );

    if deps.interrupt.is_durable() {
        return Ok(None);
    }

    let (human_review, ack) = deps.interrupt.suspend(&task.id).await;
    // Append-only per DESIGN.md's resolved open question (a): the human
    // decision is a new review, the supervisor's is preserved as history.
    persist_review(deps, task, human_review.clone()).await?;
    emit_event(
        Level::INFO,
        obs_event("human_decision_applied", &task.id, task.current_revision, Some("in-process resume")),
    );
    Ok(Some((human_review, ack)))
}

async fn advance_revision(deps: &FsmDeps, task: &mut Task) -> Result<(), TaskServiceError> {
    let _guard = deps.task_locks.acquire(&task.id).await;
    let mut fresh = load_task(deps, &task.id).await?;
    fresh.current_revision += 1;
    fresh.status = TaskStatus::Revision;
    fresh.touch();
    *task = save_task(deps, fresh).await?;

    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::Log {
            level: "info".to_string(),
            message: format!("task {} starting revision round {}", task.id, task.current_revision),
        }))
        .await;
    Ok(())
}

async fn finalize_approved(deps: &FsmDeps, task: &mut Task) -> Result<(), TaskServiceError> {
    let _guard = deps.task_locks.acquire(&task.id).await;
    let mut fresh = load_task(deps, &task.id).await?;
    let final_output = fresh
        .current_round_outputs()
        .into_iter()
        .map(|wo| wo.output.clone())
        .collect::<Vec<_>>()
        .join("\n\n");
    fresh.final_output = Some(final_output);
    fresh.status = TaskStatus::Approved;
    fresh.touch();
    *task = save_task(deps, fresh).await?;

    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::TaskUpdate {
            task_id: task.id.clone(),
            status: "approved".to_string(),
            reason: "supervisor approved".to_string(),
        }))
        .await;
    Ok(())
}

async fn finalize_rejected(
    deps: &FsmDeps,
    task: &mut Task,
    review: &SupervisorReview,
) -> Result<(), TaskServiceError> {
    let _guard = deps.task_locks.acquire(&task.id).await;
    let mut fresh = load_task(deps, &task.id).await?;
    fresh.final_output = Some(if review.feedback.is_empty() {
        "Rejected by supervisor".to_string()
    } else {
        review.feedback.clone()
    });
    fresh.status = TaskStatus::Rejected;
    fresh.touch();
    *task = save_task(deps, fresh).await?;

    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::TaskUpdate {
            task_id: task.id.clone(),
            status: "rejected".to_string(),
            reason: "supervisor rejected".to_string(),
        }))
        .await;
    Ok(())
}

async fn fail_task(deps: &FsmDeps, task_id: &str, reason: String) {
    let _guard = deps.task_locks.acquire(task_id).await;
    if let Ok(Some(mut task)) = deps.tasks.get(task_id).await {
        task.status = TaskStatus::Failed;
        task.final_output = Some(reason.clone());
        task.touch();
        let _ = deps.tasks.save(task).await;
    }
    deps.event_bus
        .publish(EventEnvelope::new(EngineEvent::Log {
            level: "error".to_string(),
            message: reason,
        }))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InProcessInterruptController;
    use engine_core::{EventBus, InMemoryAgentRepository, InMemoryTaskRepository};
    use engine_providers::{Scripted, ScriptedProvider};
    use engine_types::{AgentRole, Task};

    /// The review node reuses the *first assigned agent's* provider/model
    /// (spec §4.1), so a single worker's provider must yield, in call order,
    /// its worker reply then the supervisor's JSON verdict for each round.
    async fn build_deps(combined_script: Vec<Scripted>, max_revisions: u32) -> (FsmDeps, String) {
        let agents = AgentService::new(Arc::new(InMemoryAgentRepository::new()));
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(ScriptedProvider::new("provider", combined_script)));

        let worker = agents
            .create("Worker1".into(), AgentRole::Worker, String::new(), "provider".into(), "m".into())
            .await
            .unwrap();

        let tasks: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let mut task = Task::new_root("say hello", vec![worker.id.clone()]);
        task.max_revisions = max_revisions;
        tasks.save(task.clone()).await.unwrap();

        let deps = FsmDeps {
            tasks: tasks.clone(),
            agents,
            providers,
            rate_limiter: RateLimiter::new(6000),
            event_bus: EventBus::with_capacity(64),
            task_locks: TaskLocks::new(),
            interrupt: Arc::new(InProcessInterruptController::new()),
            graph_timeout: Duration::from_secs(5),
            max_revisions,
        };
        (deps, task.id)
    }

    #[tokio::test]
    async fn happy_path_single_worker_approve_round_zero() {
        let (deps, task_id) = build_deps(
            vec![
                Scripted::text("hello world"),
                Scripted::text(r#"{"decision": "approve", "feedback": "ok"}"#),
            ],
            3,
        )
        .await;

        let ctx = RequestContext::default();
        run(&deps, &task_id, ctx).await.unwrap();

        let task = deps.tasks.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        assert_eq!(task.supervisor_reviews.len(), 1);
        assert_eq!(task.final_output.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn revise_budget_exhausted_forces_approve() {
        let (deps, task_id) = build_deps(
            vec![
                Scripted::text("draft 1"),
                Scripted::text(r#"{"decision": "revise", "feedback": "needs work"}"#),
                Scripted::text("draft 2"),
                Scripted::text(r#"{"decision": "revise", "feedback": "still needs work"}"#),
            ],
            1,
        )
        .await;
        let ctx = RequestContext::default();
        run(&deps, &task_id, ctx).await.unwrap();

        let task = deps.tasks.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        assert_eq!(task.current_revision, 1);
        assert_eq!(task.supervisor_reviews.len(), 2);
    }

    #[tokio::test]
    async fn revise_once_then_approve_prompt_contains_feedback() {
        let (deps, task_id) = build_deps(
            vec![
                Scripted::text("draft 1"),
                Scripted::text(r#"{"decision": "revise", "feedback": "add more detail"}"#),
                Scripted::text("draft 2, revised"),
                Scripted::text(r#"{"decision": "approve", "feedback": "ok now"}"#),
            ],
            3,
        )
        .await;
        let ctx = RequestContext::default();
        run(&deps, &task_id, ctx).await.unwrap();

        let task = deps.tasks.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        assert_eq!(task.current_revision, 1);
        assert_eq!(task.supervisor_reviews.len(), 2);
        assert_eq!(task.worker_outputs.len(), 2);
    }
}
