//! Full end-to-end scenarios, driven through `TaskService::create_task`
//! exactly as the HTTP layer drives it, against the in-memory repository
//! backend and scripted providers. No network access, no real credentials.

use std::sync::Arc;
use std::time::Duration;

use engine_core::{AgentService, EventBus, InMemoryAgentRepository, InMemoryTaskRepository, RateLimiter, TaskLocks};
use engine_orchestrator::{CreateTaskRequest, FsmDeps, InProcessInterruptController, TaskService, TaskServiceConfig};
use engine_providers::{ProviderRegistry, Scripted, ScriptedProvider};
use engine_types::{AgentRole, RequestContext, SupervisorDecision, TaskStatus};

struct Harness {
    agents: AgentService,
    providers: ProviderRegistry,
}

impl Harness {
    fn new() -> Self {
        Self { agents: AgentService::new(Arc::new(InMemoryAgentRepository::new())), providers: ProviderRegistry::new() }
    }

    fn register(mut self, provider: ScriptedProvider) -> Self {
        self.providers.register(Arc::new(provider));
        self
    }

    async fn worker(self, name: &str, provider_id: &str) -> (Self, String) {
        let agent = self
            .agents
            .create(name.to_string(), AgentRole::Worker, String::new(), provider_id.to_string(), "m".to_string())
            .await
            .unwrap();
        let id = agent.id.clone();
        (self, id)
    }

    fn build(self, config: TaskServiceConfig) -> TaskService {
        let tasks: Arc<dyn engine_core::TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let fsm = FsmDeps {
            tasks: tasks.clone(),
            agents: self.agents.clone(),
            providers: self.providers,
            rate_limiter: RateLimiter::new(6000),
            event_bus: EventBus::with_capacity(64),
            task_locks: TaskLocks::new(),
            interrupt: Arc::new(InProcessInterruptController::new()),
            graph_timeout: Duration::from_secs(10),
            max_revisions: config.default_max_revisions,
        };
        TaskService::new(tasks, self.agents, EventBus::with_capacity(64), fsm, None, config)
    }
}

fn default_config() -> TaskServiceConfig {
    TaskServiceConfig {
        max_task_depth: 3,
        max_child_tasks_per_task: 5,
        max_total_auto_tasks: 20,
        allow_auto_task_creation: true,
        default_max_revisions: 3,
    }
}

/// Polls `get` until the task reaches a terminal or suspended status, or
/// panics after five seconds. The FSM always runs in the background.
async fn wait_for_status(svc: &TaskService, task_id: &str, target: TaskStatus) -> engine_types::Task {
    for _ in 0..500 {
        let task = svc.get(task_id).await.unwrap();
        if task.status == target {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {target:?}, last status: {:?}", svc.get(task_id).await.unwrap().status);
}

#[tokio::test]
async fn scenario_1_happy_path_single_worker_approve_round_zero() {
    let harness = Harness::new().register(ScriptedProvider::new(
        "stub",
        vec![Scripted::text("hello there"), Scripted::text(r#"{"decision":"approve","feedback":"ok"}"#)],
    ));
    let (harness, worker1) = harness.worker("Worker1", "stub").await;
    let svc = harness.build(default_config());

    let task = svc
        .create_task(
            CreateTaskRequest {
                description: "say hello".into(),
                assigned_agents: vec![worker1],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    let finished = wait_for_status(&svc, &task.id, TaskStatus::Approved).await;
    assert_eq!(finished.final_output.as_deref(), Some("hello there"));
    assert_eq!(finished.supervisor_reviews.len(), 1);
    assert_eq!(finished.supervisor_reviews[0].decision, SupervisorDecision::Approve);
    assert_eq!(finished.supervisor_reviews[0].revision, 0);
}

#[tokio::test]
async fn scenario_2_revise_once_then_approve() {
    let harness = Harness::new().register(ScriptedProvider::new(
        "stub",
        vec![
            Scripted::text("draft one"),
            Scripted::text(r#"{"decision":"revise","feedback":"needs more detail"}"#),
            Scripted::text("draft two"),
            Scripted::text(r#"{"decision":"approve","feedback":"ok"}"#),
        ],
    ));
    let (harness, worker1) = harness.worker("Worker1", "stub").await;
    let svc = harness.build(default_config());

    let task = svc
        .create_task(
            CreateTaskRequest {
                description: "write a paragraph".into(),
                assigned_agents: vec![worker1],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    let finished = wait_for_status(&svc, &task.id, TaskStatus::Approved).await;
    assert_eq!(finished.current_revision, 1);
    assert_eq!(finished.supervisor_reviews.len(), 2);
    assert_eq!(finished.worker_outputs.len(), 2);
}

#[tokio::test]
async fn scenario_3_revise_budget_exhausted_forces_approve() {
    let harness = Harness::new().register(ScriptedProvider::new(
        "stub",
        vec![
            Scripted::text("draft one"),
            Scripted::text(r#"{"decision":"revise","feedback":"again"}"#),
            Scripted::text("draft two"),
            Scripted::text(r#"{"decision":"revise","feedback":"again"}"#),
        ],
    ));
    let (harness, worker1) = harness.worker("Worker1", "stub").await;
    let mut config = default_config();
    config.default_max_revisions = 1;
    let svc = harness.build(config);

    let task = svc
        .create_task(
            CreateTaskRequest {
                description: "write a paragraph".into(),
                assigned_agents: vec![worker1],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    let finished = wait_for_status(&svc, &task.id, TaskStatus::Approved).await;
    assert_eq!(finished.current_revision, 1);
    assert_eq!(finished.worker_outputs.len(), 2);
    assert_eq!(finished.supervisor_reviews.len(), 2);
    assert_eq!(finished.supervisor_reviews[1].decision, SupervisorDecision::Revise);
}

#[tokio::test]
async fn scenario_4_parallel_worker_error_isolation() {
    let harness = Harness::new()
        .register(ScriptedProvider::new(
            "good",
            vec![Scripted::text("output from A"), Scripted::text(r#"{"decision":"approve","feedback":"ok"}"#)],
        ))
        .register(ScriptedProvider::new(
            "bad",
            vec![Scripted::Fail("boom".into()), Scripted::Fail("boom".into()), Scripted::Fail("boom".into())],
        ));
    let (harness, worker_a) = harness.worker("WorkerA", "good").await;
    let (harness, worker_b) = harness.worker("WorkerB", "bad").await;
    let svc = harness.build(default_config());

    let task = svc
        .create_task(
            CreateTaskRequest {
                description: "do the thing".into(),
                assigned_agents: vec![worker_a.clone(), worker_b.clone()],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    let finished = wait_for_status(&svc, &task.id, TaskStatus::Approved).await;
    assert_eq!(finished.worker_outputs.len(), 2);
    let b_output = finished.worker_outputs.iter().find(|wo| wo.agent_id == worker_b).unwrap();
    assert!(b_output.output.starts_with("Error:"), "expected error output, got {}", b_output.output);
}

#[tokio::test]
async fn scenario_5_lineage_block_beyond_max_depth() {
    let harness = Harness::new().register(ScriptedProvider::new(
        "stub",
        std::iter::repeat(Scripted::text(r#"{"decision":"approve","feedback":"ok"}"#)).take(16).collect(),
    ));
    let (harness, worker1) = harness.worker("Worker1", "stub").await;
    let mut config = default_config();
    config.max_task_depth = 3;
    let svc = harness.build(config);

    let mut current = svc
        .create_task(
            CreateTaskRequest {
                description: "root".into(),
                assigned_agents: vec![worker1.clone()],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();
    current = wait_for_status(&svc, &current.id, TaskStatus::Approved).await;
    assert_eq!(current.depth, 0);

    for expected_depth in 1..=3 {
        let child = svc
            .create_task(
                CreateTaskRequest {
                    description: format!("depth {expected_depth}"),
                    assigned_agents: vec![worker1.clone()],
                    parent_task_id: Some(current.id.clone()),
                    spawned_by_agent: None,
                    requires_human_approval: false,
                    max_revisions: None,
                },
                RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(child.depth, expected_depth);
        current = wait_for_status(&svc, &child.id, TaskStatus::Approved).await;
    }

    // `current` is now the depth-3 task; MAX_TASK_DEPTH=3 permits it but
    // forbids its own child (which would sit at depth 4).
    assert_eq!(current.depth, 3);
    let grandchild = svc
        .create_task(
            CreateTaskRequest {
                description: "depth 4, should fail".into(),
                assigned_agents: vec![worker1],
                parent_task_id: Some(current.id.clone()),
                spawned_by_agent: None,
                requires_human_approval: false,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await;
    assert!(matches!(
        grandchild,
        Err(engine_orchestrator::TaskServiceError::Engine(engine_core::EngineError::AutoTask(_)))
    ));
}

#[tokio::test]
async fn scenario_6_human_approval_override_after_supervisor_reject() {
    let harness = Harness::new().register(ScriptedProvider::new(
        "stub",
        vec![Scripted::text("draft"), Scripted::text(r#"{"decision":"reject","feedback":"not good enough"}"#)],
    ));
    let (harness, worker1) = harness.worker("Worker1", "stub").await;
    let svc = harness.build(default_config());

    let task = svc
        .create_task(
            CreateTaskRequest {
                description: "write something".into(),
                assigned_agents: vec![worker1],
                parent_task_id: None,
                spawned_by_agent: None,
                requires_human_approval: true,
                max_revisions: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    let suspended = wait_for_status(&svc, &task.id, TaskStatus::PendingHumanApproval).await;
    assert_eq!(suspended.supervisor_reviews.len(), 1);
    assert_eq!(suspended.supervisor_reviews[0].decision, SupervisorDecision::Reject);

    let resolved = svc
        .approve(&task.id, SupervisorDecision::Approve, "human override: ship it".into(), RequestContext::default())
        .await
        .unwrap();

    assert_eq!(resolved.status, TaskStatus::Approved);
    assert_eq!(resolved.supervisor_reviews.len(), 2);
    assert_eq!(resolved.supervisor_reviews[0].decision, SupervisorDecision::Reject);
    assert_eq!(resolved.supervisor_reviews[1].decision, SupervisorDecision::Approve);
}
