//! Assembles the task-orchestration engine's runtime state (spec §9's "no
//! free-floating singletons" note: one `AppState`, built once at startup,
//! threaded through every handler) and exposes its HTTP/WebSocket surface.

use std::sync::Arc;
use std::time::Instant;

use engine_core::{
    AgentRepository, AgentService, BroadcastFabric, EngineConfig, EventBus,
    InMemoryAgentRepository, InMemoryTaskRepository, InterruptMode, RateLimiter, StorageBackend,
    TaskLocks, TaskRepository,
};
use engine_orchestrator::{
    CheckpointStore, DurableInterruptController, FsmDeps, InMemoryCheckpointStore,
    InProcessInterruptController, InterruptController, TaskService, TaskServiceConfig,
};
use engine_providers::{HttpChatProvider, ProviderRegistry, Scripted, ScriptedProvider};
use tokio::sync::RwLock;

mod error;
mod http;
#[cfg(feature = "postgres")]
mod postgres_checkpoint;

pub use error::ApiError;
pub use http::serve;

/// Everything a handler needs, cloned cheaply per request (every field is
/// itself `Arc`-backed or otherwise `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub agents: AgentService,
    pub tasks: TaskService,
    pub providers: ProviderRegistry,
    pub event_bus: EventBus,
    pub broadcast: BroadcastFabric,
    pub sandbox_mode: Arc<RwLock<String>>,
    started_at: Instant,
}

impl AppState {
    /// Build the full runtime from configuration: picks the repository and
    /// checkpoint-store backend (memory vs. Postgres, behind the `postgres`
    /// feature), the interrupt controller (in-process vs. durable), and the
    /// provider registry, then wires them into one `TaskService`.
    pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let (agent_repo, task_repo, checkpoint_store) =
            build_storage(&config).await?;

        let interrupt: Arc<dyn InterruptController> = match config.interrupt_mode {
            InterruptMode::InProcess => Arc::new(InProcessInterruptController::new()),
            InterruptMode::Durable => {
                let store = checkpoint_store.clone().ok_or_else(|| {
                    anyhow::anyhow!("durable interrupt mode requires a checkpoint store")
                })?;
                Arc::new(DurableInterruptController::new(store))
            }
        };

        let agents = AgentService::new(agent_repo);
        let providers = default_provider_registry();
        let event_bus = EventBus::new();
        let broadcast = BroadcastFabric::with_policy(
            config.max_broadcast_error_count,
            config.broadcast_error_delay(),
        );

        let fsm = FsmDeps {
            tasks: task_repo.clone(),
            agents: agents.clone(),
            providers: providers.clone(),
            rate_limiter: RateLimiter::new(config.rate_limit_rpm),
            event_bus: event_bus.clone(),
            task_locks: TaskLocks::new(),
            interrupt,
            graph_timeout: config.graph_timeout(),
            max_revisions: config.max_revisions,
        };

        let tasks = TaskService::new(
            task_repo,
            agents.clone(),
            event_bus.clone(),
            fsm,
            checkpoint_store,
            TaskServiceConfig {
                max_task_depth: config.max_task_depth,
                max_child_tasks_per_task: config.max_child_tasks_per_task,
                max_total_auto_tasks: config.max_total_auto_tasks,
                allow_auto_task_creation: config.allow_auto_task_creation,
                default_max_revisions: config.max_revisions,
            },
        );

        Ok(Self {
            config,
            agents,
            tasks,
            providers,
            event_bus,
            broadcast,
            sandbox_mode: Arc::new(RwLock::new("local".to_string())),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[allow(clippy::type_complexity)]
async fn build_storage(
    config: &EngineConfig,
) -> anyhow::Result<(
    Arc<dyn AgentRepository>,
    Arc<dyn TaskRepository>,
    Option<Arc<dyn CheckpointStore>>,
)> {
    match config.storage_backend {
        StorageBackend::Memory => Ok((
            Arc::new(InMemoryAgentRepository::new()),
            Arc::new(InMemoryTaskRepository::new()),
            Some(Arc::new(InMemoryCheckpointStore::new())),
        )),
        StorageBackend::Postgres => build_postgres_storage(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn build_postgres_storage(
    config: &EngineConfig,
) -> anyhow::Result<(
    Arc<dyn AgentRepository>,
    Arc<dyn TaskRepository>,
    Option<Arc<dyn CheckpointStore>>,
)> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required when STORAGE_BACKEND=postgres"))?;
    let pool = engine_core::connect_postgres(url).await?;
    Ok((
        Arc::new(engine_core::PostgresAgentRepository::new(pool.clone())),
        Arc::new(engine_core::PostgresTaskRepository::new(pool.clone())),
        Some(Arc::new(postgres_checkpoint::PostgresCheckpointAdapter::new(
            engine_core::PostgresCheckpointStore::new(pool),
        ))),
    ))
}

#[cfg(not(feature = "postgres"))]
async fn build_postgres_storage(
    _config: &EngineConfig,
) -> anyhow::Result<(
    Arc<dyn AgentRepository>,
    Arc<dyn TaskRepository>,
    Option<Arc<dyn CheckpointStore>>,
)> {
    anyhow::bail!("STORAGE_BACKEND=postgres requires the engine-server \"postgres\" feature")
}

/// Real provider clients are a contract boundary, not a vendor-SDK
/// integration (spec §1 Non-goals): one generic OpenAI-compatible client per
/// family, plus a scripted stub always available for local development and
/// the default `LLM_PROVIDER=stub` configuration.
fn default_provider_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(HttpChatProvider::new("openai", "https://api.openai.com/v1")));
    registry.register(Arc::new(HttpChatProvider::new(
        "anthropic",
        "https://api.anthropic.com/v1",
    )));
    registry.register(Arc::new(HttpChatProvider::new(
        "google",
        "https://generativelanguage.googleapis.com/v1beta/openai",
    )));
    registry.register(Arc::new(ScriptedProvider::new(
        "stub",
        vec![Scripted::text("stub provider response")],
    )));
    registry
}
