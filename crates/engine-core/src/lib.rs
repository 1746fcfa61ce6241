pub mod agent_service;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod rate_limiter;
pub mod repository;
pub mod task_locks;

#[cfg(feature = "postgres")]
pub mod repository_postgres;

pub use agent_service::AgentService;
pub use broadcast::{BroadcastFabric, DEFAULT_BROADCAST_ERROR_DELAY, DEFAULT_MAX_BROADCAST_ERROR_COUNT};
pub use config::{EngineConfig, InterruptMode, StorageBackend};
pub use error::EngineError;
pub use event_bus::{EventBus, EVENT_BUS_CAPACITY};
pub use rate_limiter::RateLimiter;
pub use repository::{
    AgentRepository, InMemoryAgentRepository, InMemoryTaskRepository, TaskRepository,
};
pub use task_locks::{TaskLockGuard, TaskLocks};

#[cfg(feature = "postgres")]
pub use repository_postgres::{
    connect as connect_postgres, PostgresAgentRepository, PostgresCheckpointStore,
    PostgresTaskRepository,
};
