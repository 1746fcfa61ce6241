//! The task-orchestration engine: the fixed dispatch → review →
//! approve/revise/reject state machine (spec §4.1), its worker and
//! supervisor collaborators, lineage-safe task creation, the interrupt/
//! resume controller, and the scout dispatcher.

pub mod interrupt;
pub mod scout;
pub mod state_machine;
pub mod supervisor;
pub mod task_service;
pub mod worker_executor;

pub use interrupt::{
    CheckpointStore, DurableInterruptController, InMemoryCheckpointStore,
    InProcessInterruptController, InterruptController,
};
pub use scout::{launch as launch_scout, ScoutLaunchRequest, ScoutLaunchResult};
pub use state_machine::FsmDeps;
pub use task_service::{CreateTaskRequest, TaskService, TaskServiceConfig, TaskServiceError};
pub use worker_executor::WorkerResult;
