//! Request/response DTOs for the HTTP surface described in spec §6.
//!
//! These are deliberately separate from `engine-types`' domain model: the
//! wire shape (flat, optional fields with defaults, string enums) is allowed
//! to drift from the internal representation without forcing `#[serde]`
//! attributes onto the domain types themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use engine_types::{Agent, AgentRole, AgentStatus, SupervisorReview, Task, TaskStatus, WorkerOutput};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentCreate {
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub system_prompt: String,
    pub provider_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub status: Option<AgentStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub system_prompt: String,
    pub provider_id: String,
    pub model_id: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Agent> for AgentResponse {
    fn from(a: Agent) -> Self {
        Self {
            id: a.id,
            name: a.name,
            role: a.role,
            system_prompt: a.system_prompt,
            provider_id: a.provider_id,
            model_id: a.model_id,
            status: a.status,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskCreate {
    pub description: String,
    #[serde(default)]
    pub assigned_agents: Vec<String>,
    #[serde(default)]
    pub max_revisions: Option<u32>,
    #[serde(default)]
    pub requires_human_approval: bool,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub spawned_by_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerOutputResponse {
    pub agent_id: String,
    pub agent_name: String,
    pub output: String,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkerOutput> for WorkerOutputResponse {
    fn from(wo: &WorkerOutput) -> Self {
        Self {
            agent_id: wo.agent_id.clone(),
            agent_name: wo.agent_name.clone(),
            output: wo.output.clone(),
            revision: wo.revision,
            created_at: wo.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorReviewResponse {
    pub decision: String,
    pub feedback: String,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&SupervisorReview> for SupervisorReviewResponse {
    fn from(r: &SupervisorReview) -> Self {
        Self {
            decision: format!("{:?}", r.decision).to_lowercase(),
            feedback: r.feedback.clone(),
            revision: r.revision,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_agents: Vec<String>,
    pub worker_outputs: Vec<WorkerOutputResponse>,
    pub supervisor_reviews: Vec<SupervisorReviewResponse>,
    pub current_revision: u32,
    pub max_revisions: u32,
    pub final_output: Option<String>,
    pub requires_human_approval: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_task_id: Option<String>,
    pub depth: u32,
    pub child_task_ids: Vec<String>,
    pub spawned_by_agent: Option<String>,
}

impl From<&Task> for TaskResponse {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            description: t.description.clone(),
            status: t.status,
            assigned_agents: t.assigned_agents.clone(),
            worker_outputs: t.worker_outputs.iter().map(Into::into).collect(),
            supervisor_reviews: t.supervisor_reviews.iter().map(Into::into).collect(),
            current_revision: t.current_revision,
            max_revisions: t.max_revisions,
            final_output: t.final_output.clone(),
            requires_human_approval: t.requires_human_approval,
            created_at: t.created_at,
            updated_at: t.updated_at,
            parent_task_id: t.parent_task_id.clone(),
            depth: t.depth,
            child_task_ids: t.child_task_ids.clone(),
            spawned_by_agent: t.spawned_by_agent.clone(),
        }
    }
}

/// Lighter projection for list endpoints: omits outputs/reviews.
#[derive(Debug, Clone, Serialize)]
pub struct TaskListResponse {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub current_revision: u32,
    pub max_revisions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub depth: u32,
}

impl From<&Task> for TaskListResponse {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            description: t.description.clone(),
            status: t.status,
            current_revision: t.current_revision,
            max_revisions: t.max_revisions,
            created_at: t.created_at,
            updated_at: t.updated_at,
            depth: t.depth,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HumanDecision {
    pub decision: engine_types::SupervisorDecision,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDetails {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub agent_count: u64,
    pub task_count: u64,
    pub default_provider: String,
    pub default_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoutLaunchRequest {
    pub num_tasks: u32,
    pub max_depth: u32,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoutLaunchResponse {
    pub root_task_id: String,
    pub spawned_task_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateKeyRequest {
    pub provider: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateKeyResponse {
    pub valid: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxModeRequest {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxModeResponse {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::Task;

    #[test]
    fn task_response_projects_round_outputs() {
        let task = Task::new_root("say hello", vec!["w1".into()]);
        let resp = TaskResponse::from(&task);
        assert_eq!(resp.id, task.id);
        assert_eq!(resp.status, TaskStatus::Pending);
        assert!(resp.worker_outputs.is_empty());
    }
}
