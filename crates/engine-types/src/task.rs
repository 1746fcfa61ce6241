use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    UnderReview,
    Revision,
    Approved,
    Rejected,
    Failed,
    PendingHumanApproval,
}

impl TaskStatus {
    /// Terminal statuses are sinks: once reached, a task never transitions again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Approved | TaskStatus::Rejected | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorDecision {
    Approve,
    Revise,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerOutput {
    pub agent_id: String,
    pub agent_name: String,
    pub output: String,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorReview {
    pub decision: SupervisorDecision,
    pub feedback: String,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_agents: Vec<String>,
    pub worker_outputs: Vec<WorkerOutput>,
    pub supervisor_reviews: Vec<SupervisorReview>,
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

pub const DEFAULT_MAX_REVISIONS: u32 = 3;

impl Task {
    pub fn new_root(description: impl Into<String>, assigned_agents: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            status: TaskStatus::Pending,
            assigned_agents,
            worker_outputs: Vec::new(),
            supervisor_reviews: Vec::new(),
            current_revision: 0,
            max_revisions: DEFAULT_MAX_REVISIONS,
            final_output: None,
            requires_human_approval: false,
            created_at: now,
            updated_at: now,
            parent_task_id: None,
            depth: 0,
            child_task_ids: Vec::new(),
            spawned_by_agent: None,
        }
    }

    pub fn new_child(
        description: impl Into<String>,
        assigned_agents: Vec<String>,
        parent: &Task,
        spawned_by_agent: Option<String>,
    ) -> Self {
        let mut task = Self::new_root(description, assigned_agents);
        task.parent_task_id = Some(parent.id.clone());
        task.depth = parent.depth + 1;
        task.spawned_by_agent = spawned_by_agent;
        task
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The review, if any, belonging to the current revision round.
    pub fn latest_review(&self) -> Option<&SupervisorReview> {
        self.supervisor_reviews
            .iter()
            .rev()
            .find(|r| r.revision == self.current_revision)
    }

    /// This round's worker outputs, i.e. those tagged with the current revision.
    pub fn current_round_outputs(&self) -> Vec<&WorkerOutput> {
        self.worker_outputs
            .iter()
            .filter(|wo| wo.revision == self.current_revision)
            .collect()
    }
}
