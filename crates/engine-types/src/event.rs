use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{SupervisorReview, WorkerOutput};

/// A push-broadcast datum describing a state change. Non-authoritative: the
/// repository is authoritative, events are fire-and-forget snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    TaskUpdate {
        task_id: String,
        status: String,
        reason: String,
    },
    AgentUpdate {
        agent_id: String,
        status: String,
    },
    Log {
        level: String,
        message: String,
    },
    WorkerOutput {
        task_id: String,
        output: WorkerOutput,
        preview: String,
    },
    SupervisorReview {
        task_id: String,
        review: SupervisorReview,
    },
    HumanApprovalRequired {
        task_id: String,
        revision: u32,
    },
    Telemetry {
        fields: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl EventEnvelope {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// A 500-character preview of worker output text, per the dispatch node contract.
pub fn preview(text: &str) -> String {
    const LIMIT: usize = 500;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        text.chars().take(LIMIT).collect()
    }
}
