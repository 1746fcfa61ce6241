//! Relational back-end for component C (spec §4.7, §6 "Persisted state
//! layout"). Behind the `postgres` feature so the in-memory backend (the
//! default, and what every test in this workspace runs against) never pulls
//! in `sqlx`. Tables: `agents`, `tasks`, `worker_outputs(task_id FK)`,
//! `supervisor_reviews(task_id FK)`. `assigned_agents`/`child_task_ids` are
//! JSON columns, as specified.
//!
//! Save is idempotent with respect to append-only children: only the rows
//! beyond what's already persisted are inserted, so re-saving a task that
//! already has its round-0 outputs stored doesn't duplicate them.

use async_trait::async_trait;
use chrono::Utc;
use engine_types::{
    Agent, AgentRole, AgentStatus, SupervisorDecision, SupervisorReview, Task, TaskStatus,
    WorkerOutput,
};
use sqlx::{PgPool, Row};

use crate::repository::{AgentRepository, TaskRepository};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            system_prompt TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            model_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            assigned_agents JSONB NOT NULL,
            current_revision INT NOT NULL,
            max_revisions INT NOT NULL,
            final_output TEXT,
            requires_human_approval BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            parent_task_id TEXT,
            depth INT NOT NULL,
            child_task_ids JSONB NOT NULL,
            spawned_by_agent TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS worker_outputs (
            task_id TEXT NOT NULL REFERENCES tasks(id),
            seq INT NOT NULL,
            agent_id TEXT NOT NULL,
            agent_name TEXT NOT NULL,
            output TEXT NOT NULL,
            revision INT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (task_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS supervisor_reviews (
            task_id TEXT NOT NULL REFERENCES tasks(id),
            seq INT NOT NULL,
            decision TEXT NOT NULL,
            feedback TEXT NOT NULL,
            revision INT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (task_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_logs (
            id BIGSERIAL PRIMARY KEY,
            task_id TEXT,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            task_id TEXT PRIMARY KEY,
            node TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn role_to_str(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Worker => "worker",
        AgentRole::Supervisor => "supervisor",
    }
}

fn role_from_str(s: &str) -> AgentRole {
    match s {
        "supervisor" => AgentRole::Supervisor,
        _ => AgentRole::Worker,
    }
}

fn status_to_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Idle => "idle",
        AgentStatus::Busy => "busy",
        AgentStatus::Error => "error",
    }
}

fn status_from_str(s: &str) -> AgentStatus {
    match s {
        "busy" => AgentStatus::Busy,
        "error" => AgentStatus::Error,
        _ => AgentStatus::Idle,
    }
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::UnderReview => "under_review",
        TaskStatus::Revision => "revision",
        TaskStatus::Approved => "approved",
        TaskStatus::Rejected => "rejected",
        TaskStatus::Failed => "failed",
        TaskStatus::PendingHumanApproval => "pending_human_approval",
    }
}

fn task_status_from_str(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "under_review" => TaskStatus::UnderReview,
        "revision" => TaskStatus::Revision,
        "approved" => TaskStatus::Approved,
        "rejected" => TaskStatus::Rejected,
        "failed" => TaskStatus::Failed,
        "pending_human_approval" => TaskStatus::PendingHumanApproval,
        _ => TaskStatus::Pending,
    }
}

fn decision_to_str(decision: SupervisorDecision) -> &'static str {
    match decision {
        SupervisorDecision::Approve => "approve",
        SupervisorDecision::Revise => "revise",
        SupervisorDecision::Reject => "reject",
    }
}

fn decision_from_str(s: &str) -> SupervisorDecision {
    match s {
        "approve" => SupervisorDecision::Approve,
        "reject" => SupervisorDecision::Reject,
        _ => SupervisorDecision::Revise,
    }
}

#[derive(Clone)]
pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT id, name, role, system_prompt, provider_id, model_id, status, created_at \
             FROM agents ORDER BY created_at OFFSET $1 LIMIT $2",
        )
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_agent).collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Agent>> {
        let row = sqlx::query(
            "SELECT id, name, role, system_prompt, provider_id, model_id, status, created_at \
             FROM agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_agent))
    }

    async fn save(&self, agent: Agent) -> anyhow::Result<Agent> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, role, system_prompt, provider_id, model_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                role = EXCLUDED.role,
                system_prompt = EXCLUDED.system_prompt,
                provider_id = EXCLUDED.provider_id,
                model_id = EXCLUDED.model_id,
                status = EXCLUDED.status
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(role_to_str(agent.role))
        .bind(&agent.system_prompt)
        .bind(&agent.provider_id)
        .bind(&agent.model_id)
        .bind(status_to_str(agent.status))
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(agent)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> anyhow::Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM agents").fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("c") as usize)
    }
}

fn row_to_agent(row: sqlx::postgres::PgRow) -> Agent {
    Agent {
        id: row.get("id"),
        name: row.get("name"),
        role: role_from_str(row.get::<String, _>("role").as_str()),
        system_prompt: row.get("system_prompt"),
        provider_id: row.get("provider_id"),
        model_id: row.get("model_id"),
        status: status_from_str(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
    }
}

#[derive(Clone)]
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_children(&self, task_id: &str) -> anyhow::Result<(Vec<WorkerOutput>, Vec<SupervisorReview>)> {
        let output_rows = sqlx::query(
            "SELECT agent_id, agent_name, output, revision, created_at FROM worker_outputs \
             WHERE task_id = $1 ORDER BY seq",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        let outputs = output_rows
            .into_iter()
            .map(|row| WorkerOutput {
                agent_id: row.get("agent_id"),
                agent_name: row.get("agent_name"),
                output: row.get("output"),
                revision: row.get::<i32, _>("revision") as u32,
                created_at: row.get("created_at"),
            })
            .collect();

        let review_rows = sqlx::query(
            "SELECT decision, feedback, revision, created_at FROM supervisor_reviews \
             WHERE task_id = $1 ORDER BY seq",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        let reviews = review_rows
            .into_iter()
            .map(|row| SupervisorReview {
                decision: decision_from_str(row.get::<String, _>("decision").as_str()),
                feedback: row.get("feedback"),
                revision: row.get::<i32, _>("revision") as u32,
                created_at: row.get("created_at"),
            })
            .collect();

        Ok((outputs, reviews))
    }

    async fn row_to_task(&self, row: sqlx::postgres::PgRow) -> anyhow::Result<Task> {
        let id: String = row.get("id");
        let (worker_outputs, supervisor_reviews) = self.load_children(&id).await?;
        let assigned_agents: serde_json::Value = row.get("assigned_agents");
        let child_task_ids: serde_json::Value = row.get("child_task_ids");
        Ok(Task {
            id,
            description: row.get("description"),
            status: task_status_from_str(row.get::<String, _>("status").as_str()),
            assigned_agents: serde_json::from_value(assigned_agents).unwrap_or_default(),
            worker_outputs,
            supervisor_reviews,
            current_revision: row.get::<i32, _>("current_revision") as u32,
            max_revisions: row.get::<i32, _>("max_revisions") as u32,
            final_output: row.get("final_output"),
            requires_human_approval: row.get("requires_human_approval"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            parent_task_id: row.get("parent_task_id"),
            depth: row.get::<i32, _>("depth") as u32,
            child_task_ids: serde_json::from_value(child_task_ids).unwrap_or_default(),
            spawned_by_agent: row.get("spawned_by_agent"),
        })
    }

    /// Insert only the append-only child rows beyond what's already stored.
    async fn sync_children(&self, task: &Task) -> anyhow::Result<()> {
        let existing_outputs: i64 = sqlx::query("SELECT COUNT(*) AS c FROM worker_outputs WHERE task_id = $1")
            .bind(&task.id)
            .fetch_one(&self.pool)
            .await?
            .get("c");
        for (seq, wo) in task.worker_outputs.iter().enumerate().skip(existing_outputs as usize) {
            sqlx::query(
                "INSERT INTO worker_outputs (task_id, seq, agent_id, agent_name, output, revision, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&task.id)
            .bind(seq as i32)
            .bind(&wo.agent_id)
            .bind(&wo.agent_name)
            .bind(&wo.output)
            .bind(wo.revision as i32)
            .bind(wo.created_at)
            .execute(&self.pool)
            .await?;
        }

        let existing_reviews: i64 = sqlx::query("SELECT COUNT(*) AS c FROM supervisor_reviews WHERE task_id = $1")
            .bind(&task.id)
            .fetch_one(&self.pool)
            .await?
            .get("c");
        for (seq, review) in task.supervisor_reviews.iter().enumerate().skip(existing_reviews as usize) {
            sqlx::query(
                "INSERT INTO supervisor_reviews (task_id, seq, decision, feedback, revision, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&task.id)
            .bind(seq as i32)
            .bind(decision_to_str(review.decision))
            .bind(&review.feedback)
            .bind(review.revision as i32)
            .bind(review.created_at)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at OFFSET $1 LIMIT $2")
            .bind(skip as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(self.row_to_task(row).await?);
        }
        Ok(tasks)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.row_to_task(row).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, task: Task) -> anyhow::Result<Task> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, description, status, assigned_agents, current_revision, max_revisions,
                final_output, requires_human_approval, created_at, updated_at,
                parent_task_id, depth, child_task_ids, spawned_by_agent
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                assigned_agents = EXCLUDED.assigned_agents,
                current_revision = EXCLUDED.current_revision,
                max_revisions = EXCLUDED.max_revisions,
                final_output = EXCLUDED.final_output,
                requires_human_approval = EXCLUDED.requires_human_approval,
                updated_at = EXCLUDED.updated_at,
                child_task_ids = EXCLUDED.child_task_ids
            "#,
        )
        .bind(&task.id)
        .bind(&task.description)
        .bind(task_status_to_str(task.status))
        .bind(serde_json::to_value(&task.assigned_agents)?)
        .bind(task.current_revision as i32)
        .bind(task.max_revisions as i32)
        .bind(&task.final_output)
        .bind(task.requires_human_approval)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(&task.parent_task_id)
        .bind(task.depth as i32)
        .bind(serde_json::to_value(&task.child_task_ids)?)
        .bind(&task.spawned_by_agent)
        .execute(&self.pool)
        .await?;

        self.sync_children(&task).await?;
        Ok(task)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        sqlx::query("DELETE FROM worker_outputs WHERE task_id = $1").bind(id).execute(&self.pool).await?;
        sqlx::query("DELETE FROM supervisor_reviews WHERE task_id = $1").bind(id).execute(&self.pool).await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> anyhow::Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM tasks").fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("c") as usize)
    }

    async fn count_by_parent(&self, parent_id: &str) -> anyhow::Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM tasks WHERE parent_task_id = $1")
            .bind(parent_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("c") as usize)
    }

    async fn count_auto_created(&self) -> anyhow::Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM tasks WHERE parent_task_id IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("c") as usize)
    }
}

/// The durable Interrupt/Resume Controller's checkpoint store (spec §4.5,
/// §6's `checkpoints(task_id PK)` table).
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, task_id: &str, node: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (task_id, node, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT (task_id) DO UPDATE SET node = EXCLUDED.node, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(task_id)
        .bind(node)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, task_id: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT node FROM checkpoints WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("node")))
    }

    pub async fn clear(&self, task_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE task_id = $1").bind(task_id).execute(&self.pool).await?;
        Ok(())
    }
}
