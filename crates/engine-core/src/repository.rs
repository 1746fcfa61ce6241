//! Component C — Repository: pluggable persistence for agents and tasks.
//! Two interchangeable back-ends share the same contract (§4.7): in-memory
//! maps here, a relational (Postgres) implementation behind the `postgres`
//! feature in `repository_postgres`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use engine_types::{Agent, Task};
use tokio::sync::RwLock;

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Agent>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Agent>>;
    /// Upsert.
    async fn save(&self, agent: Agent) -> anyhow::Result<Agent>;
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
    async fn count(&self) -> anyhow::Result<usize>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Task>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Task>>;
    /// Upsert. For a relational back-end this must insert only the
    /// worker-output/review rows beyond what's already persisted (append-only,
    /// §4.7's "idempotent with respect to append-only children").
    async fn save(&self, task: Task) -> anyhow::Result<Task>;
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
    async fn count(&self) -> anyhow::Result<usize>;
    async fn count_by_parent(&self, parent_id: &str) -> anyhow::Result<usize>;
    async fn count_auto_created(&self) -> anyhow::Result<usize>;
}

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<RwLock<HashMap<String, Agent>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Agent>> {
        let agents = self.agents.read().await;
        let mut all: Vec<Agent> = agents.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Agent>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn save(&self, agent: Agent) -> anyhow::Result<Agent> {
        self.agents.write().await.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.agents.write().await.remove(id).is_some())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.agents.read().await.len())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut all: Vec<Task> = tasks.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn save(&self, task: Task) -> anyhow::Result<Task> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.tasks.read().await.len())
    }

    async fn count_by_parent(&self, parent_id: &str) -> anyhow::Result<usize> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.parent_task_id.as_deref() == Some(parent_id))
            .count())
    }

    async fn count_auto_created(&self) -> anyhow::Result<usize> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.parent_task_id.is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::{Agent, AgentRole};

    #[tokio::test]
    async fn save_is_upsert() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::new("Worker1", AgentRole::Worker, "", "openai", "gpt-4o-mini");
        repo.save(agent.clone()).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);

        let mut updated = agent.clone();
        updated.name = "Worker1 renamed".to_string();
        repo.save(updated.clone()).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get(&agent.id).await.unwrap().unwrap().name, "Worker1 renamed");
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let repo = InMemoryTaskRepository::new();
        let task = Task::new_root("say hello", vec!["w1".into()]);
        repo.save(task.clone()).await.unwrap();
        let fetched = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched, task);
    }

    #[tokio::test]
    async fn count_by_parent_and_auto_created() {
        let repo = InMemoryTaskRepository::new();
        let root = Task::new_root("root", vec![]);
        repo.save(root.clone()).await.unwrap();
        let child1 = Task::new_child("child1", vec![], &root, None);
        let child2 = Task::new_child("child2", vec![], &root, None);
        repo.save(child1).await.unwrap();
        repo.save(child2).await.unwrap();

        assert_eq!(repo.count_by_parent(&root.id).await.unwrap(), 2);
        assert_eq!(repo.count_auto_created().await.unwrap(), 2);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_removes_entity() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::new("Worker1", AgentRole::Worker, "", "openai", "gpt-4o-mini");
        repo.save(agent.clone()).await.unwrap();
        assert!(repo.delete(&agent.id).await.unwrap());
        assert!(repo.get(&agent.id).await.unwrap().is_none());
        assert!(!repo.delete(&agent.id).await.unwrap());
    }
}
