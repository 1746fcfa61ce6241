//! Component F — Agent Service: CRUD over agents with a per-agent status
//! mutex, grounded on the source's `asyncio.Lock`-per-agent registry
//! (`agent_service.py`) plus this repository's `Arc<RwLock<HashMap>>`
//! registry idiom for the CRUD surface itself.

use std::collections::HashMap;
use std::sync::Arc;

use engine_types::{Agent, AgentRole, AgentStatus};
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::repository::AgentRepository;

#[derive(Clone)]
pub struct AgentService {
    repo: Arc<dyn AgentRepository>,
    /// One mutex per agent id, serializing status transitions (spec §5).
    status_locks: Arc<tokio::sync::RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AgentService {
    pub fn new(repo: Arc<dyn AgentRepository>) -> Self {
        Self { repo, status_locks: Arc::new(tokio::sync::RwLock::new(HashMap::new())) }
    }

    async fn lock_for(&self, agent_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.status_locks.read().await.get(agent_id) {
            return lock.clone();
        }
        let mut locks = self.status_locks.write().await;
        locks.entry(agent_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn create(
        &self,
        name: String,
        role: AgentRole,
        system_prompt: String,
        provider_id: String,
        model_id: String,
    ) -> anyhow::Result<Agent> {
        let agent = Agent::new(name, role, system_prompt, provider_id, model_id);
        self.repo.save(agent).await
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<Agent>> {
        self.repo.get(id).await
    }

    pub async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Agent>> {
        self.repo.list(skip, limit).await
    }

    /// All worker-role agents, used as the default assignment set when a
    /// task is submitted with an empty `assigned_agents` list (spec §4.4).
    pub async fn list_workers(&self) -> anyhow::Result<Vec<Agent>> {
        let all = self.repo.list(0, usize::MAX).await?;
        Ok(all.into_iter().filter(|a| a.is_worker()).collect())
    }

    pub async fn update(
        &self,
        id: &str,
        name: Option<String>,
        system_prompt: Option<String>,
        provider_id: Option<String>,
        model_id: Option<String>,
        status: Option<AgentStatus>,
    ) -> Result<Agent, EngineError> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        let mut agent = self
            .repo
            .get(id)
            .await
            .map_err(|e| EngineError::Fatal(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(format!("agent {id}")))?;

        if let Some(name) = name {
            agent.name = name;
        }
        if let Some(system_prompt) = system_prompt {
            agent.system_prompt = system_prompt;
        }
        if let Some(provider_id) = provider_id {
            agent.provider_id = provider_id;
        }
        if let Some(model_id) = model_id {
            agent.model_id = model_id;
        }
        if let Some(status) = status {
            agent.status = status;
        }

        self.repo.save(agent).await.map_err(|e| EngineError::Fatal(e.to_string()))
    }

    /// Serialized status transition used by the worker executor around each
    /// dispatch: always restored to `idle` on both success and failure paths.
    pub async fn set_status(&self, id: &str, status: AgentStatus) -> anyhow::Result<()> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        if let Some(mut agent) = self.repo.get(id).await? {
            agent.status = status;
            self.repo.save(agent).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.repo.delete(id).await
    }

    pub async fn count(&self) -> anyhow::Result<usize> {
        self.repo.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryAgentRepository;

    fn service() -> AgentService {
        AgentService::new(Arc::new(InMemoryAgentRepository::new()))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let svc = service();
        let agent = svc
            .create("Worker1".into(), AgentRole::Worker, String::new(), "openai".into(), "gpt-4o-mini".into())
            .await
            .unwrap();
        let fetched = svc.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Worker1");
        assert_eq!(fetched.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn update_missing_agent_is_not_found() {
        let svc = service();
        let err = svc.update("missing", None, None, None, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_workers_excludes_supervisors() {
        let svc = service();
        svc.create("W".into(), AgentRole::Worker, String::new(), "openai".into(), "m".into()).await.unwrap();
        svc.create("S".into(), AgentRole::Supervisor, String::new(), "openai".into(), "m".into()).await.unwrap();
        let workers = svc.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "W");
    }

    #[tokio::test]
    async fn set_status_is_idempotent_on_unknown_id() {
        let svc = service();
        svc.set_status("missing", AgentStatus::Busy).await.unwrap();
    }
}
