//! Adapts `engine-core`'s relational `PostgresCheckpointStore` (keyed by an
//! opaque `node` string) to the `CheckpointStore` trait `engine-orchestrator`
//! actually suspends against (keyed by a revision number) — the two crates
//! don't depend on each other, so this thin bridge lives at the one place
//! that does: the binary wiring layer.

use async_trait::async_trait;
use engine_core::PostgresCheckpointStore;
use engine_orchestrator::CheckpointStore;

pub struct PostgresCheckpointAdapter {
    inner: PostgresCheckpointStore,
}

impl PostgresCheckpointAdapter {
    pub fn new(inner: PostgresCheckpointStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointAdapter {
    async fn save(&self, task_id: &str, revision: u32) -> anyhow::Result<()> {
        self.inner.save(task_id, &revision.to_string()).await
    }

    async fn load(&self, task_id: &str) -> anyhow::Result<Option<u32>> {
        let node = self.inner.load(task_id).await?;
        Ok(node.and_then(|n| n.parse().ok()))
    }

    async fn clear(&self, task_id: &str) -> anyhow::Result<()> {
        self.inner.clear(task_id).await
    }
}
