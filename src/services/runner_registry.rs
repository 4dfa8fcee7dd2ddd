//! Registry of live runner pools, keyed by workflow.
//!
//! Process-lifetime singleton: the only in-memory mutable state the core
//! keeps outside the store. One pool per workflow; starting an already
//! running workflow is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::domain::errors::CoreResult;
use crate::domain::ids::WorkflowId;
use crate::domain::models::WorkflowStatus;
use crate::domain::ports::{AgentSpawner, Vcs};
use crate::services::runner_pool::{RunnerPool, RunnerPoolConfig};

struct PoolEntry {
    stop: broadcast::Sender<()>,
    join: JoinHandle<CoreResult<WorkflowStatus>>,
}

pub struct RunnerRegistry {
    pool: sqlx::SqlitePool,
    spawner: Arc<dyn AgentSpawner>,
    vcs: Arc<dyn Vcs>,
    config: RunnerPoolConfig,
    entries: Mutex<HashMap<WorkflowId, PoolEntry>>,
}

impl RunnerRegistry {
    pub fn new(
        pool: sqlx::SqlitePool,
        spawner: Arc<dyn AgentSpawner>,
        vcs: Arc<dyn Vcs>,
        config: RunnerPoolConfig,
    ) -> Self {
        Self {
            pool,
            spawner,
            vcs,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start a pool for the workflow unless one is already live. Returns
    /// whether a new pool was started.
    pub async fn start(&self, workflow_id: &WorkflowId) -> bool {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(workflow_id) {
            if !entry.join.is_finished() {
                return false;
            }
        }

        let runner = RunnerPool::new(
            self.pool.clone(),
            workflow_id.clone(),
            self.spawner.clone(),
            self.vcs.clone(),
            self.config.clone(),
        );
        let stop = runner.stop_handle();
        let id = workflow_id.clone();
        let join = tokio::spawn(async move {
            let result = runner.run().await;
            if let Err(e) = &result {
                tracing::error!(workflow_id = %id, error = %e, "runner pool exited with error");
            }
            result
        });
        entries.insert(workflow_id.clone(), PoolEntry { stop, join });
        true
    }

    /// Whether a pool is currently live for the workflow.
    pub async fn is_running(&self, workflow_id: &WorkflowId) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(workflow_id)
            .is_some_and(|entry| !entry.join.is_finished())
    }

    /// Stop one pool and wait for it, returning its final result if it was
    /// live.
    pub async fn stop(&self, workflow_id: &WorkflowId) -> Option<CoreResult<WorkflowStatus>> {
        let entry = self.entries.lock().await.remove(workflow_id)?;
        let _ = entry.stop.send(());
        match entry.join.await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!(workflow_id = %workflow_id, error = %e, "runner pool panicked");
                None
            }
        }
    }

    /// Run a workflow to completion in the foreground.
    pub async fn run_blocking(&self, workflow_id: &WorkflowId) -> CoreResult<WorkflowStatus> {
        let runner = RunnerPool::new(
            self.pool.clone(),
            workflow_id.clone(),
            self.spawner.clone(),
            self.vcs.clone(),
            self.config.clone(),
        );
        runner.run().await
    }

    /// Stop every live pool.
    pub async fn stop_all(&self) {
        let ids: Vec<WorkflowId> = self.entries.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}
