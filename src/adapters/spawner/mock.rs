//! Scripted `AgentSpawner` mock for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::domain::errors::CoreResult;
use crate::domain::ids::TaskId;
use crate::domain::ports::{AgentSpawner, SpawnOutcome, SpawnProgress, SpawnRequest};

/// Scripted response for one spawn.
#[derive(Debug, Clone)]
pub struct MockSpawnResponse {
    /// Outcome text on success
    pub outcome: String,
    /// Artifacts reported on success
    pub artifacts: Vec<String>,
    /// Whether to fail instead
    pub fail: bool,
    /// Error message when failing
    pub error_message: Option<String>,
    /// Progress observations emitted before finishing, as
    /// `(turns, fingerprint)` pairs
    pub progress: Vec<(u32, String)>,
    /// Delay between progress observations
    pub step_delay: Duration,
}

impl Default for MockSpawnResponse {
    fn default() -> Self {
        Self {
            outcome: "mock task completed".to_string(),
            artifacts: Vec::new(),
            fail: false,
            error_message: None,
            progress: vec![(1, "step-1".to_string())],
            step_delay: Duration::ZERO,
        }
    }
}

impl MockSpawnResponse {
    pub fn success(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    /// A response that repeats the same fingerprint forever until canceled,
    /// for stagnation tests.
    pub fn stuck(fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        Self {
            progress: (1..=10_000).map(|i| (i, fingerprint.clone())).collect(),
            step_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }
}

/// Mock spawner with per-task response overrides and a record of every
/// request it served.
#[derive(Clone, Default)]
pub struct MockSpawner {
    default_response: MockSpawnResponse,
    overrides: Arc<RwLock<HashMap<TaskId, MockSpawnResponse>>>,
    requests: Arc<RwLock<Vec<SpawnRequest>>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_response(response: MockSpawnResponse) -> Self {
        Self {
            default_response: response,
            ..Default::default()
        }
    }

    pub async fn set_response_for_task(&self, task_id: TaskId, response: MockSpawnResponse) {
        self.overrides.write().await.insert(task_id, response);
    }

    /// Every request served so far.
    pub async fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.read().await.clone()
    }

    async fn response_for(&self, task_id: &TaskId) -> MockSpawnResponse {
        self.overrides
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl AgentSpawner for MockSpawner {
    async fn run(
        &self,
        request: SpawnRequest,
        progress: mpsc::Sender<SpawnProgress>,
        mut cancel: broadcast::Receiver<()>,
    ) -> CoreResult<SpawnOutcome> {
        let response = self.response_for(&request.task_id).await;
        self.requests.write().await.push(request);

        for (turns, fingerprint) in response.progress {
            if cancel.try_recv().is_ok() {
                return Ok(SpawnOutcome::Failed {
                    error: "canceled".to_string(),
                });
            }
            let _ = progress.send(SpawnProgress { turns, fingerprint }).await;
            if !response.step_delay.is_zero() {
                tokio::time::sleep(response.step_delay).await;
            }
        }

        if response.fail {
            Ok(SpawnOutcome::Failed {
                error: response
                    .error_message
                    .unwrap_or_else(|| "mock failure".to_string()),
            })
        } else {
            Ok(SpawnOutcome::Completed {
                outcome: response.outcome,
                artifacts: response.artifacts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::WorkflowId;
    use crate::domain::ports::SpawnerConfig;

    fn request(task_id: TaskId) -> SpawnRequest {
        SpawnRequest {
            workflow_id: WorkflowId::new(),
            task_id,
            workspace_path: None,
            context: serde_json::json!({}),
            spawner_config: SpawnerConfig::for_runtime("mock"),
        }
    }

    #[tokio::test]
    async fn test_default_success() {
        let spawner = MockSpawner::new();
        let (tx, mut rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);

        let outcome = spawner.run(request(TaskId::new()), tx, cancel_rx).await.unwrap();
        assert!(matches!(outcome, SpawnOutcome::Completed { .. }));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_per_task_override() {
        let spawner = MockSpawner::new();
        let task_id = TaskId::new();
        spawner
            .set_response_for_task(task_id.clone(), MockSpawnResponse::failure("boom"))
            .await;

        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);
        let outcome = spawner.run(request(task_id), tx, cancel_rx).await.unwrap();
        assert_eq!(
            outcome,
            SpawnOutcome::Failed {
                error: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_stuck_agent() {
        let spawner = MockSpawner::with_default_response(MockSpawnResponse::stuck("same"));
        let (tx, mut rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        let handle = tokio::spawn({
            let spawner = spawner.clone();
            async move { spawner.run(request(TaskId::new()), tx, cancel_rx).await }
        });

        // Let a few observations through, then cancel.
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        cancel_tx.send(()).unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, SpawnOutcome::Failed { .. }));
    }
}
