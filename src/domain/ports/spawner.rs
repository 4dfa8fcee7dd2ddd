//! Agent spawning capability consumed by the runner pool.
//!
//! The spawned agent is a black-box external process. The spawner reports
//! progress observations (turn count plus a state fingerprint) on a channel
//! so the stagnation monitor can watch the child without knowing how it
//! runs, and honors a shutdown broadcast for cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::domain::errors::CoreResult;
use crate::domain::ids::{TaskId, WorkflowId};

/// How to invoke the external agent command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Executable to run
    pub command: String,
    /// Arguments before the context payload
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl SpawnerConfig {
    /// Config that just invokes a runtime binary with no extra arguments.
    pub fn for_runtime(runtime: impl Into<String>) -> Self {
        Self {
            command: runtime.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }
}

/// One invocation of the external agent.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    /// Worktree the agent operates in, when one was provisioned
    pub workspace_path: Option<String>,
    /// Bounded-token context payload assembled by the core
    pub context: Value,
    pub spawner_config: SpawnerConfig,
}

/// A progress observation emitted by the spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnProgress {
    /// Turns the agent has taken so far
    pub turns: u32,
    /// Opaque fingerprint of the agent's externally visible state; repeats
    /// signal stagnation
    pub fingerprint: String,
}

/// Terminal result of a spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// The agent finished its task
    Completed {
        outcome: String,
        artifacts: Vec<String>,
    },
    /// The agent failed
    Failed { error: String },
}

/// Spawns and supervises external agent processes.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    /// Run the agent to completion. Progress observations go to `progress`;
    /// a message on `cancel` means terminate the child and return as soon as
    /// it is down.
    async fn run(
        &self,
        request: SpawnRequest,
        progress: mpsc::Sender<SpawnProgress>,
        cancel: broadcast::Receiver<()>,
    ) -> CoreResult<SpawnOutcome>;
}
