//! Agent domain model.
//!
//! Agents are external worker processes supervised by the runner pool. The
//! core tracks their registration, heartbeat, and current claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::{AgentId, TaskId, WorkflowId};

/// Role an agent plays in a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Orchestrates other agents
    Coordinator,
    /// Executes tasks
    Worker,
}

impl Default for AgentRole {
    fn default() -> Self {
        Self::Worker
    }
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coordinator" => Some(Self::Coordinator),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

/// Liveness/availability status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered and idle
    Online,
    /// Holding a task claim
    Busy,
    /// Deregistered or reaped
    Offline,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "online" => Some(Self::Online),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// An external worker process tracked by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    /// Workflow this agent is dedicated to, if any
    pub workflow_id: Option<WorkflowId>,
    /// Display name
    pub name: String,
    /// Runtime the agent runs on (e.g. a CLI agent binary name)
    pub runtime: String,
    /// Role in the fleet
    pub role: AgentRole,
    /// Liveness status
    pub status: AgentStatus,
    /// Declared capabilities
    pub capabilities: Option<Value>,
    /// Task currently claimed
    pub current_task_id: Option<TaskId>,
    /// Workspace the agent operates in
    pub workspace_path: Option<String>,
    /// Last heartbeat
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Free-form metadata
    pub metadata: Option<Value>,
    /// When registered
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Register a new agent.
    pub fn new(name: impl Into<String>, runtime: impl Into<String>) -> Self {
        let now = clock::now();
        Self {
            id: AgentId::new(),
            workflow_id: None,
            name: name.into(),
            runtime: runtime.into(),
            role: AgentRole::default(),
            status: AgentStatus::Online,
            capabilities: None,
            current_task_id: None,
            workspace_path: None,
            last_heartbeat: Some(now),
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = role;
        self
    }

    /// Dedicate the agent to a workflow.
    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Set declared capabilities.
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_online() {
        let agent = Agent::new("runner-1", "claude-code");
        assert_eq!(agent.status, AgentStatus::Online);
        assert_eq!(agent.role, AgentRole::Worker);
        assert!(agent.current_task_id.is_none());
    }

    #[test]
    fn test_role_and_status_round_trip() {
        assert_eq!(AgentRole::from_str("coordinator"), Some(AgentRole::Coordinator));
        assert_eq!(AgentStatus::from_str("busy"), Some(AgentStatus::Busy));
        assert_eq!(AgentStatus::from_str("nope"), None);
    }
}
