//! Domain models for the caw orchestration core.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod memory;
pub mod message;
pub mod repo;
pub mod session;
pub mod task;
pub mod template;
pub mod workflow;
pub mod workspace;

pub use agent::{Agent, AgentRole, AgentStatus};
pub use checkpoint::{Checkpoint, CheckpointType};
pub use config::{deep_merge, AgentConfig, CawConfig, CycleMode, DbMode, PrConfig, Transport};
pub use memory::{Memory, MemoryType};
pub use message::{Message, MessagePriority, MessageStatus, MessageType};
pub use repo::Repo;
pub use session::Session;
pub use task::{ClaimOutcome, DependencyType, ReleaseOutcome, Task, TaskDependency, TaskStatus};
pub use template::Template;
pub use workflow::{LockOutcome, SourceType, Workflow, WorkflowStatus};
pub use workspace::{Workspace, WorkspaceStatus};
