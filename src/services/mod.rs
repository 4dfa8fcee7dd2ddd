//! Core services of the orchestration engine.

pub mod context_assembler;
pub mod lock_service;
pub mod memory_service;
pub mod message_bus;
pub mod plan_graph;
pub mod pr_cycle;
pub mod runner_pool;
pub mod runner_registry;
pub mod scheduler;
pub mod session_service;
pub mod stagnation;
pub mod task_service;
pub mod workflow_service;

pub use context_assembler::{AssembledContext, ContextAssembler, ContextInclude};
pub use lock_service::LockService;
pub use memory_service::{CreateMemory, MemoryService, Recall, RecalledMemory};
pub use message_bus::{Broadcast, BroadcastReceipt, MessageBus, SendMessage, SendReceipt};
pub use plan_graph::{PlanInput, PlanTaskInput};
pub use pr_cycle::{resolve_cycle_mode, PrCycle};
pub use runner_pool::{RunnerPool, RunnerPoolConfig};
pub use runner_registry::RunnerRegistry;
pub use scheduler::{NextTasks, ScheduledTask, Scheduler, WorkflowProgress};
pub use session_service::{RegisterSession, SessionService};
pub use stagnation::{StagnationConfig, StagnationLevel, StagnationMonitor};
pub use task_service::{DependencyCheck, StatusChange, TaskService, TaskWithCheckpoints};
pub use workflow_service::{CreateWorkflow, PlanAdmission, TaskRemoval, WorkflowService};
