//! Collaborator interfaces the core consumes but does not implement.

pub mod spawner;
pub mod vcs;

pub use spawner::{AgentSpawner, SpawnOutcome, SpawnProgress, SpawnRequest, SpawnerConfig};
pub use vcs::{PrStatus, RebaseOutcome, Vcs, WorktreeRequest};
