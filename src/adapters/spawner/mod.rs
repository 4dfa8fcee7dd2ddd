//! Agent spawner adapters: an external-command implementation and a
//! scripted mock for tests.

mod command;
mod mock;

pub use command::CommandSpawner;
pub use mock::{MockSpawner, MockSpawnResponse};
