//! SQLite persistence adapters for the caw core.
//!
//! One repository per entity, all sharing the pool. Timestamps are stored as
//! INTEGER milliseconds, ids as their prefixed strings, and JSON blobs as
//! TEXT.

pub mod agent_repository;
pub mod checkpoint_repository;
pub mod connection;
pub mod memory_repository;
pub mod message_repository;
pub mod migrations;
pub mod repo_repository;
pub mod session_repository;
pub mod task_repository;
pub mod template_repository;
pub mod workflow_repository;
pub mod workspace_repository;

pub use agent_repository::{AgentFilter, SqliteAgentRepository};
pub use checkpoint_repository::SqliteCheckpointRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use memory_repository::{MemoryFilter, SqliteMemoryRepository};
pub use message_repository::{MessageFilter, SqliteMessageRepository, UnreadCounts};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use repo_repository::SqliteRepoRepository;
pub use session_repository::{CleanupReport, SqliteSessionRepository};
pub use task_repository::{BlockingPredecessor, SqliteTaskRepository};
pub use template_repository::SqliteTemplateRepository;
pub use workflow_repository::{LockInfo, SqliteWorkflowRepository, WorkflowFilter};
pub use workspace_repository::SqliteWorkspaceRepository;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};

/// Parse a prefixed id string from a row field.
pub fn parse_id<T: std::str::FromStr<Err = crate::domain::ids::ParseIdError>>(
    s: &str,
) -> CoreResult<T> {
    s.parse()
        .map_err(|e: crate::domain::ids::ParseIdError| CoreError::Serialization(e.to_string()))
}

/// Parse an optional prefixed id string from a row field.
pub fn parse_optional_id<T: std::str::FromStr<Err = crate::domain::ids::ParseIdError>>(
    s: Option<String>,
) -> CoreResult<Option<T>> {
    s.map(|s| parse_id(&s)).transpose()
}

/// Convert stored milliseconds to a datetime.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    clock::from_ms(ms)
}

/// Convert an optional stored milliseconds field to a datetime.
pub fn from_ms_opt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(clock::from_ms)
}

/// Convert a datetime to milliseconds for storage.
pub fn to_ms(ts: DateTime<Utc>) -> i64 {
    clock::to_ms(ts)
}

/// Convert an optional datetime to milliseconds for storage.
pub fn to_ms_opt(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(clock::to_ms)
}

/// Parse a JSON string from a row field.
pub fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> CoreResult<T> {
    serde_json::from_str(s).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Parse an optional JSON string from a row field.
pub fn parse_json_opt<T: serde::de::DeserializeOwned>(s: Option<String>) -> CoreResult<Option<T>> {
    s.map(|s| parse_json(&s)).transpose()
}

/// Serialize an optional value to a JSON string for storage.
pub fn to_json_opt<T: serde::Serialize>(value: &Option<T>) -> CoreResult<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| CoreError::Serialization(e.to_string())))
        .transpose()
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open (or create) a database and bring its schema up to date.
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, None).await?;
    let migrator = Migrator::new(pool.clone());
    migrator
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    Ok(pool)
}
