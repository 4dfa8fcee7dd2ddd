//! SQLite persistence for memories.

use sqlx::SqlitePool;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{MemoryId, RepoId};
use crate::domain::models::{Memory, MemoryType};

/// Filter for recall queries. A repository filter matches both rows scoped
/// to that repository and rows with no repository scope.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub topic: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub repository_id: Option<RepoId>,
}

#[derive(Clone)]
pub struct SqliteMemoryRepository {
    pool: SqlitePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, memory: &Memory) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO memories (id, repository_id, topic, memory_type, content, confidence,
             reinforcement_count, last_reinforced_at, decay_rate, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(memory.id.as_str())
        .bind(memory.repository_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&memory.topic)
        .bind(memory.memory_type.as_str())
        .bind(&memory.content)
        .bind(memory.confidence)
        .bind(i64::from(memory.reinforcement_count))
        .bind(super::to_ms(memory.last_reinforced_at))
        .bind(memory.decay_rate)
        .bind(super::to_json_opt(&memory.metadata)?)
        .bind(super::to_ms(memory.created_at))
        .bind(super::to_ms(memory.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &MemoryId) -> CoreResult<Option<Memory>> {
        let row: Option<MemoryRow> = sqlx::query_as("SELECT * FROM memories WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Memory::try_from).transpose()
    }

    /// Fetch a memory or raise `NotFound`.
    pub async fn require(&self, id: &MemoryId) -> CoreResult<Memory> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("memory", id.as_str()))
    }

    /// Find the row that would be a duplicate of `(topic, content,
    /// repository_id)`.
    pub async fn find_duplicate(
        &self,
        topic: &str,
        content: &str,
        repository_id: Option<&RepoId>,
    ) -> CoreResult<Option<Memory>> {
        let row: Option<MemoryRow> = sqlx::query_as(
            "SELECT * FROM memories WHERE topic = ? AND content = ? AND repository_id IS ?",
        )
        .bind(topic)
        .bind(content)
        .bind(repository_id.map(|id| id.as_str().to_string()))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Memory::try_from).transpose()
    }

    /// Persist reinforcement state.
    pub async fn update_reinforcement(&self, memory: &Memory) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE memories SET confidence = ?, reinforcement_count = ?, last_reinforced_at = ?,
             updated_at = ? WHERE id = ?",
        )
        .bind(memory.confidence)
        .bind(i64::from(memory.reinforcement_count))
        .bind(super::to_ms(memory.last_reinforced_at))
        .bind(super::to_ms(memory.updated_at))
        .bind(memory.id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("memory", memory.id.as_str()));
        }
        Ok(())
    }

    /// Rows matching a recall filter. Decay scoring happens above this
    /// layer, so no ordering is promised here.
    pub async fn list(&self, filter: &MemoryFilter) -> CoreResult<Vec<Memory>> {
        let mut query = String::from("SELECT * FROM memories WHERE 1=1");
        if filter.topic.is_some() {
            query.push_str(" AND topic = ?");
        }
        if filter.memory_type.is_some() {
            query.push_str(" AND memory_type = ?");
        }
        if filter.repository_id.is_some() {
            query.push_str(" AND (repository_id = ? OR repository_id IS NULL)");
        }

        let mut q = sqlx::query_as::<_, MemoryRow>(&query);
        if let Some(topic) = &filter.topic {
            q = q.bind(topic.clone());
        }
        if let Some(ty) = &filter.memory_type {
            q = q.bind(ty.as_str());
        }
        if let Some(repo_id) = &filter.repository_id {
            q = q.bind(repo_id.as_str().to_string());
        }

        let rows: Vec<MemoryRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Memory::try_from).collect()
    }

    /// A page of rows for batched scans, ordered by id.
    pub async fn page(&self, after: Option<&MemoryId>, limit: u32) -> CoreResult<Vec<Memory>> {
        let rows: Vec<MemoryRow> = sqlx::query_as(
            "SELECT * FROM memories WHERE id > COALESCE(?, '') ORDER BY id LIMIT ?",
        )
        .bind(after.map(|id| id.as_str().to_string()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Memory::try_from).collect()
    }

    /// Delete a batch of rows. Returns how many went away.
    pub async fn delete_batch(&self, ids: &[MemoryId]) -> CoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!("DELETE FROM memories WHERE id IN ({placeholders})");
        let mut q = sqlx::query(&query);
        for id in ids {
            q = q.bind(id.as_str());
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: String,
    repository_id: Option<String>,
    topic: String,
    memory_type: String,
    content: String,
    confidence: f64,
    reinforcement_count: i64,
    last_reinforced_at: i64,
    decay_rate: f64,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<MemoryRow> for Memory {
    type Error = CoreError;

    fn try_from(row: MemoryRow) -> Result<Self, Self::Error> {
        let memory_type = MemoryType::from_str(&row.memory_type).ok_or_else(|| {
            CoreError::Serialization(format!("invalid memory type: {}", row.memory_type))
        })?;
        Ok(Memory {
            id: super::parse_id(&row.id)?,
            repository_id: super::parse_optional_id(row.repository_id)?,
            topic: row.topic,
            memory_type,
            content: row.content,
            confidence: row.confidence.clamp(0.0, 1.0),
            reinforcement_count: row.reinforcement_count.max(0) as u32,
            last_reinforced_at: super::from_ms(row.last_reinforced_at),
            decay_rate: row.decay_rate,
            metadata: super::parse_json_opt(row.metadata)?,
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteRepoRepository};
    use crate::domain::models::Repo;

    async fn setup() -> (SqliteMemoryRepository, SqlitePool) {
        let pool = create_migrated_test_pool().await.unwrap();
        (SqliteMemoryRepository::new(pool.clone()), pool)
    }

    #[tokio::test]
    async fn test_find_duplicate_distinguishes_repo_scope() {
        let (repo, pool) = setup().await;
        let repos = SqliteRepoRepository::new(pool);
        let r = Repo::new("/srv/app");
        repos.create(&r).await.unwrap();

        let global = Memory::new("sqlite", "use WAL");
        let scoped = Memory::new("sqlite", "use WAL").with_repository(r.id.clone());
        repo.insert(&global).await.unwrap();
        repo.insert(&scoped).await.unwrap();

        let found = repo.find_duplicate("sqlite", "use WAL", None).await.unwrap().unwrap();
        assert_eq!(found.id, global.id);
        let found = repo
            .find_duplicate("sqlite", "use WAL", Some(&r.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, scoped.id);
    }

    #[tokio::test]
    async fn test_repo_filter_includes_global_rows() {
        let (repo, pool) = setup().await;
        let repos = SqliteRepoRepository::new(pool);
        let r = Repo::new("/srv/app");
        repos.create(&r).await.unwrap();

        repo.insert(&Memory::new("t", "global")).await.unwrap();
        repo.insert(&Memory::new("t", "scoped").with_repository(r.id.clone()))
            .await
            .unwrap();

        let rows = repo
            .list(&MemoryFilter {
                repository_id: Some(r.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_paging_covers_all_rows() {
        let (repo, _pool) = setup().await;
        for i in 0..7 {
            repo.insert(&Memory::new("t", format!("fact {i}"))).await.unwrap();
        }

        let mut seen = 0;
        let mut cursor: Option<MemoryId> = None;
        loop {
            let page = repo.page(cursor.as_ref(), 3).await.unwrap();
            if page.is_empty() {
                break;
            }
            seen += page.len();
            cursor = page.last().map(|m| m.id.clone());
        }
        assert_eq!(seen, 7);
    }
}
