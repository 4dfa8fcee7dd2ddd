//! SQLite persistence for registered source repositories.

use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::RepoId;
use crate::domain::models::Repo;

#[derive(Clone)]
pub struct SqliteRepoRepository {
    pool: SqlitePool,
}

impl SqliteRepoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, repo: &Repo) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO repositories (id, path, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(repo.id.as_str())
        .bind(&repo.path)
        .bind(&repo.name)
        .bind(super::to_ms(repo.created_at))
        .bind(super::to_ms(repo.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &RepoId) -> CoreResult<Option<Repo>> {
        let row: Option<RepoRow> = sqlx::query_as("SELECT * FROM repositories WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Repo::try_from).transpose()
    }

    pub async fn get_by_path(&self, path: &str) -> CoreResult<Option<Repo>> {
        let row: Option<RepoRow> = sqlx::query_as("SELECT * FROM repositories WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Repo::try_from).transpose()
    }

    /// Return the repository at `path`, registering it if unknown.
    pub async fn ensure(&self, path: &str) -> CoreResult<Repo> {
        if let Some(existing) = self.get_by_path(path).await? {
            return Ok(existing);
        }
        let repo = Repo::new(path);
        self.create(&repo).await?;
        Ok(repo)
    }

    pub async fn list(&self) -> CoreResult<Vec<Repo>> {
        let rows: Vec<RepoRow> = sqlx::query_as("SELECT * FROM repositories ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Repo::try_from).collect()
    }

    pub async fn set_name(&self, id: &RepoId, name: &str) -> CoreResult<()> {
        let result = sqlx::query("UPDATE repositories SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(clock::now_ms())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("repository", id.as_str()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RepoRow {
    id: String,
    path: String,
    name: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<RepoRow> for Repo {
    type Error = CoreError;

    fn try_from(row: RepoRow) -> Result<Self, Self::Error> {
        Ok(Repo {
            id: super::parse_id(&row.id)?,
            path: row.path,
            name: row.name,
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}
