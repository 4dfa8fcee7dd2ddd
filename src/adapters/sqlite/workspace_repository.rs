//! SQLite persistence for workspaces.

use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{WorkflowId, WorkspaceId};
use crate::domain::models::{Workspace, WorkspaceStatus};

#[derive(Clone)]
pub struct SqliteWorkspaceRepository {
    pool: SqlitePool,
}

impl SqliteWorkspaceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, workspace: &Workspace) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO workspaces (id, workflow_id, repository_id, path, branch, base_branch,
             status, merge_commit, pr_url, config, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace.id.as_str())
        .bind(workspace.workflow_id.as_str())
        .bind(workspace.repository_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&workspace.path)
        .bind(&workspace.branch)
        .bind(&workspace.base_branch)
        .bind(workspace.status.as_str())
        .bind(&workspace.merge_commit)
        .bind(&workspace.pr_url)
        .bind(super::to_json_opt(&workspace.config)?)
        .bind(super::to_ms(workspace.created_at))
        .bind(super::to_ms(workspace.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &WorkspaceId) -> CoreResult<Option<Workspace>> {
        let row: Option<WorkspaceRow> = sqlx::query_as("SELECT * FROM workspaces WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Workspace::try_from).transpose()
    }

    pub async fn list_by_workflow(&self, workflow_id: &WorkflowId) -> CoreResult<Vec<Workspace>> {
        let rows: Vec<WorkspaceRow> =
            sqlx::query_as("SELECT * FROM workspaces WHERE workflow_id = ? ORDER BY created_at")
                .bind(workflow_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Workspace::try_from).collect()
    }

    pub async fn set_status(
        &self,
        id: &WorkspaceId,
        status: WorkspaceStatus,
        merge_commit: Option<&str>,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE workspaces SET status = ?, merge_commit = COALESCE(?, merge_commit),
             updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(merge_commit)
        .bind(clock::now_ms())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workspace", id.as_str()));
        }
        Ok(())
    }

    pub async fn set_pr_url(&self, id: &WorkspaceId, pr_url: &str) -> CoreResult<()> {
        let result = sqlx::query("UPDATE workspaces SET pr_url = ?, updated_at = ? WHERE id = ?")
            .bind(pr_url)
            .bind(clock::now_ms())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workspace", id.as_str()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    workflow_id: String,
    repository_id: Option<String>,
    path: String,
    branch: String,
    base_branch: Option<String>,
    status: String,
    merge_commit: Option<String>,
    pr_url: Option<String>,
    config: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<WorkspaceRow> for Workspace {
    type Error = CoreError;

    fn try_from(row: WorkspaceRow) -> Result<Self, Self::Error> {
        let status = WorkspaceStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid workspace status: {}", row.status))
        })?;
        Ok(Workspace {
            id: super::parse_id(&row.id)?,
            workflow_id: super::parse_id(&row.workflow_id)?,
            repository_id: super::parse_optional_id(row.repository_id)?,
            path: row.path,
            branch: row.branch,
            base_branch: row.base_branch,
            status,
            merge_commit: row.merge_commit,
            pr_url: row.pr_url,
            config: super::parse_json_opt(row.config)?,
            created_at: super::from_ms(row.created_at),
            updated_at: super::from_ms(row.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteWorkflowRepository};
    use crate::domain::models::Workflow;

    async fn setup() -> (SqliteWorkspaceRepository, WorkflowId) {
        let pool = create_migrated_test_pool().await.unwrap();
        let wf = Workflow::new("w");
        SqliteWorkflowRepository::new(pool.clone())
            .create(&wf)
            .await
            .unwrap();
        (SqliteWorkspaceRepository::new(pool), wf.id)
    }

    #[tokio::test]
    async fn test_lifecycle_to_merged() {
        let (repo, wf_id) = setup().await;
        let ws = Workspace::new(wf_id.clone(), "/tmp/ws1", "caw/x").with_base_branch("main");
        repo.create(&ws).await.unwrap();

        repo.set_pr_url(&ws.id, "https://example.test/pr/1").await.unwrap();
        repo.set_status(&ws.id, WorkspaceStatus::Merged, Some("abc123"))
            .await
            .unwrap();

        let fetched = repo.get(&ws.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, WorkspaceStatus::Merged);
        assert_eq!(fetched.merge_commit.as_deref(), Some("abc123"));
        assert_eq!(fetched.pr_url.as_deref(), Some("https://example.test/pr/1"));
    }

    #[tokio::test]
    async fn test_list_by_workflow() {
        let (repo, wf_id) = setup().await;
        repo.create(&Workspace::new(wf_id.clone(), "/tmp/a", "caw/a"))
            .await
            .unwrap();
        repo.create(&Workspace::new(wf_id.clone(), "/tmp/b", "caw/b"))
            .await
            .unwrap();
        assert_eq!(repo.list_by_workflow(&wf_id).await.unwrap().len(), 2);
    }
}
