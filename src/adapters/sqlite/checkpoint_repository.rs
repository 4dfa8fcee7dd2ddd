//! SQLite persistence for checkpoints.
//!
//! Checkpoints are append-only; `append` assigns the next dense per-task
//! sequence number inside a transaction so concurrent writers never gap or
//! collide.

use sqlx::SqlitePool;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{CheckpointId, TaskId};
use crate::domain::models::{Checkpoint, CheckpointType};

#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a checkpoint at the next sequence position for the task.
    pub async fn append(
        &self,
        task_id: &TaskId,
        checkpoint_type: CheckpointType,
        summary: &str,
        detail: Option<&serde_json::Value>,
        files_changed: Option<&[String]>,
    ) -> CoreResult<Checkpoint> {
        let mut tx = self.pool.begin().await?;

        let next_seq: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM checkpoints WHERE task_id = ?",
        )
        .bind(task_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let now = clock::now_ms();
        let mut checkpoint = Checkpoint::new(
            task_id.clone(),
            next_seq.0.max(1) as u32,
            checkpoint_type,
            summary,
        );
        checkpoint.detail = detail.cloned();
        checkpoint.files_changed = files_changed.map(<[String]>::to_vec);
        checkpoint.created_at = clock::from_ms(now);

        sqlx::query(
            "INSERT INTO checkpoints (id, task_id, sequence, checkpoint_type, summary, detail,
             files_changed, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(checkpoint.id.as_str())
        .bind(task_id.as_str())
        .bind(i64::from(checkpoint.sequence))
        .bind(checkpoint.checkpoint_type.as_str())
        .bind(&checkpoint.summary)
        .bind(super::to_json_opt(&checkpoint.detail)?)
        .bind(super::to_json_opt(&checkpoint.files_changed)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(checkpoint)
    }

    pub async fn get(&self, id: &CheckpointId) -> CoreResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Checkpoint::try_from).transpose()
    }

    /// Checkpoints for a task in sequence order.
    pub async fn list_for_task(&self, task_id: &TaskId) -> CoreResult<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> =
            sqlx::query_as("SELECT * FROM checkpoints WHERE task_id = ? ORDER BY sequence")
                .bind(task_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Checkpoint::try_from).collect()
    }

    /// The most recent `limit` checkpoints for a task, oldest first.
    pub async fn list_recent(&self, task_id: &TaskId, limit: u32) -> CoreResult<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT * FROM (
                 SELECT * FROM checkpoints WHERE task_id = ? ORDER BY sequence DESC LIMIT ?
             ) ORDER BY sequence",
        )
        .bind(task_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Checkpoint::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    task_id: String,
    sequence: i64,
    checkpoint_type: String,
    summary: String,
    detail: Option<String>,
    files_changed: Option<String>,
    created_at: i64,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = CoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let checkpoint_type = CheckpointType::from_str(&row.checkpoint_type).ok_or_else(|| {
            CoreError::Serialization(format!("invalid checkpoint type: {}", row.checkpoint_type))
        })?;
        Ok(Checkpoint {
            id: super::parse_id(&row.id)?,
            task_id: super::parse_id(&row.task_id)?,
            sequence: row.sequence.max(0) as u32,
            checkpoint_type,
            summary: row.summary,
            detail: super::parse_json_opt(row.detail)?,
            files_changed: super::parse_json_opt(row.files_changed)?,
            created_at: super::from_ms(row.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteWorkflowRepository};
    use crate::domain::models::{Task, Workflow};

    async fn setup() -> (SqliteCheckpointRepository, TaskId) {
        let pool = create_migrated_test_pool().await.unwrap();
        let workflows = SqliteWorkflowRepository::new(pool.clone());
        let wf = Workflow::new("w");
        workflows.create(&wf).await.unwrap();
        let task = Task::new(wf.id.clone(), "t", 1);
        workflows.append_task(&task, &[]).await.unwrap();
        (SqliteCheckpointRepository::new(pool), task.id)
    }

    #[tokio::test]
    async fn test_append_assigns_dense_sequence() {
        let (repo, task_id) = setup().await;

        let c1 = repo
            .append(&task_id, CheckpointType::Plan, "planned", None, None)
            .await
            .unwrap();
        let c2 = repo
            .append(&task_id, CheckpointType::Progress, "halfway", None, None)
            .await
            .unwrap();
        let c3 = repo
            .append(&task_id, CheckpointType::Complete, "done", None, None)
            .await
            .unwrap();

        assert_eq!((c1.sequence, c2.sequence, c3.sequence), (1, 2, 3));

        let all = repo.list_for_task(&task_id).await.unwrap();
        let sequences: Vec<u32> = all.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_list_recent_keeps_chronological_order() {
        let (repo, task_id) = setup().await;
        for i in 1..=5 {
            repo.append(&task_id, CheckpointType::Progress, &format!("step {i}"), None, None)
                .await
                .unwrap();
        }

        let recent = repo.list_recent(&task_id, 3).await.unwrap();
        let sequences: Vec<u32> = recent.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_detail_and_files_round_trip() {
        let (repo, task_id) = setup().await;
        let detail = serde_json::json!({"tool": "editor"});
        let files = vec!["a.rs".to_string(), "b.rs".to_string()];
        let cp = repo
            .append(&task_id, CheckpointType::Decision, "chose", Some(&detail), Some(&files))
            .await
            .unwrap();

        let fetched = repo.get(&cp.id).await.unwrap().unwrap();
        assert_eq!(fetched.detail, Some(detail));
        assert_eq!(fetched.files_changed, Some(files));
    }
}
