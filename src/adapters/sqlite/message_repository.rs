//! SQLite persistence for inter-agent messages.

use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::domain::clock;
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ids::{AgentId, MessageId, TaskId, ThreadId, WorkflowId};
use crate::domain::models::{Message, MessagePriority, MessageStatus, MessageType};

/// Filter for message listings. Expired messages are filtered out unless
/// `include_expired` is set.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
    pub message_type: Option<MessageType>,
    pub priority: Option<MessagePriority>,
    pub workflow_id: Option<WorkflowId>,
    pub task_id: Option<TaskId>,
    pub include_expired: bool,
    pub limit: Option<u32>,
}

/// Unread totals, overall and per priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    pub count: u64,
    pub by_priority: HashMap<MessagePriority, u64>,
}

#[derive(Clone)]
pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, message: &Message) -> CoreResult<()> {
        insert_with(&self.pool, message).await
    }

    /// Insert a broadcast batch in a single transaction: either every
    /// recipient gets the message or none does.
    pub async fn insert_batch(&self, messages: &[Message]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for message in messages {
            insert_with(&mut *tx, message).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &MessageId) -> CoreResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Message::try_from).transpose()
    }

    /// Fetch a message or raise `NotFound`.
    pub async fn require(&self, id: &MessageId) -> CoreResult<Message> {
        self.get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("message", id.as_str()))
    }

    /// Transition a single unread message to read. Returns whether the
    /// transition happened (false when already read or archived).
    pub async fn mark_read_if_unread(&self, id: &MessageId) -> CoreResult<bool> {
        let now = clock::now_ms();
        let result = sqlx::query(
            "UPDATE messages SET status = 'read', read_at = ? WHERE id = ? AND status = 'unread'",
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a set of messages read. Returns how many actually changed.
    pub async fn mark_read(&self, ids: &[MessageId]) -> CoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!(
            "UPDATE messages SET status = 'read', read_at = ?
             WHERE id IN ({placeholders}) AND status = 'unread'"
        );
        let mut q = sqlx::query(&query).bind(clock::now_ms());
        for id in ids {
            q = q.bind(id.as_str());
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Archive a set of messages; legal from both unread and read. Returns
    /// how many actually changed.
    pub async fn archive(&self, ids: &[MessageId]) -> CoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!(
            "UPDATE messages SET status = 'archived'
             WHERE id IN ({placeholders}) AND status IN ('unread', 'read')"
        );
        let mut q = sqlx::query(&query);
        for id in ids {
            q = q.bind(id.as_str());
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Messages for a recipient, newest first.
    pub async fn list_for_recipient(
        &self,
        recipient_id: &AgentId,
        filter: &MessageFilter,
    ) -> CoreResult<Vec<Message>> {
        let (clause, query_limit) = filter_clause(filter, 20);
        let query = format!(
            "SELECT * FROM messages WHERE recipient_id = ?{clause}
             ORDER BY created_at DESC LIMIT ?"
        );
        let mut q = sqlx::query_as::<_, MessageRow>(&query).bind(recipient_id.as_str());
        if let Some(status) = &filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(ty) = &filter.message_type {
            q = q.bind(ty.as_str());
        }
        if let Some(priority) = &filter.priority {
            q = q.bind(priority.as_str());
        }
        if let Some(workflow_id) = &filter.workflow_id {
            q = q.bind(workflow_id.as_str());
        }
        if let Some(task_id) = &filter.task_id {
            q = q.bind(task_id.as_str());
        }
        if !filter.include_expired {
            q = q.bind(clock::now_ms());
        }
        q = q.bind(query_limit);
        let rows: Vec<MessageRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    /// All messages, newest first.
    pub async fn list_all(&self, filter: &MessageFilter) -> CoreResult<Vec<Message>> {
        let (clause, query_limit) = filter_clause(filter, 50);
        let query = format!(
            "SELECT * FROM messages WHERE 1=1{clause} ORDER BY created_at DESC LIMIT ?"
        );
        let mut q = sqlx::query_as::<_, MessageRow>(&query);
        if let Some(status) = &filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(ty) = &filter.message_type {
            q = q.bind(ty.as_str());
        }
        if let Some(priority) = &filter.priority {
            q = q.bind(priority.as_str());
        }
        if let Some(workflow_id) = &filter.workflow_id {
            q = q.bind(workflow_id.as_str());
        }
        if let Some(task_id) = &filter.task_id {
            q = q.bind(task_id.as_str());
        }
        if !filter.include_expired {
            q = q.bind(clock::now_ms());
        }
        q = q.bind(query_limit);
        let rows: Vec<MessageRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    /// A thread in chronological order.
    pub async fn list_thread(&self, thread_id: &ThreadId) -> CoreResult<Vec<Message>> {
        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM messages WHERE thread_id = ? ORDER BY created_at")
                .bind(thread_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    /// Unread counts for one recipient, optionally restricted by priority.
    pub async fn count_unread(
        &self,
        recipient_id: &AgentId,
        priority: Option<MessagePriority>,
    ) -> CoreResult<UnreadCounts> {
        let mut query = String::from(
            "SELECT priority, COUNT(*) FROM messages
             WHERE recipient_id = ? AND status = 'unread'
               AND (expires_at IS NULL OR expires_at > ?)",
        );
        if priority.is_some() {
            query.push_str(" AND priority = ?");
        }
        query.push_str(" GROUP BY priority");

        let mut q = sqlx::query_as::<_, (String, i64)>(&query)
            .bind(recipient_id.as_str())
            .bind(clock::now_ms());
        if let Some(priority) = priority {
            q = q.bind(priority.as_str());
        }
        let rows: Vec<(String, i64)> = q.fetch_all(&self.pool).await?;
        Ok(fold_priority_counts(rows))
    }

    /// Unread counts across all recipients.
    pub async fn count_all_unread(&self) -> CoreResult<UnreadCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT priority, COUNT(*) FROM messages
             WHERE status = 'unread' AND (expires_at IS NULL OR expires_at > ?)
             GROUP BY priority",
        )
        .bind(clock::now_ms())
        .fetch_all(&self.pool)
        .await?;
        Ok(fold_priority_counts(rows))
    }
}

fn fold_priority_counts(rows: Vec<(String, i64)>) -> UnreadCounts {
    let mut counts = UnreadCounts::default();
    for (priority, count) in rows {
        if let Some(priority) = MessagePriority::from_str(&priority) {
            counts.count += count as u64;
            counts.by_priority.insert(priority, count as u64);
        }
    }
    counts
}

fn filter_clause(filter: &MessageFilter, default_limit: u32) -> (String, i64) {
    let mut clause = String::new();
    if filter.status.is_some() {
        clause.push_str(" AND status = ?");
    }
    if filter.message_type.is_some() {
        clause.push_str(" AND message_type = ?");
    }
    if filter.priority.is_some() {
        clause.push_str(" AND priority = ?");
    }
    if filter.workflow_id.is_some() {
        clause.push_str(" AND workflow_id = ?");
    }
    if filter.task_id.is_some() {
        clause.push_str(" AND task_id = ?");
    }
    if !filter.include_expired {
        clause.push_str(" AND (expires_at IS NULL OR expires_at > ?)");
    }
    (clause, i64::from(filter.limit.unwrap_or(default_limit)))
}

async fn insert_with<'e, E>(executor: E, message: &Message) -> CoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO messages (id, sender_id, recipient_id, message_type, subject, body,
         priority, status, workflow_id, task_id, reply_to_id, thread_id, created_at,
         read_at, expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message.id.as_str())
    .bind(message.sender_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(message.recipient_id.as_str())
    .bind(message.message_type.as_str())
    .bind(&message.subject)
    .bind(&message.body)
    .bind(message.priority.as_str())
    .bind(message.status.as_str())
    .bind(message.workflow_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(message.task_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(message.reply_to_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(message.thread_id.as_str())
    .bind(super::to_ms(message.created_at))
    .bind(super::to_ms_opt(message.read_at))
    .bind(super::to_ms_opt(message.expires_at))
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender_id: Option<String>,
    recipient_id: String,
    message_type: String,
    subject: Option<String>,
    body: String,
    priority: String,
    status: String,
    workflow_id: Option<String>,
    task_id: Option<String>,
    reply_to_id: Option<String>,
    thread_id: String,
    created_at: i64,
    read_at: Option<i64>,
    expires_at: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
    type Error = CoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = MessageType::from_str(&row.message_type).ok_or_else(|| {
            CoreError::Serialization(format!("invalid message type: {}", row.message_type))
        })?;
        let priority = MessagePriority::from_str(&row.priority).ok_or_else(|| {
            CoreError::Serialization(format!("invalid message priority: {}", row.priority))
        })?;
        let status = MessageStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid message status: {}", row.status))
        })?;
        Ok(Message {
            id: super::parse_id(&row.id)?,
            sender_id: super::parse_optional_id(row.sender_id)?,
            recipient_id: super::parse_id(&row.recipient_id)?,
            message_type,
            subject: row.subject,
            body: row.body,
            priority,
            status,
            workflow_id: super::parse_optional_id(row.workflow_id)?,
            task_id: super::parse_optional_id(row.task_id)?,
            reply_to_id: super::parse_optional_id(row.reply_to_id)?,
            thread_id: super::parse_id(&row.thread_id)?,
            created_at: super::from_ms(row.created_at),
            read_at: super::from_ms_opt(row.read_at),
            expires_at: super::from_ms_opt(row.expires_at),
        })
    }
}
