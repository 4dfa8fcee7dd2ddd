//! Inter-agent message bus: send, broadcast-by-filter, threads, unread
//! counts, and read/archive transitions.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{
    AgentFilter, MessageFilter, SqliteAgentRepository, SqliteMessageRepository, UnreadCounts,
};
use crate::domain::errors::CoreResult;
use crate::domain::ids::{AgentId, MessageId, TaskId, ThreadId, WorkflowId};
use crate::domain::models::{Message, MessagePriority, MessageType};

/// Parameters for a direct send. A `None` sender is the system.
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub sender_id: Option<AgentId>,
    pub recipient_id: AgentId,
    pub message_type: MessageType,
    pub body: String,
    pub subject: Option<String>,
    pub priority: Option<MessagePriority>,
    pub workflow_id: Option<WorkflowId>,
    pub task_id: Option<TaskId>,
    pub reply_to_id: Option<MessageId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SendMessage {
    pub fn new(
        sender_id: Option<AgentId>,
        recipient_id: AgentId,
        message_type: MessageType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            recipient_id,
            message_type,
            body: body.into(),
            subject: None,
            priority: None,
            workflow_id: None,
            task_id: None,
            reply_to_id: None,
            expires_at: None,
        }
    }
}

/// Parameters for a filtered broadcast.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub sender_id: AgentId,
    pub recipient_filter: AgentFilter,
    pub body: String,
    pub subject: Option<String>,
    pub priority: Option<MessagePriority>,
    pub workflow_id: Option<WorkflowId>,
    pub task_id: Option<TaskId>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a send produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: MessageId,
    pub thread_id: ThreadId,
}

/// What a broadcast produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastReceipt {
    pub sent_count: usize,
    pub message_ids: Vec<MessageId>,
}

#[derive(Clone)]
pub struct MessageBus {
    messages: SqliteMessageRepository,
    agents: SqliteAgentRepository,
}

impl MessageBus {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            messages: SqliteMessageRepository::new(pool.clone()),
            agents: SqliteAgentRepository::new(pool),
        }
    }

    /// Send one message. A reply inherits the parent's thread; anything
    /// else starts a new one.
    pub async fn send(&self, params: SendMessage) -> CoreResult<SendReceipt> {
        let mut message = Message::new(
            params.sender_id,
            params.recipient_id,
            params.message_type,
            params.body,
        );
        message.subject = params.subject;
        message.workflow_id = params.workflow_id;
        message.task_id = params.task_id;
        message.expires_at = params.expires_at;
        if let Some(priority) = params.priority {
            message.priority = priority;
        }
        if let Some(reply_to) = params.reply_to_id {
            let parent = self.messages.require(&reply_to).await?;
            message = message.with_reply_to(parent.id, parent.thread_id);
        }

        self.messages.insert(&message).await?;
        Ok(SendReceipt {
            id: message.id,
            thread_id: message.thread_id,
        })
    }

    /// Broadcast to every agent matching the filter, excluding the sender.
    /// One transaction; one shared thread. An empty match sends nothing.
    pub async fn broadcast(&self, params: Broadcast) -> CoreResult<BroadcastReceipt> {
        let recipients = self.agents.list(&params.recipient_filter).await?;
        let thread_id = ThreadId::new();

        let mut batch = Vec::new();
        for recipient in recipients {
            if recipient.id == params.sender_id {
                continue;
            }
            let mut message = Message::new(
                Some(params.sender_id.clone()),
                recipient.id,
                MessageType::Broadcast,
                params.body.clone(),
            );
            message.subject = params.subject.clone();
            message.workflow_id = params.workflow_id.clone();
            message.task_id = params.task_id.clone();
            message.expires_at = params.expires_at;
            message.thread_id = thread_id.clone();
            if let Some(priority) = params.priority {
                message.priority = priority;
            }
            batch.push(message);
        }

        self.messages.insert_batch(&batch).await?;
        tracing::debug!(sent = batch.len(), thread_id = %thread_id, "broadcast");
        Ok(BroadcastReceipt {
            sent_count: batch.len(),
            message_ids: batch.into_iter().map(|m| m.id).collect(),
        })
    }

    /// Fetch one message, optionally transitioning unread → read.
    pub async fn get(&self, id: &MessageId, mark_read: bool) -> CoreResult<Message> {
        if mark_read {
            self.messages.mark_read_if_unread(id).await?;
        }
        self.messages.require(id).await
    }

    /// Mark messages read; the count is how many actually changed.
    pub async fn mark_read(&self, ids: &[MessageId]) -> CoreResult<u64> {
        self.messages.mark_read(ids).await
    }

    /// Archive messages; legal from unread and read, terminal afterwards.
    pub async fn archive(&self, ids: &[MessageId]) -> CoreResult<u64> {
        self.messages.archive(ids).await
    }

    /// An agent's inbox, newest first (default limit 20).
    pub async fn list(
        &self,
        agent_id: &AgentId,
        filter: &MessageFilter,
    ) -> CoreResult<Vec<Message>> {
        self.messages.list_for_recipient(agent_id, filter).await
    }

    /// The global message stream, newest first (default limit 50).
    pub async fn list_all(&self, filter: &MessageFilter) -> CoreResult<Vec<Message>> {
        self.messages.list_all(filter).await
    }

    /// A thread in chronological order.
    pub async fn get_thread(&self, thread_id: &ThreadId) -> CoreResult<Vec<Message>> {
        self.messages.list_thread(thread_id).await
    }

    pub async fn count_unread(
        &self,
        agent_id: &AgentId,
        priority: Option<MessagePriority>,
    ) -> CoreResult<UnreadCounts> {
        self.messages.count_unread(agent_id, priority).await
    }

    pub async fn count_all_unread(&self) -> CoreResult<UnreadCounts> {
        self.messages.count_all_unread().await
    }
}
