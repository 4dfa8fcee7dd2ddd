//! Inter-agent message domain model.
//!
//! Durable messages between agents with threading, priorities, and
//! read/archive transitions. A null sender means the system itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::clock;
use crate::domain::ids::{AgentId, MessageId, TaskId, ThreadId, WorkflowId};

/// Kind of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Assign a task to the recipient
    TaskAssignment,
    /// Progress or state change notification
    StatusUpdate,
    /// A question expecting a response
    Query,
    /// Answer to a query
    Response,
    /// One of a filtered fan-out batch
    Broadcast,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "task_assignment",
            Self::StatusUpdate => "status_update",
            Self::Query => "query",
            Self::Response => "response",
            Self::Broadcast => "broadcast",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "task_assignment" => Some(Self::TaskAssignment),
            "status_update" => Some(Self::StatusUpdate),
            "query" => Some(Self::Query),
            "response" => Some(Self::Response),
            "broadcast" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// Priority of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Read/archive state of a message. `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Unread,
    Read,
    Archived,
}

impl Default for MessageStatus {
    fn default() -> Self {
        Self::Unread
    }
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
            Self::Archived => "archived",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unread" => Some(Self::Unread),
            "read" => Some(Self::Read),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A durable message between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: MessageId,
    /// Sending agent; None means the system
    pub sender_id: Option<AgentId>,
    /// Receiving agent
    pub recipient_id: AgentId,
    /// Kind of message
    pub message_type: MessageType,
    /// Subject line
    pub subject: Option<String>,
    /// Body text
    pub body: String,
    /// Priority
    pub priority: MessagePriority,
    /// Read/archive state
    pub status: MessageStatus,
    /// Related workflow
    pub workflow_id: Option<WorkflowId>,
    /// Related task
    pub task_id: Option<TaskId>,
    /// Message being replied to
    pub reply_to_id: Option<MessageId>,
    /// Conversation thread; replies inherit the parent's thread
    pub thread_id: ThreadId,
    /// When sent
    pub created_at: DateTime<Utc>,
    /// When first read
    pub read_at: Option<DateTime<Utc>>,
    /// After this instant the message is filtered from listings
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new unread message starting a fresh thread.
    pub fn new(
        sender_id: Option<AgentId>,
        recipient_id: AgentId,
        message_type: MessageType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            recipient_id,
            message_type,
            subject: None,
            body: body.into(),
            priority: MessagePriority::default(),
            status: MessageStatus::default(),
            workflow_id: None,
            task_id: None,
            reply_to_id: None,
            thread_id: ThreadId::new(),
            created_at: clock::now(),
            read_at: None,
            expires_at: None,
        }
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Relate to a workflow.
    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Relate to a task.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Mark as a reply; the caller supplies the parent's thread.
    pub fn with_reply_to(mut self, parent_id: MessageId, thread_id: ThreadId) -> Self {
        self.reply_to_id = Some(parent_id);
        self.thread_id = thread_id;
        self
    }

    /// Set an expiry instant.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the message is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| clock::now() > exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_mints_thread() {
        let msg = Message::new(None, AgentId::new(), MessageType::StatusUpdate, "hello");
        assert!(msg.thread_id.as_str().starts_with("thr_"));
        assert_eq!(msg.status, MessageStatus::Unread);
        assert!(msg.sender_id.is_none());
    }

    #[test]
    fn test_reply_inherits_thread() {
        let a = AgentId::new();
        let b = AgentId::new();
        let original = Message::new(Some(a.clone()), b.clone(), MessageType::Query, "?");
        let reply = Message::new(Some(b), a, MessageType::Response, "!")
            .with_reply_to(original.id.clone(), original.thread_id.clone());
        assert_eq!(reply.thread_id, original.thread_id);
        assert_eq!(reply.reply_to_id, Some(original.id));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Urgent > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
    }

    #[test]
    fn test_enum_round_trips() {
        for ty in [
            MessageType::TaskAssignment,
            MessageType::StatusUpdate,
            MessageType::Query,
            MessageType::Response,
            MessageType::Broadcast,
        ] {
            assert_eq!(MessageType::from_str(ty.as_str()), Some(ty));
        }
        for st in [MessageStatus::Unread, MessageStatus::Read, MessageStatus::Archived] {
            assert_eq!(MessageStatus::from_str(st.as_str()), Some(st));
        }
    }
}
