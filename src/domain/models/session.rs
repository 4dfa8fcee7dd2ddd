//! Session domain model.
//!
//! One session per host-process instance. Sessions heartbeat periodically
//! and are reaped after a timeout; at most one session is the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::SessionId;

/// One instance of the host process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,
    /// OS process id
    pub pid: u32,
    /// When the process started
    pub started_at: DateTime<Utc>,
    /// Last heartbeat
    pub last_heartbeat: DateTime<Utc>,
    /// Whether this session is the elected daemon
    pub is_daemon: bool,
    /// Free-form metadata
    pub metadata: Option<Value>,
}

impl Session {
    /// Create a session record for a process.
    pub fn new(pid: u32) -> Self {
        let now = clock::now();
        Self {
            id: SessionId::new(),
            pid,
            started_at: now,
            last_heartbeat: now,
            is_daemon: false,
            metadata: None,
        }
    }

    /// Mark as the daemon.
    pub fn with_daemon(mut self, is_daemon: bool) -> Self {
        self.is_daemon = is_daemon;
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the session's heartbeat is older than the timeout.
    pub fn is_stale(&self, timeout_ms: i64) -> bool {
        clock::to_ms(clock::now()) - clock::to_ms(self.last_heartbeat) > timeout_ms
    }
}
