//! Registered source repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::clock;
use crate::domain::ids::RepoId;

/// A source tree on disk that workflows operate against. The path is unique;
/// several workflows may reference the same repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    /// Unique identifier
    pub id: RepoId,
    /// Absolute path on disk, unique
    pub path: String,
    /// Optional display name
    pub name: Option<String>,
    /// When registered
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Repo {
    /// Register a repository at a path.
    pub fn new(path: impl Into<String>) -> Self {
        let now = clock::now();
        Self {
            id: RepoId::new(),
            path: path.into(),
            name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
