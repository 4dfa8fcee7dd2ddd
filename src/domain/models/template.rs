//! Plan template domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::TemplateId;

/// A named, reusable plan. The `template` blob has the same shape as a
/// `set_plan` input and is instantiated into workflows created with
/// `source_type = template`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Unique identifier
    pub id: TemplateId,
    /// Unique name used as the workflow's `source_ref`
    pub name: String,
    /// What the template is for
    pub description: Option<String>,
    /// The plan, as JSON
    pub template: Value,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Create a named template.
    pub fn new(name: impl Into<String>, template: Value) -> Self {
        let now = clock::now();
        Self {
            id: TemplateId::new(),
            name: name.into(),
            description: None,
            template,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
