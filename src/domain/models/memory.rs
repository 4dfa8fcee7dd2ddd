//! Memory domain model.
//!
//! Topic-keyed learning records with reinforcement and exponential decay.
//! Confidence decays with time since last reinforcement and is restored by
//! repeated observation of the same fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::{MemoryId, RepoId};

/// Milliseconds per day, for decay math.
const MS_PER_DAY: f64 = 86_400_000.0;

/// Kind of learning a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A recurring approach that works
    Pattern,
    /// Something that reliably goes wrong
    Pitfall,
    /// A choice that was made and why
    Decision,
    /// General observation
    Learning,
}

impl Default for MemoryType {
    fn default() -> Self {
        Self::Learning
    }
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Pitfall => "pitfall",
            Self::Decision => "decision",
            Self::Learning => "learning",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pattern" => Some(Self::Pattern),
            "pitfall" => Some(Self::Pitfall),
            "decision" => Some(Self::Decision),
            "learning" => Some(Self::Learning),
            _ => None,
        }
    }
}

/// A topic-keyed learning record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Repository scope; None applies everywhere
    pub repository_id: Option<RepoId>,
    /// Topic key for recall
    pub topic: String,
    /// Kind of learning
    pub memory_type: MemoryType,
    /// The learned content
    pub content: String,
    /// Stored confidence in [0, 1]
    pub confidence: f64,
    /// How many times this memory was reinforced
    pub reinforcement_count: u32,
    /// When last reinforced
    pub last_reinforced_at: DateTime<Utc>,
    /// Decay rate per day
    pub decay_rate: f64,
    /// Free-form metadata
    pub metadata: Option<Value>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Default decay rate per day.
    pub const DEFAULT_DECAY_RATE: f64 = 0.05;

    /// Create a new memory at full confidence.
    pub fn new(topic: impl Into<String>, content: impl Into<String>) -> Self {
        let now = clock::now();
        Self {
            id: MemoryId::new(),
            repository_id: None,
            topic: topic.into(),
            memory_type: MemoryType::default(),
            content: content.into(),
            confidence: 1.0,
            reinforcement_count: 0,
            last_reinforced_at: now,
            decay_rate: Self::DEFAULT_DECAY_RATE,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the memory type.
    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    /// Scope to a repository.
    pub fn with_repository(mut self, repository_id: RepoId) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    /// Set initial confidence, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the decay rate.
    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate.max(0.0);
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reinforce: move confidence halfway to 1 and bump the count.
    pub fn reinforce(&mut self) {
        self.confidence = (self.confidence + (1.0 - self.confidence) * 0.5).clamp(0.0, 1.0);
        self.reinforcement_count += 1;
        self.last_reinforced_at = clock::now();
        self.updated_at = self.last_reinforced_at;
    }

    /// Effective confidence at an instant:
    /// `stored * exp(-decay_rate * days_since_last_reinforcement)`,
    /// clamped to [0, 1].
    pub fn effective_confidence_at(&self, at: DateTime<Utc>) -> f64 {
        let elapsed_ms = clock::to_ms(at) - clock::to_ms(self.last_reinforced_at);
        let days = (elapsed_ms.max(0) as f64) / MS_PER_DAY;
        (self.confidence * (-self.decay_rate * days).exp()).clamp(0.0, 1.0)
    }

    /// Effective confidence now.
    pub fn effective_confidence(&self) -> f64 {
        self.effective_confidence_at(clock::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_memory_full_confidence() {
        let m = Memory::new("sqlite", "busy_timeout avoids lock errors");
        assert!((m.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(m.reinforcement_count, 0);
        assert!((m.decay_rate - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reinforce_halves_the_gap() {
        let mut m = Memory::new("t", "c").with_confidence(0.4);
        m.reinforce();
        assert!((m.confidence - 0.7).abs() < 1e-9);
        m.reinforce();
        assert!((m.confidence - 0.85).abs() < 1e-9);
        assert_eq!(m.reinforcement_count, 2);
    }

    #[test]
    fn test_decay_over_time() {
        let m = Memory::new("t", "c");
        let later = m.last_reinforced_at + Duration::days(10);
        let expected = (-0.05_f64 * 10.0).exp();
        assert!((m.effective_confidence_at(later) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_decay_is_clamped() {
        let m = Memory::new("t", "c").with_confidence(1.0);
        // Far future decays toward zero, never below
        let far = m.last_reinforced_at + Duration::days(100_000);
        let eff = m.effective_confidence_at(far);
        assert!((0.0..=1.0).contains(&eff));
        // A timestamp before last reinforcement must not inflate confidence
        let past = m.last_reinforced_at - Duration::days(5);
        assert!(m.effective_confidence_at(past) <= 1.0);
    }

    #[test]
    fn test_type_round_trip() {
        for ty in [
            MemoryType::Pattern,
            MemoryType::Pitfall,
            MemoryType::Decision,
            MemoryType::Learning,
        ] {
            assert_eq!(MemoryType::from_str(ty.as_str()), Some(ty));
        }
    }
}
