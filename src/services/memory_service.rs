//! Memory store: topic-keyed learning records with reinforcement on
//! re-observation and exponential decay on read.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{MemoryFilter, SqliteMemoryRepository};
use crate::domain::clock;
use crate::domain::errors::CoreResult;
use crate::domain::ids::{MemoryId, RepoId};
use crate::domain::models::{Memory, MemoryType};

/// Batch size for the prune scan.
const PRUNE_PAGE_SIZE: u32 = 200;

/// Parameters for creating (or reinforcing) a memory.
#[derive(Debug, Clone, Default)]
pub struct CreateMemory {
    pub topic: String,
    pub content: String,
    pub memory_type: Option<MemoryType>,
    pub repository_id: Option<RepoId>,
    pub confidence: Option<f64>,
    pub decay_rate: Option<f64>,
    pub metadata: Option<Value>,
}

/// Recall query.
#[derive(Debug, Clone, Default)]
pub struct Recall {
    pub topic: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub repository_id: Option<RepoId>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

/// A recalled memory with its decayed confidence.
#[derive(Debug, Clone)]
pub struct RecalledMemory {
    pub memory: Memory,
    pub effective_confidence: f64,
}

#[derive(Clone)]
pub struct MemoryService {
    memories: SqliteMemoryRepository,
}

impl MemoryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            memories: SqliteMemoryRepository::new(pool),
        }
    }

    /// Create a memory, deduplicating on `(topic, content, repository)`.
    /// Observing a known fact again reinforces the existing row instead.
    pub async fn create(&self, params: CreateMemory) -> CoreResult<Memory> {
        if let Some(existing) = self
            .memories
            .find_duplicate(&params.topic, &params.content, params.repository_id.as_ref())
            .await?
        {
            return self.reinforce(&existing.id).await;
        }

        let mut memory = Memory::new(params.topic, params.content);
        if let Some(ty) = params.memory_type {
            memory = memory.with_type(ty);
        }
        if let Some(repo) = params.repository_id {
            memory = memory.with_repository(repo);
        }
        if let Some(confidence) = params.confidence {
            memory = memory.with_confidence(confidence);
        }
        if let Some(decay_rate) = params.decay_rate {
            memory = memory.with_decay_rate(decay_rate);
        }
        if let Some(metadata) = params.metadata {
            memory = memory.with_metadata(metadata);
        }
        self.memories.insert(&memory).await?;
        Ok(memory)
    }

    /// Reinforce: confidence moves halfway to 1.
    pub async fn reinforce(&self, id: &MemoryId) -> CoreResult<Memory> {
        let mut memory = self.memories.require(id).await?;
        memory.reinforce();
        self.memories.update_reinforcement(&memory).await?;
        Ok(memory)
    }

    /// Recall memories sorted by decayed confidence, best first. A
    /// repository filter also surfaces repository-agnostic rows.
    pub async fn recall(&self, query: Recall) -> CoreResult<Vec<RecalledMemory>> {
        let filter = MemoryFilter {
            topic: query.topic,
            memory_type: query.memory_type,
            repository_id: query.repository_id,
        };
        let now = clock::now();
        let min_confidence = query.min_confidence.unwrap_or(0.0);

        let mut recalled: Vec<RecalledMemory> = self
            .memories
            .list(&filter)
            .await?
            .into_iter()
            .map(|memory| RecalledMemory {
                effective_confidence: memory.effective_confidence_at(now),
                memory,
            })
            .filter(|r| r.effective_confidence >= min_confidence)
            .collect();

        recalled.sort_by(|a, b| {
            b.effective_confidence
                .partial_cmp(&a.effective_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recalled.truncate(query.limit.unwrap_or(50));
        Ok(recalled)
    }

    /// Delete memories whose decayed confidence fell below `threshold`.
    /// Scans in batches; returns how many rows were deleted.
    pub async fn prune(&self, threshold: Option<f64>) -> CoreResult<u64> {
        let threshold = threshold.unwrap_or(0.1);
        let now = clock::now();
        let mut deleted = 0u64;
        let mut cursor: Option<MemoryId> = None;

        loop {
            let page = self.memories.page(cursor.as_ref(), PRUNE_PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|m| m.id.clone());

            let doomed: Vec<MemoryId> = page
                .iter()
                .filter(|m| m.effective_confidence_at(now) < threshold)
                .map(|m| m.id.clone())
                .collect();
            deleted += self.memories.delete_batch(&doomed).await?;
        }

        if deleted > 0 {
            tracing::info!(deleted, threshold, "pruned decayed memories");
        }
        Ok(deleted)
    }

    pub async fn get(&self, id: &MemoryId) -> CoreResult<Memory> {
        self.memories.require(id).await
    }
}
