//! Deduplicating write path.

use std::sync::Arc;

use beebo_common::Result;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::dedup::{DuplicateDetector, ExistingMemory};
use crate::embedding::{embed_best_effort, EmbeddingProvider};
use crate::store::{self, InsertResult, MemoryStore};
use crate::types::{DedupPolicy, Memory, NewMemory, Supplied};

/// How an ingest call resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Created {
        id: String,
        last_updated: DateTime<Utc>,
    },
    /// Exact duplicate under the upsert policy; the existing row was refreshed
    Updated {
        id: String,
        last_updated: DateTime<Utc>,
    },
    /// Exact duplicate under the reject policy
    Duplicate { existing: ExistingMemory },
    SemanticDuplicate {
        existing: ExistingMemory,
        similarity: f32,
    },
}

impl IngestOutcome {
    /// Whether the store changed.
    pub fn is_written(&self) -> bool {
        matches!(self, IngestOutcome::Created { .. } | IngestOutcome::Updated { .. })
    }
}

pub struct Ingestor {
    store: Arc<MemoryStore>,
    detector: DuplicateDetector,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    policy: DedupPolicy,
}

impl Ingestor {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        policy: DedupPolicy,
        semantic_threshold: f32,
    ) -> Self {
        Self {
            detector: DuplicateDetector::new(store.clone(), semantic_threshold),
            store,
            embedder,
            policy,
        }
    }

    /// Store `new` unless it duplicates an existing memory.
    ///
    /// Exact duplicates (same normalized text) follow the configured policy.
    /// Near-duplicates by embedding are always rejected. The exact check runs
    /// first and short-circuits, so an exact duplicate never costs an
    /// embedding call.
    #[instrument(skip(self, new), fields(policy = ?self.policy, text_len = new.text.len()))]
    pub async fn ingest(&self, new: NewMemory) -> Result<IngestOutcome> {
        let supplied = new.supplied();
        let record = Memory::from_new(new, store::now());

        if let Some(existing) = self.detector.find_exact(&record.text_norm).await? {
            return match self.policy {
                DedupPolicy::Reject => {
                    info!(existing_id = %existing.id, "Rejected exact duplicate");
                    Ok(IngestOutcome::Duplicate {
                        existing: ExistingMemory::from(&existing),
                    })
                }
                DedupPolicy::Upsert => self.write(record, supplied).await,
            };
        }

        let embedding = embed_best_effort(self.embedder.as_ref(), &record.text).await;
        if let Some(vector) = &embedding {
            if let Some(found) = self.detector.find_semantic(vector).await? {
                info!(
                    existing_id = %found.existing.id,
                    similarity = found.similarity,
                    "Rejected semantic duplicate"
                );
                return Ok(IngestOutcome::SemanticDuplicate {
                    existing: found.existing,
                    similarity: found.similarity,
                });
            }
        }

        self.write(record.with_embedding(embedding), supplied).await
    }

    /// Final write. A concurrent insert of the same text can still land
    /// between the checks and here; the unique index resolves it.
    async fn write(&self, record: Memory, supplied: Supplied) -> Result<IngestOutcome> {
        match self.policy {
            DedupPolicy::Upsert => {
                let result = self.store.upsert(&record, supplied).await?;
                if result.created {
                    info!(id = %result.id, "Stored new memory");
                    Ok(IngestOutcome::Created {
                        id: result.id,
                        last_updated: result.last_updated,
                    })
                } else {
                    info!(id = %result.id, "Refreshed existing memory");
                    Ok(IngestOutcome::Updated {
                        id: result.id,
                        last_updated: result.last_updated,
                    })
                }
            }
            DedupPolicy::Reject => match self.store.insert_if_absent(&record).await? {
                InsertResult::Inserted(result) => {
                    info!(id = %result.id, "Stored new memory");
                    Ok(IngestOutcome::Created {
                        id: result.id,
                        last_updated: result.last_updated,
                    })
                }
                InsertResult::Conflict(existing) => Ok(IngestOutcome::Duplicate {
                    existing: ExistingMemory::from(&existing),
                }),
            },
        }
    }
}
