//! Memory core for the Beebo bridge.
//!
//! Short free-form memories are ingested through a deduplicating write path,
//! kept in SQLite, recalled by substring, and streamed to subscribers.
//!
//! ```text
//!   NewMemory ──► Ingestor ──► exact check (text_norm) ──► embed ──► semantic check
//!                                                                      │
//!                                                                      ▼
//!                                                                 MemoryStore (SQLite)
//!                                                                      │
//!               RecallEngine ◄─────────────────────────────────────────┤
//!               ChangeFeed   ◄──── poll every interval ────────────────┘
//!                    │
//!                    └──► Summarizer (optional digest)
//! ```
//!
//! Embeddings and digests are optional. Without a provider the bridge keeps
//! exact deduplication and recall; without a summarizer the stream simply
//! omits digests.

pub mod dedup;
pub mod embedding;
pub mod feed;
pub mod ingest;
pub mod normalize;
pub mod retrieval;
pub mod store;
pub mod summary;
pub mod types;

pub use dedup::{cosine_similarity, DuplicateDetector, ExistingMemory, SemanticMatch};
pub use embedding::{build_embedding_provider, EmbeddingConfig, EmbeddingProvider, RemoteEmbedder};
pub use feed::{ChangeFeed, FeedConfig, FeedEvent};
pub use ingest::{IngestOutcome, Ingestor};
pub use normalize::normalize;
pub use retrieval::{Recall, RecallEngine};
pub use store::{InsertResult, MemoryStore, UpsertResult};
pub use summary::{LlmSummarizer, Summarizer};
pub use types::{DedupPolicy, IngestRequest, Memory, MemoryConfig, NewMemory, Supplied};
