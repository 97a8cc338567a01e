//! Application state for the API server.

use std::sync::Arc;

use beebo_llm::build_llm_client;
use beebo_memory::{
    build_embedding_provider, ChangeFeed, EmbeddingProvider, Ingestor, LlmSummarizer,
    MemoryStore, RecallEngine, Summarizer,
};
use tracing::{info, warn};

use crate::auth::ApiToken;
use crate::config::ServerConfig;

/// Shared application state for the API server.
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub ingestor: Ingestor,
    pub recall: RecallEngine,
    pub feed: Arc<ChangeFeed>,

    /// `None` leaves the API open
    pub token: Option<ApiToken>,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Open the configured database and build the providers it names.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::open(&config.memory.db_path)?);
        let embedder = build_embedding_provider(&config.embedding)?;
        if let Some(embedder) = &embedder {
            info!(model = embedder.model_name(), "Semantic deduplication enabled");
        }

        let summarizer: Option<Arc<dyn Summarizer>> =
            if config.summary.enabled && config.summary.llm.resolve_api_key().is_some() {
                let client = build_llm_client(&config.summary.llm)?;
                info!(model = client.model_name(), "Stream digests enabled");
                Some(Arc::new(
                    LlmSummarizer::new(client).with_max_tokens(config.summary.max_tokens),
                ))
            } else {
                if config.summary.enabled {
                    warn!("No LLM API key configured; stream digests disabled");
                }
                None
            };

        Self::with_components(config, store, embedder, summarizer)
    }

    /// Assemble state around an already-open store and explicit providers.
    pub fn with_components(
        config: &ServerConfig,
        store: Arc<MemoryStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> anyhow::Result<Self> {
        let ingestor = Ingestor::new(
            store.clone(),
            embedder,
            config.memory.dedup_policy,
            config.memory.semantic_threshold,
        );
        let recall = RecallEngine::new(store.clone(), &config.memory)?;
        let feed = Arc::new(ChangeFeed::new(
            store.clone(),
            summarizer,
            config.stream.clone(),
        ));

        Ok(Self {
            store,
            ingestor,
            recall,
            feed,
            token: config.server.token.as_deref().map(ApiToken::new),
            start_time: std::time::Instant::now(),
        })
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
