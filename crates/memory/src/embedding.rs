//! Embedding providers for semantic deduplication.
//!
//! Embeddings are best-effort: a provider that is missing or failing never
//! blocks an insert, it only disables the semantic duplicate check for it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beebo_common::{BeeboError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub const DEFAULT_REMOTE_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_API_URL: &str = "https://api.openai.com";

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai", "local" or "none"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default)]
    pub api_url: Option<String>,

    /// Falls back to OPENAI_API_KEY when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_url: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

/// Build the configured provider, or `None` when embeddings are off.
///
/// The hosted OpenAI endpoint without a key is treated as "off" rather than
/// an error, so the bridge still runs with exact deduplication only.
pub fn build_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "none" | "" => Ok(None),
        "openai" => {
            let api_key = config.resolve_api_key();
            if api_key.is_none() && config.api_url.is_none() {
                warn!("No embedding API key configured; semantic deduplication disabled");
                return Ok(None);
            }
            let embedder = RemoteEmbedder::new(
                config.api_url.clone(),
                config.model.clone().unwrap_or_else(|| DEFAULT_REMOTE_MODEL.into()),
                api_key,
                Duration::from_millis(config.timeout_ms),
            )?;
            Ok(Some(Arc::new(embedder)))
        }
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let model = config.model.as_deref().unwrap_or(local::DEFAULT_LOCAL_MODEL);
            Ok(Some(Arc::new(local::LocalEmbedder::from_model_str(model)?)))
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(BeeboError::Config(
            "embedding provider 'local' requires the local-embeddings feature".into(),
        )),
        other => Err(BeeboError::Config(format!(
            "unknown embedding provider '{other}' (expected openai, local or none)"
        ))),
    }
}

/// Embed `text` if a provider is available, logging and swallowing failures.
pub async fn embed_best_effort(
    provider: Option<&Arc<dyn EmbeddingProvider>>,
    text: &str,
) -> Option<Vec<f32>> {
    let provider = match provider {
        Some(p) => p,
        None => {
            debug!("{}", BeeboError::EmbeddingUnavailable("no provider configured".into()));
            return None;
        }
    };

    match provider.embed(text).await {
        Ok(vector) if !vector.is_empty() => Some(vector),
        Ok(_) => {
            warn!(model = provider.model_name(), "Embedding provider returned an empty vector");
            None
        }
        Err(e) => {
            warn!(model = provider.model_name(), error = %e, "Embedding failed; skipping semantic check");
            None
        }
    }
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct RemoteEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: Option<String>,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_API_URL.into());
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BeeboError::Config(format!("failed to build embedding HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            http_client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    #[instrument(skip(self, text), fields(model = %self.model, text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingsRequest {
            model: &self.model,
            input: text,
        };

        let mut request = self.http_client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BeeboError::EmbeddingUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BeeboError::EmbeddingUnavailable(format!(
                "embeddings API error {status}: {text}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| BeeboError::EmbeddingUnavailable(format!("bad response body: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BeeboError::EmbeddingUnavailable("empty embeddings response".into()))?;

        debug!(dimension = vector.len(), "Generated embedding");
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(feature = "local-embeddings")]
pub mod local {
    //! In-process embeddings via fastembed. The model is loaded on first use.

    use std::sync::Arc;

    use async_trait::async_trait;
    use beebo_common::{BeeboError, Result};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use tokio::task;
    use tracing::{debug, info, instrument};

    use super::EmbeddingProvider;

    pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

    pub struct LocalEmbedder {
        name: String,
        model_id: EmbeddingModel,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub fn from_model_str(name: &str) -> Result<Self> {
            let model_id = match name {
                "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
                "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
                "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
                "nomic-embed-text-v1.5" => EmbeddingModel::NomicEmbedTextV15,
                "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
                _ => {
                    return Err(BeeboError::Config(format!(
                        "unknown local embedding model '{name}'"
                    )));
                }
            };
            Ok(Self {
                name: name.to_string(),
                model_id,
                model: OnceCell::new(),
            })
        }

        fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>> {
            self.model
                .get_or_try_init(|| {
                    info!(model = %self.name, "Initializing local embedding model");
                    let mut options = InitOptions::new(self.model_id.clone());
                    options.show_download_progress = true;
                    TextEmbedding::try_new(options)
                        .map(Arc::new)
                        .map_err(|e| BeeboError::EmbeddingUnavailable(format!("model init: {e}")))
                })
                .cloned()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbedder {
        #[instrument(skip(self, text), fields(model = %self.name, text_len = text.len()))]
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let model = self.get_or_init_model()?;
            let text = text.to_string();

            let embeddings = task::spawn_blocking(move || model.embed(vec![text], None))
                .await
                .map_err(|e| BeeboError::EmbeddingUnavailable(format!("blocking task: {e}")))?
                .map_err(|e| BeeboError::EmbeddingUnavailable(e.to_string()))?;

            let vector = embeddings
                .into_iter()
                .next()
                .ok_or_else(|| BeeboError::EmbeddingUnavailable("empty embedding result".into()))?;
            debug!(dimension = vector.len(), "Generated local embedding");
            Ok(vector)
        }

        fn model_name(&self) -> &str {
            &self.name
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(BeeboError::EmbeddingUnavailable("connection refused".into()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn none_provider_disables_embeddings() {
        let config = EmbeddingConfig {
            provider: "none".into(),
            ..Default::default()
        };
        assert!(build_embedding_provider(&config).unwrap().is_none());
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_embedding_provider(&config),
            Err(BeeboError::Config(_))
        ));
    }

    #[test]
    fn custom_url_builds_without_key() {
        let config = EmbeddingConfig {
            api_url: Some("http://localhost:11434/".into()),
            model: Some("nomic-embed-text".into()),
            ..Default::default()
        };
        let provider = build_embedding_provider(&config).unwrap().unwrap();
        assert_eq!(provider.model_name(), "nomic-embed-text");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let embedder = RemoteEmbedder::new(
            Some("http://localhost:8080/".into()),
            DEFAULT_REMOTE_MODEL.into(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:8080/v1/embeddings");
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let failing: Arc<dyn EmbeddingProvider> = Arc::new(FailingEmbedder);
        assert!(embed_best_effort(Some(&failing), "hello").await.is_none());
        assert!(embed_best_effort(None, "hello").await.is_none());
    }
}
