//! Short digests of recent memories for stream subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use beebo_common::Result;
use beebo_llm::{LlmClient, LlmRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::types::Memory;

const DIGEST_INSTRUCTION: &str = "Summarize these memory items into 3 bullets:";

/// Produces a digest of a batch of memories.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `Ok(None)` when there is nothing worth summarizing.
    async fn summarize(&self, items: &[Memory]) -> Result<Option<String>>;
}

#[derive(Serialize)]
struct DigestItem<'a> {
    id: &'a str,
    ts: Option<DateTime<Utc>>,
    text: &'a str,
    tags: &'a [String],
}

/// Build the digest prompt for `items`.
pub fn digest_prompt(items: &[Memory]) -> Result<String> {
    let digest: Vec<DigestItem<'_>> = items
        .iter()
        .map(|m| DigestItem {
            id: &m.id,
            ts: m.ts,
            text: &m.text,
            tags: &m.tags,
        })
        .collect();
    Ok(format!(
        "{DIGEST_INSTRUCTION}\n\n{}",
        serde_json::to_string_pretty(&digest)?
    ))
}

/// Summarizer backed by a chat completion model.
pub struct LlmSummarizer {
    client: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_tokens: 200,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    #[instrument(skip(self, items), fields(model = self.client.model_name(), items = items.len()))]
    async fn summarize(&self, items: &[Memory]) -> Result<Option<String>> {
        if items.is_empty() {
            return Ok(None);
        }

        let request = LlmRequest::prompt(digest_prompt(items)?).with_max_tokens(self.max_tokens);
        let response = self.client.complete(request).await?;
        let text = response.content.trim();

        debug!(chars = text.len(), "Generated digest");
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
