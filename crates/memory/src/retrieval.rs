//! Read paths: recall by substring plus the filtered listings.

use std::sync::Arc;

use beebo_common::{BeeboError, Result};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::normalize::normalize;
use crate::store::MemoryStore;
use crate::types::{Memory, MemoryConfig};

/// Result of a recall query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recall {
    pub found: bool,
    pub count: usize,
    pub memories: Vec<Memory>,
}

impl From<Vec<Memory>> for Recall {
    fn from(memories: Vec<Memory>) -> Self {
        Self {
            found: !memories.is_empty(),
            count: memories.len(),
            memories,
        }
    }
}

/// Default and maximum row counts for each read path.
#[derive(Debug, Clone, Copy)]
struct Limits {
    recall: usize,
    list: usize,
    filter: usize,
    max: usize,
}

impl Limits {
    fn pick(&self, requested: Option<usize>, default: usize) -> usize {
        match requested {
            Some(0) | None => default,
            Some(n) => n.min(self.max),
        }
    }
}

pub struct RecallEngine {
    store: Arc<MemoryStore>,
    limits: Limits,
    time_zone: Tz,
}

impl RecallEngine {
    pub fn new(store: Arc<MemoryStore>, config: &MemoryConfig) -> Result<Self> {
        Ok(Self {
            store,
            limits: Limits {
                recall: config.recall_limit,
                list: config.list_limit,
                filter: config.filter_limit,
                max: config.max_limit,
            },
            time_zone: config.time_zone()?,
        })
    }

    /// Memories whose normalized text contains the normalized query,
    /// most recently updated first.
    pub async fn recall(&self, query: &str, limit: Option<usize>) -> Result<Recall> {
        let needle = normalize(query);
        if needle.is_empty() {
            return Err(BeeboError::validation("q required"));
        }

        let limit = self.limits.pick(limit, self.limits.recall);
        let memories = self.store.search(&needle, limit).await?;
        debug!(query = %needle, limit, hits = memories.len(), "Recall");
        Ok(Recall::from(memories))
    }

    pub async fn all(&self, limit: Option<usize>) -> Result<Vec<Memory>> {
        self.store
            .list_all(self.limits.pick(limit, self.limits.list))
            .await
    }

    pub async fn by_tag(&self, tag: &str, limit: Option<usize>) -> Result<Vec<Memory>> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(BeeboError::validation("tag required"));
        }
        self.store
            .list_by_tag(tag, self.limits.pick(limit, self.limits.filter))
            .await
    }

    pub async fn by_type(&self, memory_type: &str, limit: Option<usize>) -> Result<Vec<Memory>> {
        let memory_type = memory_type.trim();
        if memory_type.is_empty() {
            return Err(BeeboError::validation("type required"));
        }
        self.store
            .list_by_type(memory_type, self.limits.pick(limit, self.limits.filter))
            .await
    }

    /// Memories created since local midnight in the configured time zone.
    pub async fn today(&self) -> Result<Vec<Memory>> {
        self.store.list_created_today(self.time_zone).await
    }
}
