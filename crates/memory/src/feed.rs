//! Change stream of recent memories.
//!
//! Each subscriber gets its own polling task: a welcome, the current window of
//! recent items oldest-first, an optional digest, then one event per interval.
//! Changed windows are pushed again, unchanged ones produce a ping. The task
//! ends as soon as the receiving side is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::MemoryStore;
use crate::summary::Summarizer;
use crate::types::Memory;

pub const WELCOME_MESSAGE: &str = "Beebo memory bridge connected";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Items per snapshot when the subscriber does not ask for a limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Polling and keepalive interval
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Items fed to the summarizer
    #[serde(default = "default_digest_size")]
    pub digest_size: usize,

    /// Send a fresh digest whenever the window changes, not only on connect
    #[serde(default)]
    pub resummarize_on_change: bool,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_limit() -> usize {
    50
}

fn default_max_limit() -> usize {
    500
}

fn default_interval_ms() -> u64 {
    20_000
}

fn default_digest_size() -> usize {
    25
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            interval_ms: default_interval_ms(),
            digest_size: default_digest_size(),
            resummarize_on_change: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl FeedConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    fn effective_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(0) | None => self.default_limit,
            Some(n) => n.min(self.max_limit),
        }
    }
}

/// One message on the change stream. Serializes with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    McpWelcome { ts: DateTime<Utc>, msg: String },
    MemoryItem { item: Memory },
    SynthSummary { text: String },
    Ping,
}

impl FeedEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            FeedEvent::McpWelcome { .. } => "mcp_welcome",
            FeedEvent::MemoryItem { .. } => "memory_item",
            FeedEvent::SynthSummary { .. } => "synth_summary",
            FeedEvent::Ping => "ping",
        }
    }

    fn welcome() -> Self {
        FeedEvent::McpWelcome {
            ts: Utc::now(),
            msg: WELCOME_MESSAGE.into(),
        }
    }
}

/// Identity of a snapshot: which rows, at which revision.
type Fingerprint = Vec<(String, DateTime<Utc>)>;

fn fingerprint(items: &[Memory]) -> Fingerprint {
    items
        .iter()
        .map(|m| (m.id.clone(), m.last_updated))
        .collect()
}

/// Fold a fresh snapshot into `current`. Returns the items to push when the
/// window changed; a failed query (`None`) leaves `current` as it was.
fn advance(current: &mut Option<Fingerprint>, latest: Option<Vec<Memory>>) -> Option<Vec<Memory>> {
    let latest = latest?;
    let latest_fp = fingerprint(&latest);
    if current.as_ref() == Some(&latest_fp) {
        return None;
    }
    *current = Some(latest_fp);
    Some(latest)
}

pub struct ChangeFeed {
    store: Arc<MemoryStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: FeedConfig,
}

impl ChangeFeed {
    pub fn new(
        store: Arc<MemoryStore>,
        summarizer: Option<Arc<dyn Summarizer>>,
        config: FeedConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            config,
        }
    }

    /// Start a subscription. Dropping the receiver stops its polling task.
    pub fn subscribe(self: &Arc<Self>, limit: Option<usize>) -> mpsc::Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let feed = Arc::clone(self);
        let limit = self.config.effective_limit(limit);

        tokio::spawn(async move {
            info!(limit, "Change stream subscriber connected");
            feed.run(limit, tx).await;
            info!("Change stream subscriber disconnected");
        });

        rx
    }

    async fn run(&self, limit: usize, tx: mpsc::Sender<FeedEvent>) {
        if tx.send(FeedEvent::welcome()).await.is_err() {
            return;
        }

        let mut current = None;
        if let Some(snapshot) = advance(&mut current, self.snapshot(limit).await) {
            if !self.push_window(&tx, &snapshot).await {
                return;
            }
            if !self.push_digest(&tx, &snapshot).await {
                return;
            }
        }

        let period = self.config.interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tx.closed() => return,
                _ = ticker.tick() => {}
            }

            let Some(latest) = advance(&mut current, self.snapshot(limit).await) else {
                if tx.send(FeedEvent::Ping).await.is_err() {
                    return;
                }
                continue;
            };

            debug!(items = latest.len(), "Recent window changed");
            if !self.push_window(&tx, &latest).await {
                return;
            }
            if self.config.resummarize_on_change && !self.push_digest(&tx, &latest).await {
                return;
            }
        }
    }

    async fn snapshot(&self, limit: usize) -> Option<Vec<Memory>> {
        match self.store.list_all(limit).await {
            Ok(items) => Some(items),
            Err(e) => {
                warn!(error = %e, "Change stream query failed");
                None
            }
        }
    }

    /// Send `items` (newest-first from the store) oldest-first.
    async fn push_window(&self, tx: &mpsc::Sender<FeedEvent>, items: &[Memory]) -> bool {
        for item in items.iter().rev() {
            let event = FeedEvent::MemoryItem { item: item.clone() };
            if tx.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Digest failures are logged and skipped; returns `false` only when the
    /// subscriber is gone.
    async fn push_digest(&self, tx: &mpsc::Sender<FeedEvent>, items: &[Memory]) -> bool {
        let Some(summarizer) = &self.summarizer else {
            return true;
        };

        let batch = &items[..items.len().min(self.config.digest_size)];
        match summarizer.summarize(batch).await {
            Ok(Some(text)) => tx.send(FeedEvent::SynthSummary { text }).await.is_ok(),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "Digest generation failed");
                !tx.is_closed()
            }
        }
    }
}
