//! SQLite-backed memory storage.
//!
//! A single connection sits behind a mutex and every call runs on the blocking
//! pool. Uniqueness of `text_norm` is enforced by the database, so concurrent
//! inserts of the same text converge on one row.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use beebo_common::{BeeboError, Result};
use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::task;
use tracing::{debug, info, instrument};

use crate::types::{Memory, Supplied};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id           TEXT PRIMARY KEY NOT NULL,
    text         TEXT NOT NULL,
    text_norm    TEXT NOT NULL,
    type         TEXT NOT NULL DEFAULT 'note',
    tags         TEXT NOT NULL DEFAULT '[]',
    source       TEXT NOT NULL DEFAULT 'manual',
    ts           TEXT,
    created_at   TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    embedding    BLOB
);
CREATE UNIQUE INDEX IF NOT EXISTS memories_text_norm_key ON memories (text_norm);
CREATE INDEX IF NOT EXISTS memories_last_updated_idx ON memories (last_updated);
CREATE INDEX IF NOT EXISTS memories_created_at_idx ON memories (created_at);
CREATE INDEX IF NOT EXISTS memories_type_idx ON memories (type);
";

const COLUMNS: &str =
    "id, text, text_norm, type, tags, source, ts, created_at, last_updated, embedding";

const RECENCY: &str = "ORDER BY last_updated DESC, rowid DESC";

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let tags_raw: String = row.get(4)?;
    let tags: Vec<String> = serde_json::from_str(&tags_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let ts: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    let last_updated: String = row.get(8)?;
    let embedding: Option<Vec<u8>> = row.get(9)?;

    Ok(Memory {
        id: row.get(0)?,
        text: row.get(1)?,
        text_norm: row.get(2)?,
        memory_type: row.get(3)?,
        tags,
        source: row.get(5)?,
        ts: ts.as_deref().map(|raw| parse_time(6, raw)).transpose()?,
        created_at: parse_time(7, &created_at)?,
        last_updated: parse_time(8, &last_updated)?,
        embedding: embedding.as_deref().map(blob_to_embedding),
    })
}

/// A stored embedding with just enough context to report a match.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRow {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Result of an insert that resolved either to a new row or an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub id: String,
    pub last_updated: DateTime<Utc>,
    /// `false` when the insert landed on an existing `text_norm`
    pub created: bool,
}

/// Result of an insert that must not touch existing rows.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertResult {
    Inserted(UpsertResult),
    Conflict(Memory),
}

pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(BeeboError::storage)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(BeeboError::storage)?;
        info!(db_path = %path.display(), "Opened memory store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(BeeboError::storage)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(BeeboError::storage)?;
        conn.execute_batch(SCHEMA).map_err(BeeboError::storage)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| BeeboError::Storage(format!("{op}: blocking task failed: {e}")))?
        .map_err(|e| BeeboError::Storage(format!("{op}: {e}")))
    }

    async fn query_memories(
        &self,
        op: &'static str,
        sql: String,
        values: Vec<Value>,
    ) -> Result<Vec<Memory>> {
        self.run(op, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_memory)?;
            rows.collect()
        })
        .await
    }

    /// Insert `memory`, or refresh the row that already holds its `text_norm`.
    ///
    /// On conflict the existing row keeps its id, text and creation time and
    /// takes the new last_updated. Type, tags and source are replaced only when
    /// `supplied` marks them; `ts` and embedding only when the new record
    /// carries one.
    #[instrument(skip(self, memory), fields(memory_id = %memory.id))]
    pub async fn upsert(&self, memory: &Memory, supplied: Supplied) -> Result<UpsertResult> {
        let memory = memory.clone();
        let result = self
            .run("upsert", move |conn| {
                let sql = format!(
                    "INSERT INTO memories ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT (text_norm) DO UPDATE SET
                         type = CASE WHEN ?11 THEN excluded.type ELSE memories.type END,
                         tags = CASE WHEN ?12 THEN excluded.tags ELSE memories.tags END,
                         source = CASE WHEN ?13 THEN excluded.source ELSE memories.source END,
                         ts = COALESCE(excluded.ts, memories.ts),
                         last_updated = excluded.last_updated,
                         embedding = COALESCE(excluded.embedding, memories.embedding)
                     RETURNING id, last_updated"
                );
                let mut values = insert_values(&memory)?;
                values.extend(
                    [supplied.memory_type, supplied.tags, supplied.source]
                        .map(|flag| Value::Integer(i64::from(flag))),
                );
                let (id, last_updated): (String, String) =
                    conn.query_row(&sql, params_from_iter(values), |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                Ok(UpsertResult {
                    created: id == memory.id,
                    id,
                    last_updated: parse_time(1, &last_updated)?,
                })
            })
            .await?;

        debug!(id = %result.id, created = result.created, "Upserted memory");
        Ok(result)
    }

    /// Insert `memory` unless its `text_norm` is taken, in which case the
    /// existing row is returned untouched.
    #[instrument(skip(self, memory), fields(memory_id = %memory.id))]
    pub async fn insert_if_absent(&self, memory: &Memory) -> Result<InsertResult> {
        let memory = memory.clone();
        self.run("insert", move |conn| {
            let sql = format!(
                "INSERT INTO memories ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (text_norm) DO NOTHING
                 RETURNING id"
            );
            let inserted: Option<String> = conn
                .query_row(&sql, params_from_iter(insert_values(&memory)?), |row| row.get(0))
                .optional()?;

            if inserted.is_some() {
                return Ok(InsertResult::Inserted(UpsertResult {
                    id: memory.id.clone(),
                    last_updated: memory.last_updated,
                    created: true,
                }));
            }

            let existing = conn.query_row(
                &format!("SELECT {COLUMNS} FROM memories WHERE text_norm = ?1"),
                params![memory.text_norm],
                row_to_memory,
            )?;
            Ok(InsertResult::Conflict(existing))
        })
        .await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let id = id.to_string();
        self.run("get_by_id", move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                row_to_memory,
            )
            .optional()
        })
        .await
    }

    pub async fn get_by_norm(&self, text_norm: &str) -> Result<Option<Memory>> {
        let text_norm = text_norm.to_string();
        self.run("get_by_norm", move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM memories WHERE text_norm = ?1"),
                params![text_norm],
                row_to_memory,
            )
            .optional()
        })
        .await
    }

    /// Returns `true` if a row was removed.
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let removed = self
            .run("delete", move |conn| {
                conn.execute("DELETE FROM memories WHERE id = ?1", params![id])
            })
            .await?;
        Ok(removed > 0)
    }

    pub async fn list_all(&self, limit: usize) -> Result<Vec<Memory>> {
        self.query_memories(
            "list_all",
            format!("SELECT {COLUMNS} FROM memories {RECENCY} LIMIT ?1"),
            vec![Value::Integer(sql_limit(limit))],
        )
        .await
    }

    /// Rows whose tag list contains `tag` exactly.
    pub async fn list_by_tag(&self, tag: &str, limit: usize) -> Result<Vec<Memory>> {
        self.query_memories(
            "list_by_tag",
            format!(
                "SELECT {COLUMNS} FROM memories
                 WHERE EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value = ?1)
                 {RECENCY} LIMIT ?2"
            ),
            vec![Value::Text(tag.to_string()), Value::Integer(sql_limit(limit))],
        )
        .await
    }

    pub async fn list_by_type(&self, memory_type: &str, limit: usize) -> Result<Vec<Memory>> {
        self.query_memories(
            "list_by_type",
            format!("SELECT {COLUMNS} FROM memories WHERE type = ?1 {RECENCY} LIMIT ?2"),
            vec![Value::Text(memory_type.to_string()), Value::Integer(sql_limit(limit))],
        )
        .await
    }

    /// Rows created in `[start, end)`.
    pub async fn list_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Memory>> {
        self.query_memories(
            "list_created_between",
            format!(
                "SELECT {COLUMNS} FROM memories
                 WHERE created_at >= ?1 AND created_at < ?2 {RECENCY}"
            ),
            vec![Value::Text(format_time(&start)), Value::Text(format_time(&end))],
        )
        .await
    }

    /// Rows created since local midnight in `tz`.
    pub async fn list_created_today(&self, tz: Tz) -> Result<Vec<Memory>> {
        let (start, end) = day_bounds(Utc::now(), tz);
        self.list_created_between(start, end).await
    }

    /// Substring match against `text_norm`; `needle` must already be normalized.
    pub async fn search(&self, needle: &str, limit: usize) -> Result<Vec<Memory>> {
        self.query_memories(
            "search",
            format!(
                "SELECT {COLUMNS} FROM memories WHERE instr(text_norm, ?1) > 0 {RECENCY} LIMIT ?2"
            ),
            vec![Value::Text(needle.to_string()), Value::Integer(sql_limit(limit))],
        )
        .await
    }

    pub async fn list_all_embedded(&self) -> Result<Vec<EmbeddedRow>> {
        self.run("list_all_embedded", |conn| {
            let mut stmt =
                conn.prepare("SELECT id, text, embedding FROM memories WHERE embedding IS NOT NULL")?;
            let rows = stmt.query_map([], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok(EmbeddedRow {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    embedding: blob_to_embedding(&blob),
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn count(&self) -> Result<usize> {
        let count: i64 = self
            .run("count", |conn| {
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn insert_values(memory: &Memory) -> rusqlite::Result<Vec<Value>> {
    let tags = serde_json::to_string(&memory.tags)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    Ok(vec![
        Value::Text(memory.id.clone()),
        Value::Text(memory.text.clone()),
        Value::Text(memory.text_norm.clone()),
        Value::Text(memory.memory_type.clone()),
        Value::Text(tags),
        Value::Text(memory.source.clone()),
        memory.ts.as_ref().map_or(Value::Null, |ts| Value::Text(format_time(ts))),
        Value::Text(format_time(&memory.created_at)),
        Value::Text(format_time(&memory.last_updated)),
        memory
            .embedding
            .as_deref()
            .map_or(Value::Null, |e| Value::Blob(embedding_to_blob(e))),
    ])
}

/// UTC bounds of the local calendar day in `tz` that contains `now`.
pub fn day_bounds(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    (local_midnight(today, tz), local_midnight(tomorrow, tz))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST jump: the day starts at the first valid hour.
        LocalResult::None => (1..=3)
            .find_map(|h| {
                tz.from_local_datetime(&(midnight + chrono::Duration::hours(h)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
    }
}
