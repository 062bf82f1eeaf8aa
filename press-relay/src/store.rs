use crate::types::{CandidateItem, PersistedEvent, RelayError, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Durable log of accepted items plus the dedup index guarding it.
///
/// Two tables back the store:
///
/// - `seen` holds every `(topic, permalink)` ever accepted. Rows are never
///   deleted, so trimming the log cannot re-admit an old item.
/// - `events` is the replayable log. `AUTOINCREMENT` keeps SQLite from
///   handing out an id twice, even after the newest rows are trimmed.
///
/// Writers are serialized by `write_lock`, which is held until commit, so
/// ids follow the order in which appends actually finished.
pub struct EventStore {
    db: SqlitePool,
    write_lock: Mutex<()>,
}

impl EventStore {
    /// Open or create the store at `path`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening event store at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let db = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self {
            db,
            write_lock: Mutex::new(()),
        };
        store.setup_schema().await?;
        Ok(store)
    }

    async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen (
                topic TEXT NOT NULL,
                permalink TEXT NOT NULL,
                first_seen_ms INTEGER NOT NULL,
                PRIMARY KEY (topic, permalink)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                permalink TEXT NOT NULL,
                payload TEXT NOT NULL,
                stored_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_topic_id ON events (topic, id)")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Keep only the candidates whose `(topic, permalink)` was never stored.
    ///
    /// Input order is preserved; a pair repeated within `candidates` is kept
    /// once, at its first position. Nothing is written.
    pub async fn filter_new(&self, candidates: Vec<CandidateItem>) -> Result<Vec<CandidateItem>> {
        let mut fresh = Vec::with_capacity(candidates.len());
        let mut batch_keys = HashSet::new();

        for candidate in candidates {
            if !batch_keys.insert((candidate.topic.clone(), candidate.permalink.clone())) {
                debug!("Dropping repeated listing entry {}", candidate.permalink);
                continue;
            }
            if !self.is_seen(&candidate.topic, &candidate.permalink).await? {
                fresh.push(candidate);
            }
        }

        Ok(fresh)
    }

    pub async fn is_seen(&self, topic: &str, permalink: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM seen WHERE topic = ?1 AND permalink = ?2")
            .bind(topic)
            .bind(permalink)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    /// Store `item` under the next sequence id.
    ///
    /// The dedup key and the log row are written in one transaction. If the
    /// pair is already known the call fails with [`RelayError::Duplicate`]
    /// and no id is consumed.
    pub async fn append(&self, item: &CandidateItem) -> Result<PersistedEvent> {
        let payload = serde_json::to_string(item)?;

        let _guard = self.write_lock.lock().await;
        let stored_at_ms = Utc::now().timestamp_millis();

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO seen (topic, permalink, first_seen_ms) VALUES (?1, ?2, ?3)",
        )
        .bind(&item.topic)
        .bind(&item.permalink)
        .bind(stored_at_ms)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RelayError::Duplicate {
                topic: item.topic.clone(),
                permalink: item.permalink.clone(),
            });
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO events (topic, permalink, payload, stored_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(&item.topic)
        .bind(&item.permalink)
        .bind(&payload)
        .bind(stored_at_ms)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut item = item.clone();
        item.complete = true;

        Ok(PersistedEvent {
            id,
            topic: item.topic.clone(),
            item,
            stored_at: millis_to_datetime(stored_at_ms)?,
        })
    }

    /// Events of `topic` with an id strictly above `cursor`, ascending.
    /// `None` returns the whole topic.
    pub async fn replay_since(&self, topic: &str, cursor: Option<i64>) -> Result<Vec<PersistedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, payload, stored_at_ms
            FROM events
            WHERE topic = ?1 AND id > ?2
            ORDER BY id ASC
            "#,
        )
        .bind(topic)
        .bind(cursor.unwrap_or(0))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    /// At most `limit` events of `topic` with an id strictly above `after`,
    /// ascending. Resumed subscribers page through their backlog with this.
    pub async fn replay_page(&self, topic: &str, after: i64, limit: usize) -> Result<Vec<PersistedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, payload, stored_at_ms
            FROM events
            WHERE topic = ?1 AND id > ?2
            ORDER BY id ASC
            LIMIT ?3
            "#,
        )
        .bind(topic)
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    pub async fn latest_id(&self, topic: &str) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM events WHERE topic = ?1")
            .bind(topic)
            .fetch_one(&self.db)
            .await?;
        Ok(id)
    }

    pub async fn count(&self, topic: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE topic = ?1")
            .bind(topic)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Drop the oldest part of the log, up to the newest event stored before
    /// `cutoff`. Dedup keys stay, and the id counter is untouched.
    pub async fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE id <= (SELECT MAX(id) FROM events WHERE stored_at_ms < ?1)
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.db)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!("Trimmed {} events stored before {}", removed, cutoff);
        }
        Ok(removed)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

fn event_from_row(row: &SqliteRow) -> Result<PersistedEvent> {
    let payload: String = row.try_get("payload")?;
    let mut item: CandidateItem = serde_json::from_str(&payload)?;
    item.complete = true;

    Ok(PersistedEvent {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        item,
        stored_at: millis_to_datetime(row.try_get("stored_at_ms")?)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RelayError::Parse(format!("stored timestamp out of range: {}", ms)))
}
