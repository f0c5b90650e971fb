use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::fetcher::FeedCacheHeaders;
use crate::types::{Destination, DispatchRecord, DispatchStatus, FeedItem, Result};

/// Terminal outcome (or explicit non-outcome) applied to a Pending record.
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Sent { post_id: String },
    Failed { reason: String },
    Skipped { reason: String },
    /// Transient failure below the attempt ceiling: the record stays
    /// Pending and is re-attempted on a later cycle.
    RetryLater { reason: String },
}

/// Persistent record of which (item, destination) pairs have been handled.
///
/// All status transitions are guarded SQL updates, never blind overwrites:
/// once a pair reaches `sent` or `failed` no further transition can touch it,
/// which is what makes "at most one Sent per pair" hold even under concurrent
/// retries. The pool is capped at one connection, so record writes are
/// serialized at the store boundary.
pub struct DedupStore {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        url TEXT PRIMARY KEY,
        etag TEXT,
        last_modified TEXT,
        last_fetch_at TEXT,
        last_error TEXT,
        error_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id TEXT PRIMARY KEY,
        feed_url TEXT NOT NULL,
        link TEXT NOT NULL,
        title TEXT NOT NULL,
        published_at TEXT NOT NULL,
        first_seen_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dispatches (
        item_id TEXT NOT NULL,
        destination_id TEXT NOT NULL,
        status TEXT NOT NULL,
        detail TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (item_id, destination_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_published ON items (published_at)",
    "CREATE INDEX IF NOT EXISTS idx_dispatches_status ON dispatches (status)",
];

impl DedupStore {
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(%path, "opened dedup store");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Close the pool, waiting for in-flight queries. Any use afterwards
    /// fails with a database error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Remember an item the first time it is seen; later sightings are no-ops.
    pub async fn upsert_item(&self, item: &FeedItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, feed_url, link, title, published_at, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&item.id)
        .bind(&item.feed_url)
        .bind(&item.link)
        .bind(&item.title)
        .bind(item.published_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// An item still needs dispatch to a destination unless that pair already
    /// holds a terminal (`sent` or `failed`) record. Pending and Skipped are
    /// retry-eligible by design.
    pub async fn needs_dispatch(&self, item_id: &str, destination_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT status FROM dispatches WHERE item_id = ? AND destination_id = ?",
        )
        .bind(item_id)
        .bind(destination_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(true),
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(status != "sent" && status != "failed")
            }
        }
    }

    /// Filter to items that at least one of the bound destinations still
    /// needs. Per-destination dispatch re-checks individually before sending.
    pub async fn filter_new(
        &self,
        items: Vec<FeedItem>,
        destinations: &[std::sync::Arc<Destination>],
    ) -> Result<Vec<FeedItem>> {
        let mut new_items = Vec::new();
        for item in items {
            let mut wanted = false;
            for dest in destinations {
                if self.needs_dispatch(&item.id, &dest.id()).await? {
                    wanted = true;
                    break;
                }
            }
            if wanted {
                new_items.push(item);
            } else {
                debug!(item = %item.id, "already handled on every bound destination");
            }
        }
        Ok(new_items)
    }

    /// Acquire a Pending record before the outbound call, so a crash
    /// mid-send leaves an auditable Pending rather than silent loss.
    ///
    /// Returns the attempt count after acquisition, or `None` when the pair
    /// already holds a terminal record (the compare-and-set lost).
    pub async fn record_attempt(
        &self,
        item_id: &str,
        destination_id: &str,
    ) -> Result<Option<u32>> {
        let result = sqlx::query(
            r#"
            INSERT INTO dispatches (item_id, destination_id, status, detail, attempts, updated_at)
            VALUES (?, ?, 'pending', NULL, 1, ?)
            ON CONFLICT (item_id, destination_id) DO UPDATE
            SET status = 'pending',
                detail = NULL,
                attempts = dispatches.attempts + 1,
                updated_at = excluded.updated_at
            WHERE dispatches.status NOT IN ('sent', 'failed')
            "#,
        )
        .bind(item_id)
        .bind(destination_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT attempts FROM dispatches WHERE item_id = ? AND destination_id = ?",
        )
        .bind(item_id)
        .bind(destination_id)
        .fetch_one(&self.pool)
        .await?;
        let attempts: i64 = row.try_get("attempts")?;
        Ok(Some(attempts as u32))
    }

    /// Record a mute skip without acquiring Pending: no outbound call is made
    /// and the pair stays eligible for the next cycle.
    pub async fn record_skip(
        &self,
        item_id: &str,
        destination_id: &str,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatches (item_id, destination_id, status, detail, attempts, updated_at)
            VALUES (?, ?, 'skipped', ?, 0, ?)
            ON CONFLICT (item_id, destination_id) DO UPDATE
            SET status = 'skipped',
                detail = excluded.detail,
                updated_at = excluded.updated_at
            WHERE dispatches.status NOT IN ('sent', 'failed')
            "#,
        )
        .bind(item_id)
        .bind(destination_id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Guarded `Pending -> terminal` transition. Returns false when there was
    /// no Pending record to transition (for example a concurrent finalize won).
    pub async fn finalize(
        &self,
        item_id: &str,
        destination_id: &str,
        outcome: &FinalizeOutcome,
    ) -> Result<bool> {
        let (status, detail) = match outcome {
            FinalizeOutcome::Sent { post_id } => ("sent", post_id.clone()),
            FinalizeOutcome::Failed { reason } => ("failed", reason.clone()),
            FinalizeOutcome::Skipped { reason } => ("skipped", reason.clone()),
            FinalizeOutcome::RetryLater { reason } => ("pending", reason.clone()),
        };

        let result = sqlx::query(
            r#"
            UPDATE dispatches
            SET status = ?, detail = ?, updated_at = ?
            WHERE item_id = ? AND destination_id = ? AND status = 'pending'
            "#,
        )
        .bind(status)
        .bind(&detail)
        .bind(Utc::now())
        .bind(item_id)
        .bind(destination_id)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if !applied {
            warn!(
                item = item_id,
                destination = destination_id,
                status,
                "finalize found no pending record to transition"
            );
        }
        Ok(applied)
    }

    pub async fn record(
        &self,
        item_id: &str,
        destination_id: &str,
    ) -> Result<Option<DispatchRecord>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, destination_id, status, detail, attempts, updated_at
            FROM dispatches
            WHERE item_id = ? AND destination_id = ?
            "#,
        )
        .bind(item_id)
        .bind(destination_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }

    /// Remove items strictly older than `cutoff` whose records are all
    /// terminal. A Pending record of any age is never removed, and neither is
    /// a Skipped one: both would reopen a dedup hole. Returns the number of
    /// items pruned.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM items
            WHERE published_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM dispatches d
                  WHERE d.item_id = items.id
                    AND d.status IN ('pending', 'skipped')
              )
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut pruned = 0u64;
        for row in rows {
            let id: String = row.try_get("id")?;
            sqlx::query("DELETE FROM dispatches WHERE item_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            pruned += 1;
        }
        tx.commit().await?;

        info!(pruned, %cutoff, "pruned terminal dedup state");
        Ok(pruned)
    }

    /// Conditional-GET headers remembered for a feed, if any.
    pub async fn feed_cache_headers(&self, url: &str) -> Result<FeedCacheHeaders> {
        let row = sqlx::query("SELECT etag, last_modified FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => FeedCacheHeaders {
                etag: row.try_get("etag")?,
                last_modified: row.try_get("last_modified")?,
            },
            None => FeedCacheHeaders::default(),
        })
    }

    pub async fn record_feed_fetch(
        &self,
        url: &str,
        error: Option<&str>,
        headers: &FeedCacheHeaders,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feeds (url, etag, last_modified, last_fetch_at, last_error, error_count)
            VALUES (?, ?, ?, ?, ?, CASE WHEN ? IS NULL THEN 0 ELSE 1 END)
            ON CONFLICT (url) DO UPDATE
            SET etag = excluded.etag,
                last_modified = excluded.last_modified,
                last_fetch_at = excluded.last_fetch_at,
                last_error = excluded.last_error,
                error_count = CASE
                    WHEN excluded.last_error IS NULL THEN 0
                    ELSE feeds.error_count + 1
                END
            "#,
        )
        .bind(url)
        .bind(&headers.etag)
        .bind(&headers.last_modified)
        .bind(Utc::now())
        .bind(error)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dispatch counts by status, for the startup summary and cycle logs.
    pub async fn dispatch_stats(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM dispatches GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            stats.insert(status, n);
        }
        Ok(stats)
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<DispatchRecord> {
    let status: String = row.try_get("status")?;
    let detail: Option<String> = row.try_get("detail")?;
    let text = detail.clone().unwrap_or_default();
    let status = match status.as_str() {
        "sent" => DispatchStatus::Sent { post_id: text },
        "failed" => DispatchStatus::Failed { reason: text },
        "skipped" => DispatchStatus::Skipped { reason: text },
        _ => DispatchStatus::Pending,
    };
    let attempts: i64 = row.try_get("attempts")?;
    Ok(DispatchRecord {
        item_id: row.try_get("item_id")?,
        destination_id: row.try_get("destination_id")?,
        status,
        detail,
        attempts: attempts as u32,
        updated_at: row.try_get("updated_at")?,
    })
}
