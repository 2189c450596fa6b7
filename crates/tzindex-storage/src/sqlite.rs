//! SQLite persistence for chain tips and block hashes.
//!
//! Ledger tables stay in the table engine; this store keeps the per-table
//! [`ChainTip`]s and the hash of every connected block so a restarted
//! crawler can resume and detect forks against its previous run.
//!
//! # Usage
//! ```rust,no_run
//! use tzindex_storage::sqlite::SqliteTipStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tips = SqliteTipStore::open("./tips.db").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use tzindex_core::{ChainTip, IndexerError, TipStore};

fn storage(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

pub struct SqliteTipStore {
    pool: SqlitePool,
}

impl SqliteTipStore {
    /// Open (or create) a database at `path`, a file path or a full
    /// `sqlite:` URL.
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private database for tests. A single connection, since every
    /// connection to `:memory:` opens its own database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chain_tips (
                table_name  TEXT    NOT NULL PRIMARY KEY,
                chain_id    TEXT    NOT NULL,
                best_height INTEGER NOT NULL,
                best_hash   TEXT    NOT NULL,
                best_time   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_hashes (
                height INTEGER NOT NULL PRIMARY KEY,
                hash   TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        debug!("SQLite tip schema ready");
        Ok(())
    }

    pub async fn save_block_hash(&self, height: i64, hash: &str) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO block_hashes (height, hash) VALUES (?, ?)")
            .bind(height)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    pub async fn block_hash(&self, height: i64) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT hash FROM block_hashes WHERE height = ?")
            .bind(height)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|r| r.get::<String, _>("hash")))
    }

    /// Forget hashes above `height` after a rollback.
    pub async fn rewind_block_hashes(&self, height: i64) -> Result<u64, IndexerError> {
        let res = sqlx::query("DELETE FROM block_hashes WHERE height > ?")
            .bind(height)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(res.rows_affected())
    }
}

fn tip_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<(String, ChainTip), IndexerError> {
    let millis: i64 = row.get("best_time");
    let best_time: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| IndexerError::Storage(format!("bad tip time {millis}")))?;
    Ok((
        row.get("table_name"),
        ChainTip {
            chain_id: row.get("chain_id"),
            best_height: row.get("best_height"),
            best_hash: row.get("best_hash"),
            best_time,
        },
    ))
}

#[async_trait]
impl TipStore for SqliteTipStore {
    async fn load(&self, table: &str) -> Result<Option<ChainTip>, IndexerError> {
        let row = sqlx::query("SELECT * FROM chain_tips WHERE table_name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref()
            .map(tip_from_row)
            .transpose()
            .map(|t| t.map(|(_, tip)| tip))
    }

    async fn load_all(&self) -> Result<HashMap<String, ChainTip>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM chain_tips")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(tip_from_row).collect()
    }

    async fn save(&self, table: &str, tip: &ChainTip) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO chain_tips (table_name, chain_id, best_height, best_hash, best_time)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(table_name) DO UPDATE SET
                chain_id    = excluded.chain_id,
                best_height = excluded.best_height,
                best_hash   = excluded.best_hash,
                best_time   = excluded.best_time",
        )
        .bind(table)
        .bind(&tip.chain_id)
        .bind(tip.best_height)
        .bind(&tip.best_hash)
        .bind(tip.best_time.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete(&self, table: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM chain_tips WHERE table_name = ?")
            .bind(table)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip(height: i64) -> ChainTip {
        ChainTip {
            chain_id: "NetXdQprcVkpaWU".into(),
            best_height: height,
            best_hash: format!("BL{height}"),
            best_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    #[tokio::test]
    async fn tips_persist_and_update() {
        let store = SqliteTipStore::in_memory().await.unwrap();
        assert!(store.load("block").await.unwrap().is_none());

        store.save("block", &tip(10)).await.unwrap();
        store.save("block", &tip(11)).await.unwrap();
        store.save("op", &tip(9)).await.unwrap();
        assert_eq!(store.load("block").await.unwrap(), Some(tip(11)));
        assert_eq!(store.load_all().await.unwrap().len(), 2);

        store.delete("op").await.unwrap();
        assert!(store.load("op").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn block_hashes_rewind() {
        let store = SqliteTipStore::in_memory().await.unwrap();
        for h in 1..=5 {
            store.save_block_hash(h, &format!("BL{h}")).await.unwrap();
        }
        assert_eq!(store.rewind_block_hashes(3).await.unwrap(), 2);
        assert_eq!(store.block_hash(3).await.unwrap().as_deref(), Some("BL3"));
        assert!(store.block_hash(4).await.unwrap().is_none());
    }
}
