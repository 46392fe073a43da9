//! Relational storage backend, grounded on `storageDB.go` plus the
//! teacher's `PgPoolOptions`/`sqlx::migrate!` usage in `main.rs`.
//!
//! Upserts accumulate counters in SQL (`delta = metrics.delta +
//! EXCLUDED.delta`) so concurrent writers can't lose updates the way
//! the unlocked mem/file backends can (spec §4.3, design note 4). While
//! a transaction is active (`start_transaction`/`commit`), every
//! operation runs against that transaction's connection instead of a
//! fresh pool connection, so a batch genuinely fails atomically. The
//! `active_tx` lock is only held long enough to check for (and, if
//! present, use) that transaction; outside a batch it's released before
//! the query runs, so ordinary reads/writes still fan out across
//! `PgPool`'s connections instead of being serialized behind it.

use super::{MetricRow, Storage};
use crate::error::Error;
use crate::model::Kind;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres, Row};
use tokio::sync::Mutex as AsyncMutex;

/// SQLSTATE codes the original source treats as transient (spec §4.2).
const TRANSIENT_SQLSTATES: &[&str] = &["57P01", "57P03", "53300", "08000", "40001"];

pub struct DbStorage {
    pool: PgPool,
    /// A started-but-uncommitted transaction. `start_transaction`/
    /// `commit` on the original type are a thin wrapper around a
    /// single live `*sql.Tx`; this mirrors that with one slot rather
    /// than per-caller transactions.
    active_tx: AsyncMutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

impl DbStorage {
    pub async fn connect(dsn: &str) -> Result<Self, Error> {
        let pool = retry_db(|| {
            let dsn = dsn.to_string();
            async move {
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect(&dsn)
                    .await
            }
        })
        .await
        .map_err(Error::Storage)?;

        let storage = Self {
            pool,
            active_tx: AsyncMutex::new(None),
        };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), Error> {
        // Unlike golang-migrate, sqlx's `Migrator::run` is already
        // idempotent — it only applies pending migrations and is a
        // no-op (not an error) when the schema is current, so the
        // source's "no-change-is-not-fatal" special case needs no
        // explicit handling here.
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

fn classify_sqlstate(e: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = e {
        return db_err.code().map(|c| c.to_string());
    }
    None
}

fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(io_err) => io_err.kind() == std::io::ErrorKind::TimedOut,
        sqlx::Error::PoolTimedOut => true,
        _ => classify_sqlstate(e)
            .map(|code| TRANSIENT_SQLSTATES.contains(&code.as_str()))
            .unwrap_or(false),
    }
}

async fn retry_db<F, Fut, T>(action: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    crate::retry::retry_if(action, is_transient).await
}

async fn upsert_gauge<'e, E>(exec: E, id: &str, value: f64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO metrics (id, type, value) VALUES ($1, 'gauge', $2) \
         ON CONFLICT (id, type) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(id)
    .bind(value)
    .execute(exec)
    .await?;
    Ok(())
}

async fn upsert_counter<'e, E>(exec: E, id: &str, delta: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        "INSERT INTO metrics (id, type, delta) VALUES ($1, 'counter', $2) \
         ON CONFLICT (id, type) DO UPDATE SET delta = metrics.delta + EXCLUDED.delta \
         RETURNING delta",
    )
    .bind(id)
    .bind(delta)
    .fetch_one(exec)
    .await?;
    row.try_get::<Option<i64>, _>("delta")?
        .ok_or_else(|| sqlx::Error::Decode("counter upsert returned no delta".into()))
}

async fn select_gauge<'e, E>(exec: E, id: &str) -> Result<Option<f64>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query("SELECT value FROM metrics WHERE id = $1 AND type = 'gauge'")
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row.and_then(|r| r.try_get::<Option<f64>, _>("value").ok().flatten()))
}

async fn select_counter<'e, E>(exec: E, id: &str) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query("SELECT delta FROM metrics WHERE id = $1 AND type = 'counter'")
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row.and_then(|r| r.try_get::<Option<i64>, _>("delta").ok().flatten()))
}

#[async_trait]
impl Storage for DbStorage {
    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), Error> {
        let mut slot = self.active_tx.lock().await;
        if let Some(tx) = slot.as_mut() {
            return upsert_gauge(&mut **tx, id, value).await.map_err(Error::Storage);
        }
        // No transaction in flight: release the lock before touching the
        // pool so unrelated reads/writes aren't serialized behind it.
        drop(slot);
        retry_db(|| async move { upsert_gauge(&self.pool, id, value).await })
            .await
            .map_err(Error::Storage)
    }

    async fn get_gauge(&self, id: &str) -> Result<f64, Error> {
        let mut slot = self.active_tx.lock().await;
        if let Some(tx) = slot.as_mut() {
            let value = select_gauge(&mut **tx, id).await.map_err(Error::Storage)?;
            return value.ok_or(Error::NotFound);
        }
        drop(slot);
        let value = retry_db(|| async move { select_gauge(&self.pool, id).await })
            .await
            .map_err(Error::Storage)?;
        value.ok_or(Error::NotFound)
    }

    async fn add_counter(&self, id: &str, delta: i64) -> Result<i64, Error> {
        let mut slot = self.active_tx.lock().await;
        if let Some(tx) = slot.as_mut() {
            return upsert_counter(&mut **tx, id, delta).await.map_err(Error::Storage);
        }
        drop(slot);
        retry_db(|| async move { upsert_counter(&self.pool, id, delta).await })
            .await
            .map_err(Error::Storage)
    }

    async fn get_counter(&self, id: &str) -> Result<i64, Error> {
        let mut slot = self.active_tx.lock().await;
        if let Some(tx) = slot.as_mut() {
            let value = select_counter(&mut **tx, id).await.map_err(Error::Storage)?;
            return value.ok_or(Error::NotFound);
        }
        drop(slot);
        let value = retry_db(|| async move { select_counter(&self.pool, id).await })
            .await
            .map_err(Error::Storage)?;
        value.ok_or(Error::NotFound)
    }

    async fn get_all(&self) -> Result<Vec<MetricRow>, Error> {
        let rows = retry_db(|| async {
            sqlx::query("SELECT id, type, value, delta FROM metrics")
                .fetch_all(&self.pool)
                .await
        })
        .await
        .map_err(Error::Storage)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(Error::Storage)?;
            let mtype: String = row.try_get("type").map_err(Error::Storage)?;
            let kind: Kind = mtype.parse()?;
            let string_value = match kind {
                Kind::Gauge => {
                    let v: Option<f64> = row.try_get("value").map_err(Error::Storage)?;
                    super::format_gauge(v.unwrap_or_default())
                }
                Kind::Counter => {
                    let v: Option<i64> = row.try_get("delta").map_err(Error::Storage)?;
                    super::format_counter(v.unwrap_or_default())
                }
            };
            out.push(MetricRow {
                id,
                kind,
                string_value,
            });
        }
        Ok(out)
    }

    async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Storage)?;
        Ok(())
    }

    async fn start_transaction(&self) -> Result<(), Error> {
        let mut slot = self.active_tx.lock().await;
        if slot.is_some() {
            return Err(Error::BadRequest("transaction already active".into()));
        }
        let tx = self.pool.begin().await.map_err(Error::Storage)?;
        *slot = Some(tx);
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        let mut slot = self.active_tx.lock().await;
        match slot.take() {
            Some(tx) => tx.commit().await.map_err(Error::Storage),
            None => Err(Error::BadRequest("no active transaction".into())),
        }
    }

    async fn rollback(&self) -> Result<(), Error> {
        let mut slot = self.active_tx.lock().await;
        match slot.take() {
            Some(tx) => tx.rollback().await.map_err(Error::Storage),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_transient_sqlstates() {
        assert!(TRANSIENT_SQLSTATES.contains(&"40001"));
        assert!(TRANSIENT_SQLSTATES.contains(&"57P01"));
        assert!(!TRANSIENT_SQLSTATES.contains(&"23505"));
    }

    // The following require DATABASE_URL pointing at a disposable Postgres
    // instance and are skipped by default.
    #[tokio::test]
    #[ignore]
    async fn batch_rolls_back_atomically_on_failure() {
        let dsn = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let storage = DbStorage::connect(&dsn).await.unwrap();

        storage.start_transaction().await.unwrap();
        storage.set_gauge("tx-a", 1.0).await.unwrap();
        {
            let mut slot = storage.active_tx.lock().await;
            slot.take(); // drop without commit == rollback
        }
        assert!(matches!(
            storage.get_gauge("tx-a").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn gauge_and_counter_round_trip() {
        let dsn = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let storage = DbStorage::connect(&dsn).await.unwrap();
        storage.set_gauge("db-gauge", 3.5).await.unwrap();
        assert_eq!(storage.get_gauge("db-gauge").await.unwrap(), 3.5);
        storage.add_counter("db-counter", 10).await.unwrap();
        storage.add_counter("db-counter", 5).await.unwrap();
        assert_eq!(storage.get_counter("db-counter").await.unwrap(), 15);
    }
}
