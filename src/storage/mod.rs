//! Pluggable storage backends (spec §4.3). `mem`, `file`, and `db` all
//! satisfy the same [`Storage`] trait; the server picks one at startup
//! based on which of `{database_dsn, file_path, nothing}` is configured.

mod db;
mod file;
mod mem;

pub use db::DbStorage;
pub use file::FileStorage;
pub use mem::MemStorage;

use crate::error::Error;
use crate::model::Kind;
use async_trait::async_trait;

/// One row of [`Storage::get_all`]: the id/kind pair plus its stored
/// value already formatted the way the text endpoints render it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub id: String,
    pub kind: Kind,
    pub string_value: String,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), Error>;
    async fn get_gauge(&self, id: &str) -> Result<f64, Error>;
    async fn add_counter(&self, id: &str, delta: i64) -> Result<i64, Error>;
    async fn get_counter(&self, id: &str) -> Result<i64, Error>;
    async fn get_all(&self) -> Result<Vec<MetricRow>, Error>;

    /// Liveness check; no-op for the in-process backends.
    async fn ping(&self) -> Result<(), Error>;

    /// Opens a batch boundary. It is an error to call this while a
    /// transaction is already active.
    async fn start_transaction(&self) -> Result<(), Error>;
    async fn commit(&self) -> Result<(), Error>;

    /// Aborts the active transaction, if any, discarding its writes on
    /// backends that support it (spec §8: batch transactionality).
    async fn rollback(&self) -> Result<(), Error>;

    async fn close(&self);
}

pub fn format_gauge(v: f64) -> String {
    // Mirrors Go's strconv.FormatFloat(v, 'f', -1, 64): shortest
    // fixed-point representation that round-trips, never exponential.
    format!("{v}")
}

pub fn format_counter(v: i64) -> String {
    v.to_string()
}
