//! In-process storage backend, grounded on `storageMem.go`.
//!
//! Each map is a [`DashMap`] so individual reads/writes are atomic
//! without an explicit lock — the same guarantee the original Go maps
//! got "for free" from short, non-overlapping goroutine scheduling.
//! Cross-operation sequences (e.g. a whole `/updates/` batch) are
//! **not** atomic on this backend; only [`crate::storage::DbStorage`]
//! gives that (spec §5, design note 4).

use super::{MetricRow, Storage};
use crate::error::Error;
use crate::model::Kind;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MemStorage {
    pub(super) gauges: Arc<DashMap<String, f64>>,
    pub(super) counters: Arc<DashMap<String, i64>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn set_gauge_sync(&self, id: &str, value: f64) {
        self.gauges.insert(id.to_string(), value);
    }

    pub(super) fn add_counter_sync(&self, id: &str, delta: i64) -> i64 {
        let mut entry = self.counters.entry(id.to_string()).or_insert(0);
        *entry += delta;
        *entry
    }

    pub(super) fn get_all_sync(&self) -> Vec<MetricRow> {
        let mut rows: Vec<MetricRow> = self
            .gauges
            .iter()
            .map(|e| MetricRow {
                id: e.key().clone(),
                kind: Kind::Gauge,
                string_value: super::format_gauge(*e.value()),
            })
            .collect();
        rows.extend(self.counters.iter().map(|e| MetricRow {
            id: e.key().clone(),
            kind: Kind::Counter,
            string_value: super::format_counter(*e.value()),
        }));
        rows
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), Error> {
        self.set_gauge_sync(id, value);
        Ok(())
    }

    async fn get_gauge(&self, id: &str) -> Result<f64, Error> {
        self.gauges.get(id).map(|v| *v).ok_or(Error::NotFound)
    }

    async fn add_counter(&self, id: &str, delta: i64) -> Result<i64, Error> {
        Ok(self.add_counter_sync(id, delta))
    }

    async fn get_counter(&self, id: &str) -> Result<i64, Error> {
        self.counters.get(id).map(|v| *v).ok_or(Error::NotFound)
    }

    async fn get_all(&self) -> Result<Vec<MetricRow>, Error> {
        Ok(self.get_all_sync())
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn start_transaction(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gauge_replaces_last_write_wins() {
        let s = MemStorage::new();
        s.set_gauge("a", 1.0).await.unwrap();
        s.set_gauge("a", 2.0).await.unwrap();
        assert_eq!(s.get_gauge("a").await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn counter_accumulates_from_zero() {
        let s = MemStorage::new();
        assert_eq!(s.add_counter("c", 5).await.unwrap(), 5);
        assert_eq!(s.add_counter("c", 10).await.unwrap(), 15);
        assert_eq!(s.get_counter("c").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn counter_accumulates_negative_deltas() {
        let s = MemStorage::new();
        s.add_counter("c", 10).await.unwrap();
        s.add_counter("c", -3).await.unwrap();
        assert_eq!(s.get_counter("c").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let s = MemStorage::new();
        assert!(matches!(s.get_gauge("missing").await, Err(Error::NotFound)));
        assert!(matches!(
            s.get_counter("missing").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn gauge_and_counter_coexist_under_same_id() {
        let s = MemStorage::new();
        s.set_gauge("m", 1.0).await.unwrap();
        s.add_counter("m", 1).await.unwrap();
        assert_eq!(s.get_gauge("m").await.unwrap(), 1.0);
        assert_eq!(s.get_counter("m").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_all_reports_both_kinds() {
        let s = MemStorage::new();
        s.set_gauge("a", 1.5).await.unwrap();
        s.add_counter("b", 5).await.unwrap();
        let mut rows = s.get_all().await.unwrap();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].string_value, "1.5");
        assert_eq!(rows[1].id, "b");
        assert_eq!(rows[1].string_value, "5");
    }
}
