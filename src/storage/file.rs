//! File-persisted storage backend, grounded on `storageFile.go`.
//!
//! Wraps [`MemStorage`] and adds a JSON snapshot on disk. `flush_period
//! == Duration::ZERO` means synchronous: every mutation triggers a full
//! snapshot write. Otherwise a background ticker flushes on a timer
//! and mutations return immediately.

use super::mem::MemStorage;
use super::{MetricRow, Storage};
use crate::error::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Serialize, Deserialize, Default)]
struct Snapshot {
    #[serde(rename = "GaugeMetrics")]
    gauge_metrics: HashMap<String, f64>,
    #[serde(rename = "CounterMetrics")]
    counter_metrics: HashMap<String, i64>,
}

pub struct FileStorage {
    mem: MemStorage,
    path: PathBuf,
    sync_save: bool,
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl FileStorage {
    /// `flush_period == Duration::ZERO` selects synchronous flushing;
    /// any other value starts a background flush ticker.
    pub fn new(path: impl Into<PathBuf>, flush_period: Duration, restore_on_start: bool) -> Self {
        let path = path.into();
        let mem = MemStorage::new();

        if restore_on_start {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<Snapshot>(&contents) {
                    Ok(snapshot) => {
                        for (id, v) in snapshot.gauge_metrics {
                            mem.set_gauge_sync(&id, v);
                        }
                        for (id, v) in snapshot.counter_metrics {
                            mem.add_counter_sync(&id, v);
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to parse storage snapshot, starting empty"),
                },
                Err(e) => {
                    tracing::error!(error = %e, path = %path.display(), "failed to read storage snapshot, starting empty")
                }
            }
        }

        let sync_save = flush_period.is_zero();
        let shutdown = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let storage = Self {
            mem,
            path,
            sync_save,
            shutdown: shutdown.clone(),
            stopped: stopped.clone(),
        };

        if !sync_save {
            storage.spawn_flush_ticker(flush_period);
        }

        storage
    }

    fn spawn_flush_ticker(&self, period: Duration) {
        let path = self.path.clone();
        let shutdown = self.shutdown.clone();
        let stopped = self.stopped.clone();
        // Arc clones share the live maps with `self.mem`, so the ticker
        // sees every write made after construction, not a frozen copy.
        let snapshot_source = SnapshotHandle {
            gauges: self.mem.gauges.clone(),
            counters: self.mem.counters.clone(),
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = flush_to_path(&path, &snapshot_source).await {
                            tracing::error!(error = %e, "background flush failed");
                        }
                    }
                    _ = shutdown.notified() => {
                        stopped.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            gauge_metrics: self
                .mem
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            counter_metrics: self
                .mem
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    async fn try_flush(&self) -> Result<(), Error> {
        let snapshot = self.snapshot();
        flush_snapshot_with_retry(&self.path, &snapshot).await
    }
}

/// Shared handle on the live maps (`Arc` clones, not deep copies),
/// handed to the background ticker so it doesn't need to borrow
/// `FileStorage` across `.await` while still observing every write.
struct SnapshotHandle {
    gauges: Arc<dashmap::DashMap<String, f64>>,
    counters: Arc<dashmap::DashMap<String, i64>>,
}

async fn flush_to_path(path: &std::path::Path, handle: &SnapshotHandle) -> Result<(), Error> {
    let snapshot = Snapshot {
        gauge_metrics: handle
            .gauges
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect(),
        counter_metrics: handle
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect(),
    };
    flush_snapshot_with_retry(path, &snapshot).await
}

async fn flush_snapshot_with_retry(path: &std::path::Path, snapshot: &Snapshot) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(snapshot)?;
    let path = path.to_path_buf();
    crate::retry::retry_if(
        || {
            let data = data.clone();
            let path = path.clone();
            async move { tokio::fs::write(&path, &data).await }
        },
        |e: &std::io::Error| e.kind() == ErrorKind::PermissionDenied,
    )
    .await
    .map_err(Error::from)
}

#[async_trait]
impl Storage for FileStorage {
    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), Error> {
        self.mem.set_gauge_sync(id, value);
        if self.sync_save {
            self.try_flush().await?;
        }
        Ok(())
    }

    async fn get_gauge(&self, id: &str) -> Result<f64, Error> {
        self.mem.get_gauge(id).await
    }

    async fn add_counter(&self, id: &str, delta: i64) -> Result<i64, Error> {
        let total = self.mem.add_counter_sync(id, delta);
        if self.sync_save {
            self.try_flush().await?;
        }
        Ok(total)
    }

    async fn get_counter(&self, id: &str) -> Result<i64, Error> {
        self.mem.get_counter(id).await
    }

    async fn get_all(&self) -> Result<Vec<MetricRow>, Error> {
        self.mem.get_all().await
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

    async fn close(&self) {
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn synchronous_flush_persists_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let storage = FileStorage::new(&path, StdDuration::ZERO, false);
        storage.set_gauge("a", 1.0).await.unwrap();
        storage.add_counter("b", 5).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let snapshot: Snapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(snapshot.gauge_metrics.get("a"), Some(&1.0));
        assert_eq!(snapshot.counter_metrics.get("b"), Some(&5));
    }

    #[tokio::test]
    async fn restore_on_start_round_trips_get_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let storage = FileStorage::new(&path, StdDuration::ZERO, false);
        storage.set_gauge("a", 42.5).await.unwrap();
        storage.add_counter("c", 3).await.unwrap();
        let before = {
            let mut rows = storage.get_all().await.unwrap();
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            rows
        };
        storage.close().await;
        drop(storage);

        let reopened = FileStorage::new(&path, StdDuration::ZERO, true);
        let after = {
            let mut rows = reopened.get_all().await.unwrap();
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            rows
        };
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn missing_file_on_restore_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let storage = FileStorage::new(&path, StdDuration::ZERO, true);
        assert!(storage.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn periodic_flush_persists_writes_made_after_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let storage = FileStorage::new(&path, StdDuration::from_millis(20), false);
        storage.set_gauge("a", 1.0).await.unwrap();
        storage.add_counter("b", 5).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(80)).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let snapshot: Snapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(snapshot.gauge_metrics.get("a"), Some(&1.0));
        assert_eq!(snapshot.counter_metrics.get("b"), Some(&5));
    }
}
