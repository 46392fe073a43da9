//! Runtime and system pollers (spec §4.4). Each runs as its own task
//! and publishes on a `watch` channel, which is the Rust-idiomatic
//! substitute for the "buffered channel sized ≥3, old snapshots
//! dropped" requirement in spec §9 ("Pollers as generators"): a watch
//! channel always holds exactly the latest value, so a slow aggregator
//! can never build a backlog.

use super::alloc_stats;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Gauge field names sampled every tick, mirroring `runtime.MemStats`.
/// Fields with no Rust equivalent (no tracing GC) are reported as 0.0.
pub const RUNTIME_GAUGE_NAMES: &[&str] = &[
    "Alloc",
    "BuckHashSys",
    "Frees",
    "GCCPUFraction",
    "GCSys",
    "HeapAlloc",
    "HeapIdle",
    "HeapInuse",
    "HeapObjects",
    "HeapReleased",
    "HeapSys",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "Mallocs",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "OtherSys",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
    "Sys",
    "TotalAlloc",
];

#[derive(Debug, Clone, Default)]
pub struct RuntimeSnapshot {
    pub gauges: HashMap<&'static str, f64>,
    pub random_value: f64,
    pub poll_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub total_memory: f64,
    pub free_memory: f64,
    pub cpu_utilization_1: f64,
}

fn sample_runtime(poll_count: u64) -> RuntimeSnapshot {
    let alloc = alloc_stats::snapshot();
    let mut gauges: HashMap<&'static str, f64> =
        RUNTIME_GAUGE_NAMES.iter().map(|&name| (name, 0.0)).collect();
    gauges.insert("Alloc", alloc.current_bytes as f64);
    gauges.insert("HeapAlloc", alloc.current_bytes as f64);
    gauges.insert("HeapInuse", alloc.current_bytes as f64);
    gauges.insert("Sys", alloc.current_bytes as f64);
    gauges.insert("TotalAlloc", alloc.total_bytes as f64);
    gauges.insert("Mallocs", alloc.mallocs as f64);
    gauges.insert("Frees", alloc.frees as f64);

    RuntimeSnapshot {
        gauges,
        random_value: rand::thread_rng().gen_range(0.0..1.0),
        poll_count,
    }
}

fn sample_system(sys: &mut System) -> SystemSnapshot {
    sys.refresh_memory();
    sys.refresh_cpu();
    let cpu_utilization_1 = sys
        .cpus()
        .first()
        .map(|cpu| cpu.cpu_usage() as f64)
        .unwrap_or(0.0);

    SystemSnapshot {
        total_memory: (sys.total_memory() * 1024) as f64,
        free_memory: (sys.free_memory() * 1024) as f64,
        cpu_utilization_1,
    }
}

/// Spawns the runtime poller and returns a receiver that always reads
/// the latest snapshot. Exits (and the task ends) once `cancel` fires.
pub fn spawn_runtime_poller(
    poll_interval: Duration,
    cancel: CancellationToken,
) -> watch::Receiver<RuntimeSnapshot> {
    let (tx, rx) = watch::channel(sample_runtime(0));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut poll_count = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    poll_count += 1;
                    if tx.send(sample_runtime(poll_count)).is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("runtime poller stopped");
    });
    rx
}

/// Spawns the system poller and returns a receiver that always reads
/// the latest snapshot.
pub fn spawn_system_poller(
    poll_interval: Duration,
    cancel: CancellationToken,
) -> watch::Receiver<SystemSnapshot> {
    let mut sys = System::new_all();
    let (tx, rx) = watch::channel(sample_system(&mut sys));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tx.send(sample_system(&mut sys)).is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("system poller stopped");
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_snapshot_carries_every_gauge_name() {
        let snap = sample_runtime(3);
        for name in RUNTIME_GAUGE_NAMES {
            assert!(snap.gauges.contains_key(name), "missing gauge {name}");
        }
        assert_eq!(snap.poll_count, 3);
        assert!((0.0..1.0).contains(&snap.random_value));
    }

    #[test]
    fn system_snapshot_reports_nonzero_memory() {
        let mut sys = System::new_all();
        let snap = sample_system(&mut sys);
        assert!(snap.total_memory >= 0.0);
        assert!(snap.free_memory >= 0.0);
    }
}
