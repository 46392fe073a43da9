//! The aggregator state machine (spec §4.5, §9 "Aggregator as state
//! machine"): owns the latest snapshot of each poll stream and a
//! report ticker, expands them into metric jobs on every tick, and
//! feeds the bounded job channel the worker pool drains.

use super::pollers::{RuntimeSnapshot, SystemSnapshot};
use crate::model::Metric;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    PollReceived,
    Reporting,
}

/// Flattens the current snapshots into the wire metrics for one
/// report. `poll_count_base` is the `PollCount` value already reported
/// as of the previous tick, so the counter sent here is the
/// polls-since-last-report delta (spec §4.5).
fn expand(runtime: &RuntimeSnapshot, system: &SystemSnapshot, poll_count_base: u64) -> Vec<Metric> {
    let mut metrics = Vec::with_capacity(runtime.gauges.len() + 4);
    for (&name, &value) in &runtime.gauges {
        metrics.push(Metric::gauge(name, value));
    }
    metrics.push(Metric::gauge("RandomValue", runtime.random_value));
    let delta = runtime.poll_count.saturating_sub(poll_count_base) as i64;
    metrics.push(Metric::counter("PollCount", delta));

    metrics.push(Metric::gauge("TotalMemory", system.total_memory));
    metrics.push(Metric::gauge("FreeMemory", system.free_memory));
    metrics.push(Metric::gauge("CPUutilization1", system.cpu_utilization_1));
    metrics
}

/// Runs until `cancel` fires. On cancellation it makes one best-effort
/// final flush of whatever snapshot it currently holds before closing
/// `jobs_tx` (spec §4.5: "flush any remaining snapshot ... then close
/// the channel, allowing workers to drain").
pub async fn run(
    mut runtime_rx: watch::Receiver<RuntimeSnapshot>,
    mut system_rx: watch::Receiver<SystemSnapshot>,
    report_interval: Duration,
    jobs_tx: mpsc::Sender<Metric>,
    cancel: CancellationToken,
) {
    let mut state = State::Waiting;
    let mut ticker = tokio::time::interval(report_interval);
    ticker.tick().await; // first tick fires immediately; skip it
    let mut poll_count_base = 0u64;

    loop {
        tokio::select! {
            changed = runtime_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                state = State::PollReceived;
            }
            changed = system_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                state = State::PollReceived;
            }
            _ = ticker.tick() => {
                state = State::Reporting;
                let runtime_snapshot = runtime_rx.borrow().clone();
                let system_snapshot = system_rx.borrow().clone();
                let metrics = expand(&runtime_snapshot, &system_snapshot, poll_count_base);
                poll_count_base = runtime_snapshot.poll_count;

                tracing::debug!(count = metrics.len(), "reporting tick");
                for metric in metrics {
                    if jobs_tx.send(metric).await.is_err() {
                        tracing::debug!("job channel closed, stopping aggregator");
                        return;
                    }
                }
                state = State::Waiting;
            }
            _ = cancel.cancelled() => {
                let runtime_snapshot = runtime_rx.borrow().clone();
                let system_snapshot = system_rx.borrow().clone();
                let metrics = expand(&runtime_snapshot, &system_snapshot, poll_count_base);
                for metric in metrics {
                    let _ = jobs_tx.try_send(metric);
                }
                break;
            }
        }
    }

    tracing::debug!(?state, "aggregator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_carries_poll_count_delta_not_absolute() {
        let mut runtime = RuntimeSnapshot::default();
        runtime.poll_count = 7;
        let system = SystemSnapshot::default();

        let metrics = expand(&runtime, &system, 4);
        let poll_count = metrics
            .iter()
            .find(|m| m.id == "PollCount")
            .expect("PollCount present");
        assert_eq!(poll_count.delta, Some(3));
    }

    #[test]
    fn expand_includes_system_gauges() {
        let runtime = RuntimeSnapshot::default();
        let mut system = SystemSnapshot::default();
        system.total_memory = 1024.0;

        let metrics = expand(&runtime, &system, 0);
        assert!(metrics.iter().any(|m| m.id == "TotalMemory" && m.value == Some(1024.0)));
        assert!(metrics.iter().any(|m| m.id == "CPUutilization1"));
    }
}
