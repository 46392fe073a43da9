//! The agent process: two pollers feeding an aggregator that fans out
//! onto a bounded job channel drained by a worker pool (spec §4.4-§4.6,
//! §5). `Agent::spawn` starts every task; `Agent::stop` cancels them and
//! waits for all to finish, mirroring the original's cancel-then-
//! wait-group shutdown.

mod aggregator;
mod alloc_stats;
mod pollers;
mod worker;

use crate::config::AgentConfig;
use crate::model::Metric;
use crate::wire_pb::pb::metrics_service_client::MetricsServiceClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Agent {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Starts the runtime poller, system poller, aggregator, and worker
    /// pool. Returns immediately; tasks run in the background until
    /// [`Agent::stop`] is called.
    pub async fn spawn(config: AgentConfig) -> Self {
        let cancel = CancellationToken::new();

        let runtime_rx = pollers::spawn_runtime_poller(config.poll_interval, cancel.clone());
        let system_rx = pollers::spawn_system_poller(config.poll_interval, cancel.clone());

        // rateLimit also sizes the job channel (spec §5: "one job
        // channel (bounded rateLimit)").
        let (jobs_tx, jobs_rx) = tokio::sync::mpsc::channel::<Metric>(config.rate_limit.max(1));

        let aggregator_handle = {
            let cancel = cancel.clone();
            tokio::spawn(aggregator::run(
                runtime_rx,
                system_rx,
                config.report_interval,
                jobs_tx,
                cancel,
            ))
        };

        let public_key = match &config.crypto_key_path {
            Some(path) => match crate::crypto::parse_public_key_pem_file(path) {
                Ok(key) => Some(Arc::new(key)),
                Err(e) => {
                    tracing::error!(error = %e, path, "failed to load public key, sending unencrypted");
                    None
                }
            },
            None => None,
        };

        let grpc = match &config.grpc_address {
            Some(addr) => connect_grpc(addr).await,
            None => None,
        };

        let http = reqwest::Client::builder()
            .timeout(crate::model::SEND_METRIC_TIMEOUT)
            .build()
            .expect("reqwest client builds with default TLS config");

        let send_ctx = worker::SendContext {
            http,
            server_address: config.server_address.clone(),
            signing_key: config.key_for_signing.clone(),
            public_key,
            grpc,
            local_ip: worker::local_ip(),
        };

        let mut tasks = worker::spawn_pool(config.rate_limit, jobs_rx, send_ctx);
        tasks.push(aggregator_handle);

        Agent { cancel, tasks }
    }

    /// Cancels every long-lived task and waits for them to finish
    /// draining (spec §5: "agent waits on a wait group for worker
    /// completion").
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "agent task panicked during shutdown");
            }
        }
    }
}

async fn connect_grpc(addr: &str) -> Option<MetricsServiceClient<tonic::transport::Channel>> {
    let endpoint = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    match tonic::transport::Endpoint::from_shared(endpoint.clone()) {
        Ok(ep) => match ep.connect().await {
            Ok(channel) => Some(MetricsServiceClient::new(channel)),
            Err(e) => {
                tracing::warn!(error = %e, address = %endpoint, "gRPC endpoint unreachable, HTTP-only reporting");
                None
            }
        },
        Err(e) => {
            tracing::error!(error = %e, address = %endpoint, "invalid gRPC address");
            None
        }
    }
}

/// Runs the agent until Ctrl-C, then shuts down gracefully.
pub async fn run_until_shutdown(config: AgentConfig) {
    let agent = Agent::spawn(config).await;
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received, draining agent tasks");
    agent.stop().await;
}
