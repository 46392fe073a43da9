//! The server process: shared storage behind two transports, HTTP
//! (axum) and gRPC (tonic), started concurrently (spec §4.7, §5).

mod grpc;
pub mod handlers;
pub mod middleware;
pub mod router;

use crate::config::ServerConfig;
use crate::storage::{DbStorage, FileStorage, MemStorage, Storage};
use crate::wire_pb::pb::metrics_service_server::MetricsServiceServer;
use ipnetwork::IpNetwork;
use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub struct ServerState {
    pub storage: Arc<dyn Storage>,
    pub signing_key: String,
    pub private_key: Option<Arc<RsaPrivateKey>>,
    pub trusted_subnet: Option<IpNetwork>,
}

/// Picks a backend from `{database_dsn, file_storage_path, nothing}`
/// (spec §9 design note 1: "dispatch at configuration time based on
/// which of {DSN, filePath, nothing} is set").
async fn build_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn Storage>> {
    if let Some(dsn) = &config.database_dsn {
        tracing::info!("using db storage backend");
        let storage = DbStorage::connect(dsn).await?;
        return Ok(Arc::new(storage));
    }
    if let Some(path) = &config.file_storage_path {
        tracing::info!(path, "using file storage backend");
        let storage = FileStorage::new(
            path,
            Duration::from_secs(config.store_interval_secs),
            config.restore,
        );
        return Ok(Arc::new(storage));
    }
    tracing::info!("using in-memory storage backend");
    Ok(Arc::new(MemStorage::new()))
}

fn build_private_key(config: &ServerConfig) -> Option<Arc<RsaPrivateKey>> {
    config.crypto_key_path.as_ref().and_then(|path| {
        match crate::crypto::parse_private_key_pem_file(path) {
            Ok(key) => Some(Arc::new(key)),
            Err(e) => {
                tracing::error!(error = %e, path, "failed to load private key, starting without encryption");
                None
            }
        }
    })
}

fn build_trusted_subnet(config: &ServerConfig) -> Option<IpNetwork> {
    config.trusted_subnet.as_ref().and_then(|cidr| {
        cidr.parse()
            .map_err(|e| tracing::error!(error = %e, cidr = %cidr, "invalid trusted subnet, ignoring"))
            .ok()
    })
}

/// Builds storage and starts the HTTP and gRPC servers concurrently;
/// returns once either transport exits or a Ctrl-C signal arrives, then
/// closes storage (spec §5: "Stop(timeout)... then closes storage").
pub async fn run_until_shutdown(config: ServerConfig) -> anyhow::Result<()> {
    let storage = build_storage(&config).await?;
    let state = Arc::new(ServerState {
        storage: storage.clone(),
        signing_key: config.key_for_signing.clone(),
        private_key: build_private_key(&config),
        trusted_subnet: build_trusted_subnet(&config),
    });

    let http_addr: SocketAddr = config
        .run_address
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));
    let grpc_addr: SocketAddr = config
        .grpc_address
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8081)));

    let app = router::build(state.clone());
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(address = %http_addr, "HTTP listening");
    let http_server = tokio::spawn(async move {
        axum::serve(http_listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    tracing::info!(address = %grpc_addr, "gRPC listening");
    let grpc_service = MetricsServiceServer::new(grpc::GrpcMetricsService::new(state.clone()));
    let grpc_server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, shutdown_signal())
            .await
    });

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server task panicked");
            }
        }
        result = grpc_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server task panicked");
            }
        }
    }

    storage.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}
