//! Worker pool: `rate_limit` workers draining the job channel and
//! shipping each metric to the server over HTTP, opportunistically
//! mirrored over gRPC (spec §4.6).

use crate::model::Metric;
use crate::wire_pb::pb::metrics_service_client::MetricsServiceClient;
use crate::wire_pb::pb::UpdateMetricRequest;
use hmac::{Hmac, Mac};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use rsa::RsaPublicKey;
use sha2::Sha256;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tonic::transport::Channel;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),
}

impl SendError {
    fn is_transient(&self) -> bool {
        match self {
            // Any non-2xx, plus connect/timeout errors, are retried
            // (spec §4.6: "retry on net.Error, io.EOF, or HTTP status
            // non-200").
            SendError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SendError::Status(_) => true,
        }
    }
}

/// Shared context every worker needs to send a job; cheap to clone
/// (an `Arc`-backed handle plus a couple of `Clone` client types).
#[derive(Clone)]
pub struct SendContext {
    pub http: reqwest::Client,
    pub server_address: String,
    pub signing_key: String,
    pub public_key: Option<Arc<RsaPublicKey>>,
    pub grpc: Option<MetricsServiceClient<Channel>>,
    pub local_ip: String,
}

/// Spawns `rate_limit` workers draining `jobs_rx`; returns their join
/// handles so the caller can await them after the channel is closed
/// (spec §5: "the agent waits on a wait group for worker completion").
pub fn spawn_pool(
    rate_limit: usize,
    jobs_rx: mpsc::Receiver<Metric>,
    ctx: SendContext,
) -> Vec<tokio::task::JoinHandle<()>> {
    let jobs_rx = Arc::new(AsyncMutex::new(jobs_rx));
    (0..rate_limit.max(1))
        .map(|id| {
            let jobs_rx = jobs_rx.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { worker_loop(id, jobs_rx, ctx).await })
        })
        .collect()
}

async fn worker_loop(
    id: usize,
    jobs_rx: Arc<AsyncMutex<mpsc::Receiver<Metric>>>,
    ctx: SendContext,
) {
    loop {
        let job = {
            let mut rx = jobs_rx.lock().await;
            rx.recv().await
        };
        let metric = match job {
            Some(m) => m,
            None => break,
        };

        if let Err(e) = send_http(&ctx, &metric).await {
            tracing::error!(worker = id, metric = %metric.id, error = %e, "giving up on metric");
        }

        if let Some(grpc) = ctx.grpc.clone() {
            if let Err(e) = send_grpc(grpc, &metric, &ctx.local_ip).await {
                tracing::warn!(worker = id, metric = %metric.id, error = %e, "gRPC mirror failed");
            }
        }
    }
    tracing::debug!(worker = id, "worker stopped");
}

fn sign(key: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

async fn send_http(ctx: &SendContext, metric: &Metric) -> Result<(), crate::error::Error> {
    let body = serde_json::to_vec(metric)?;
    let signature = (!ctx.signing_key.is_empty()).then(|| sign(&ctx.signing_key, &body));

    let payload = match &ctx.public_key {
        Some(key) => crate::crypto::encrypt(&body, key)?,
        None => body,
    };
    let compressed = gzip_compress(&payload)?;
    let url = format!("{}/update/", ctx.server_address);

    crate::retry::retry_if(
        || {
            let compressed = compressed.clone();
            let signature = signature.clone();
            let client = ctx.http.clone();
            let url = url.clone();
            async move {
                let mut request = client
                    .post(&url)
                    .timeout(crate::model::SEND_METRIC_TIMEOUT)
                    .header(CONTENT_TYPE, "application/json")
                    .header(CONTENT_ENCODING, "gzip");
                if let Some(sig) = signature {
                    request = request.header("HashSHA256", sig);
                }
                let response = request.body(compressed).send().await?;
                if !response.status().is_success() {
                    return Err(SendError::Status(response.status()));
                }
                Ok(())
            }
        },
        SendError::is_transient,
    )
    .await
    .map_err(|e| crate::error::Error::Internal(anyhow::anyhow!(e)))
}

async fn send_grpc(
    mut client: MetricsServiceClient<Channel>,
    metric: &Metric,
    local_ip: &str,
) -> Result<(), tonic::Status> {
    let mut request = tonic::Request::new(UpdateMetricRequest {
        metric: Some(metric.into()),
    });
    if let Ok(value) = local_ip.parse() {
        request.metadata_mut().insert("x-real-ip", value);
    }
    client.update_metric(request).await?;
    Ok(())
}

/// Best-effort local outbound IPv4 address, used for the `X-Real-IP`
/// metadata on the opportunistic gRPC mirror (spec §4.6). Falls back to
/// the loopback address if no route can be determined.
pub fn local_ip() -> String {
    use std::net::UdpSocket;
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let body = br#"{"id":"m","type":"gauge","value":1.0}"#;
        let a = sign("secret", body);
        let b = sign("secret", body);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn gzip_round_trips_through_flate2() {
        use std::io::Read;
        let data = b"some metric payload".repeat(10);
        let compressed = gzip_compress(&data).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
