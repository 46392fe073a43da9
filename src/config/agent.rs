//! Agent configuration: CLI flags via `clap`, then an environment
//! overlay via `envy` that wins over whatever the flags set — the same
//! two-phase `flags()` then `envs()` shape as `internal/agent/config.go`,
//! where an env var unconditionally overrides a flag.

use clap::Parser;
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "metsys metrics agent")]
struct Cli {
    /// Metsys server address, ip:port
    #[arg(short = 'a', long = "address", default_value = "http://localhost:8080")]
    address: String,

    /// Optional gRPC server address; when set the agent also fires an
    /// opportunistic UpdateMetric RPC alongside the HTTP POST.
    #[arg(long = "grpc-address")]
    grpc_address: Option<String>,

    /// Report interval in seconds
    #[arg(short = 'r', long = "report-interval", default_value_t = 10)]
    report_interval: u64,

    /// Poll interval in seconds
    #[arg(short = 'p', long = "poll-interval", default_value_t = 2)]
    poll_interval: u64,

    /// HMAC signing key
    #[arg(short = 'k', long = "key", default_value = "")]
    key: String,

    /// Path to the server's RSA public key (PEM); enables request encryption
    #[arg(long = "crypto-key")]
    crypto_key: Option<String>,

    /// Number of concurrent report workers (== job channel capacity)
    #[arg(short = 'l', long = "rate-limit", default_value_t = 1)]
    rate_limit: usize,
}

#[derive(Deserialize, Default)]
struct EnvOverlay {
    #[serde(rename = "ADDRESS")]
    address: Option<String>,
    #[serde(rename = "GRPC_ADDRESS")]
    grpc_address: Option<String>,
    #[serde(rename = "REPORT_INTERVAL")]
    report_interval: Option<u64>,
    #[serde(rename = "POLL_INTERVAL")]
    poll_interval: Option<u64>,
    #[serde(rename = "KEY")]
    key: Option<String>,
    #[serde(rename = "CRYPTO_KEY")]
    crypto_key: Option<String>,
    #[serde(rename = "RATE_LIMIT")]
    rate_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_address: String,
    pub grpc_address: Option<String>,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub key_for_signing: String,
    pub crypto_key_path: Option<String>,
    pub rate_limit: usize,
}

impl AgentConfig {
    pub fn parse() -> Self {
        let cli = Cli::parse();
        let env: EnvOverlay = envy::from_env().unwrap_or_default();

        let server_address =
            super::fix_protocol_prefix(&env.address.unwrap_or(cli.address));
        let grpc_address = env.grpc_address.or(cli.grpc_address);
        let report_interval = env.report_interval.unwrap_or(cli.report_interval);
        let poll_interval = env.poll_interval.unwrap_or(cli.poll_interval);
        let key_for_signing = env.key.unwrap_or(cli.key);
        let crypto_key_path = env.crypto_key.or(cli.crypto_key);
        let rate_limit = env.rate_limit.unwrap_or(cli.rate_limit).max(1);

        let config = Self {
            server_address,
            grpc_address,
            poll_interval: Duration::from_secs(poll_interval),
            report_interval: Duration::from_secs(report_interval),
            key_for_signing,
            crypto_key_path,
            rate_limit,
        };

        tracing::info!(address = %config.server_address, rate_limit = config.rate_limit, "agent configured");
        config
    }
}
