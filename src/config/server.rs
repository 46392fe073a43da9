//! Server configuration: CLI flags via `clap`, then an environment
//! overlay via `envy`, mirroring `internal/server/config.go`.

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(about = "metsys metrics server")]
struct Cli {
    /// Server address, ip:port
    #[arg(short = 'a', long = "address", default_value = "localhost:8080")]
    address: String,

    /// gRPC listen address
    #[arg(long = "grpc-address", default_value = "localhost:8081")]
    grpc_address: String,

    /// HMAC signing key
    #[arg(short = 'k', long = "key", default_value = "")]
    key: String,

    /// Path to the server's RSA private key (PEM); enables request decryption
    #[arg(long = "crypto-key")]
    crypto_key: Option<String>,

    /// CIDR allow-list for X-Real-IP (e.g. "10.0.0.0/8")
    #[arg(short = 't', long = "trusted-subnet")]
    trusted_subnet: Option<String>,

    /// File storage path; selects the file backend when set and no DSN is given
    #[arg(short = 'f', long = "file-storage-path")]
    file_storage_path: Option<String>,

    /// Snapshot flush period in seconds; 0 means synchronous flush
    #[arg(short = 'i', long = "store-interval", default_value_t = 300)]
    store_interval: u64,

    /// Restore state from the storage file on startup
    #[arg(short = 'r', long = "restore", default_value_t = true)]
    restore: bool,

    /// Postgres DSN; selects the db backend when set
    #[arg(short = 'd', long = "database-dsn")]
    database_dsn: Option<String>,
}

#[derive(Deserialize, Default)]
struct EnvOverlay {
    #[serde(rename = "ADDRESS")]
    address: Option<String>,
    #[serde(rename = "GRPC_ADDRESS")]
    grpc_address: Option<String>,
    #[serde(rename = "KEY")]
    key: Option<String>,
    #[serde(rename = "CRYPTO_KEY")]
    crypto_key: Option<String>,
    #[serde(rename = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,
    #[serde(rename = "FILE_STORAGE_PATH")]
    file_storage_path: Option<String>,
    #[serde(rename = "STORE_INTERVAL")]
    store_interval: Option<u64>,
    #[serde(rename = "RESTORE")]
    restore: Option<bool>,
    #[serde(rename = "DATABASE_DSN")]
    database_dsn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub run_address: String,
    pub grpc_address: String,
    pub key_for_signing: String,
    pub crypto_key_path: Option<String>,
    pub trusted_subnet: Option<String>,
    pub file_storage_path: Option<String>,
    pub store_interval_secs: u64,
    pub restore: bool,
    pub database_dsn: Option<String>,
}

impl ServerConfig {
    pub fn parse() -> Self {
        let cli = Cli::parse();
        let env: EnvOverlay = envy::from_env().unwrap_or_default();

        let config = Self {
            run_address: env.address.unwrap_or(cli.address),
            grpc_address: env.grpc_address.unwrap_or(cli.grpc_address),
            key_for_signing: env.key.unwrap_or(cli.key),
            crypto_key_path: env.crypto_key.or(cli.crypto_key),
            trusted_subnet: env.trusted_subnet.or(cli.trusted_subnet),
            file_storage_path: env.file_storage_path.or(cli.file_storage_path),
            store_interval_secs: env.store_interval.unwrap_or(cli.store_interval),
            restore: env.restore.unwrap_or(cli.restore),
            database_dsn: env.database_dsn.or(cli.database_dsn),
        };

        tracing::info!(address = %config.run_address, "server configured");
        config
    }
}
