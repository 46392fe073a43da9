//! Agent process entry point.

use metsys::config::AgentConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    metsys::buildinfo::print_banner("metsys-agent");
    let config = AgentConfig::parse();
    metsys::agent::run_until_shutdown(config).await;
}
