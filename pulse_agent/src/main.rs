//! Entry point: logging first, then config, then the listener.

mod config;
mod metrics;
mod proto;
mod server;
mod session;
mod types;

use config::AgentConfig;
use metrics::SystemProbe;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::load(std::env::args());
    let mut probe = SystemProbe::new(config.mount.clone(), config.db_procs.clone());
    server::run(&config, &mut probe).await
}
