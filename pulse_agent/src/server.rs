//! Sequential accept loop: one session at a time, by design.

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::metrics::MetricsProvider;
use crate::session::{self, SessionOutcome};

/// Bind and serve until a session asks for termination.
///
/// Each accepted connection runs to completion before the next accept, so
/// the agent holds exactly one read buffer and one client socket at any
/// moment. The CPU sampler inside `provider` is therefore never touched
/// concurrently. Returning `Ok` means a clean `terminate-agent` stop; the
/// process exits 0 from there.
pub async fn run(config: &AgentConfig, provider: &mut dyn MetricsProvider) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.bind, config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.bind, config.port))?;
    let local = listener.local_addr().context("reading bound address")?;
    info!(
        "listening on {local}, inspecting mount {}",
        config.mount.display()
    );

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                sleep(config.accept_pause).await;
                continue;
            }
        };
        debug!(%peer, "connection accepted");

        if session::run(stream, peer, config, provider).await == SessionOutcome::Terminate {
            info!("terminate command received, shutting down");
            return Ok(());
        }

        // throttle a misbehaving or rapidly-reconnecting client
        sleep(config.accept_pause).await;
    }
}
