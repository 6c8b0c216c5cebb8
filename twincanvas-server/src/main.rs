//! TwinCanvas relay server.
//!
//! Configured through environment variables (see [`ServerConfig::from_env`]);
//! log verbosity follows `RUST_LOG` and defaults to `info`.

use log::{error, info};
use twincanvas_relay::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    info!("Starting TwinCanvas relay...");

    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Relay stopped: {e}");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connection(s) served, {} message(s) relayed, {} dropped",
                stats.total_connections,
                stats.relay.messages_relayed,
                stats.relay.messages_dropped
            );
            Ok(())
        }
    }
}
