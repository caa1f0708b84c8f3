//! # Disaster Alert Server
//!
//! Polls the configured disaster feeds, persists every new record, and fans
//! broadcast-worthy records out to WebSocket subscribers.
//!
//! ## Surfaces
//! - `GET /api/disasters`: GeoJSON query over stored records.
//! - `GET /api/disasters/{id}`: one record.
//! - `POST /api/disasters/ack`: acknowledgement ledger for downstream sinks.
//! - `GET /ws`: filtered live stream.
//! - `POST /api/debug/inject`: push a synthetic record through the pipeline.
//!
//! ## Shutdown
//! SIGINT/SIGTERM stops the pollers, drains the workers, closes every live
//! session, and only then stops the HTTP listener.

use anyhow::Result;
use lib_alerts::loggers::setup_logging;
use lib_alerts::Pipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod alert_logic;
use alert_logic::{config, downstream, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let _log_guard = setup_logging(config.log_dir(), config.log_level(), "server_alerts")?;

    let pipeline_config = config.pipeline_config()?;
    info!("{}", pipeline_config);

    let store = state::open_store(&config).await?;
    let pipeline = Arc::new(Pipeline::from_config(&pipeline_config, store)?);

    let shutdown = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let app_state = state::AppState::new(Arc::clone(&pipeline)).with_rate_limit(config.rate_limit_per_sec());
    let mut downstream_handle = tokio::spawn(downstream::run(addr, app_state, shutdown.clone()));

    // Wait for shutdown signal, or for the listener to die on its own
    tokio::select! {
        _ = wait_for_signal() => {}
        res = &mut downstream_handle => {
            error!("Downstream server exited early: {:?}", res);
            pipeline.shutdown(pipeline_config.shutdown_timeout()).await?;
            return res?;
        }
    }

    if let Err(e) = pipeline.shutdown(pipeline_config.shutdown_timeout()).await {
        error!("Pipeline shutdown incomplete: {}", e);
    }
    shutdown.cancel();
    downstream_handle.await??;

    info!("Shutdown complete.");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received, initiating shutdown.");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
