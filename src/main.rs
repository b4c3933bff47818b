//! # Convergence Controller binary
//!
//! Runs every controller enabled through the `CONTROLLERS` environment
//! variable until SIGINT.

use anyhow::Result;
use convergence_controller::runtime::{initialize, run_controllers};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    run_controllers(&init_result, shutdown).await?;
    info!("All controllers stopped");
    Ok(())
}
