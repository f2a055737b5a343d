//! Runs the projections against Postgres until Ctrl-C.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use carelog_app::{Stores, start_projections};
use carelog_infra::config::CarelogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    carelog_observability::init();

    let config = CarelogConfig::from_env()?;
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for the projector")?;
    let stores = Stores::postgres(url, &config).await?;

    let handle = start_projections(&stores, &config, CancellationToken::new()).await?;
    for status in handle.statuses() {
        tracing::info!(projection = %status.projection, checkpoint = ?status.checkpoint, "projection running");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    handle.shutdown().await;
    Ok(())
}
