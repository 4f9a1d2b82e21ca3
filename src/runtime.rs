//! Startup and shutdown steps shared by the binaries.

use anyhow::Context;
use lapin::Connection;
use std::sync::Arc;
use tracing::info;

use crate::env::Config;
use crate::rabbitmq::ConnectionManager;

/// Connects to the broker and makes sure the pipeline topology exists.
pub async fn connect_broker(config: &Config) -> anyhow::Result<Arc<Connection>> {
    let connection = ConnectionManager::new(&config.amqp_addr)
        .with_reconnect_policy(
            config.rabbitmq_reconnect_attempts,
            config.rabbitmq_reconnect_delay_ms,
        )
        .with_connect_timeout(config.connect_timeout())
        .connect()
        .await
        .context("Failed to connect to RabbitMQ")?;

    let channel = connection
        .create_channel()
        .await
        .context("Failed to open channel for topology")?;
    config
        .topology()
        .declare(&channel)
        .await
        .context("Failed to declare broker topology")?;
    channel
        .close(200, "Topology declared")
        .await
        .context("Failed to close topology channel")?;

    Ok(connection)
}

pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
}
