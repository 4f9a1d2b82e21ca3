//! Holds client websockets and fans notifications out to them.

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use patient_matching::notify::{self, NotificationRegistry};
use patient_matching::{runtime, telemetry, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = Config::load()?;

    let registry = Arc::new(NotificationRegistry::new());

    let listener = TcpListener::bind(&config.notifier_bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.notifier_bind))?;
    info!("Notification worker listening on {}", config.notifier_bind);

    axum::serve(listener, notify::router(registry))
        .with_graceful_shutdown(runtime::shutdown_signal())
        .await?;

    Ok(())
}
