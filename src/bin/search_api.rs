//! Accepts search requests over HTTP and queues them on the request exchange.
//!
//! Symptoms are recorded by the CRUD service, which this process has no
//! client for yet. It runs with an empty in-memory `SymptomRepository`, so
//! every request it publishes carries `symptoms: 0` until a repository backed
//! by that service is plugged in through `PatientMatcher::with_symptoms`.

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use patient_matching::matching::{
    InMemorySymptomRepository, Operation, PatientMatcher, SimulatedMatch, TracingInterceptor,
};
use patient_matching::rabbitmq::{AmqpTransport, Publisher};
use patient_matching::{api, runtime, telemetry, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = Config::load()?;

    let targets = config.publication_targets();
    targets.require_all(&[Operation::PublishRequestForSearchPatients])?;

    let connection = runtime::connect_broker(&config).await?;
    let publisher = Arc::new(Publisher::new(Arc::new(AmqpTransport::new(connection))));

    let matcher = PatientMatcher::new(
        targets,
        Arc::new(SimulatedMatch::new(config.match_delay(), config.match_max_results)),
    )
    .with_publisher(publisher)
    .with_symptoms(Arc::new(InMemorySymptomRepository::new()))
    .with_interceptor(Arc::new(TracingInterceptor));

    let listener = TcpListener::bind(&config.api_bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.api_bind))?;
    info!("Search API listening on {}", config.api_bind);

    axum::serve(listener, api::router(Arc::new(matcher)))
        .with_graceful_shutdown(runtime::shutdown_signal())
        .await?;

    Ok(())
}
