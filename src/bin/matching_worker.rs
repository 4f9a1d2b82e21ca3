//! Consumes search requests, runs the match and publishes the result.

use std::sync::Arc;
use tracing::{error, info};

use patient_matching::matching::{Operation, PatientMatcher, SimulatedMatch, TracingInterceptor};
use patient_matching::rabbitmq::{classified, permanent, task, AmqpTransport, HandlerFactory, Publisher, Transport, Worker};
use patient_matching::{runtime, telemetry, Config, SearchRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = Config::load()?;

    let targets = config.publication_targets();
    targets.require_all(&[Operation::FindMatchingPatient])?;

    let connection = runtime::connect_broker(&config).await?;
    let transport: Arc<dyn Transport> = Arc::new(AmqpTransport::new(connection.clone()));

    let matcher = Arc::new(
        PatientMatcher::new(
            targets,
            Arc::new(SimulatedMatch::new(config.match_delay(), config.match_max_results)),
        )
        .with_publisher(Arc::new(Publisher::new(transport.clone())))
        .with_interceptor(Arc::new(TracingInterceptor)),
    );

    let factory = HandlerFactory::new(
        Some(transport),
        &config.retry_exchange,
        &config.dead_letter_exchange,
    );
    let handler = factory.with_retries(
        task(move |body| {
            let matcher = matcher.clone();
            async move {
                let request: SearchRequest = serde_json::from_value(body)
                    .map_err(|e| permanent(anyhow::Error::new(e).context("Malformed search request")))?;
                matcher
                    .find_matching_patient(&request.client_id, request.symptoms)
                    .await
                    .map_err(|e| classified(e.kind(), e))?;
                Ok::<(), anyhow::Error>(())
            }
        }),
        config.max_retry_attempts,
    );

    let worker = Worker::new(&config.request_queue, handler)
        .with_prefetch(config.rabbitmq_prefetch_count)
        .concurrent();
    info!(queue = worker.queue(), "Matching worker started");

    tokio::select! {
        result = worker.run(connection) => {
            if let Err(e) = &result {
                error!("Matching worker stopped: {}", e);
            }
            result?;
        }
        _ = runtime::shutdown_signal() => {}
    }

    Ok(())
}
