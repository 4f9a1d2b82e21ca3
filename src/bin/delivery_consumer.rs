//! Consumes search results and forwards the notification to the client's
//! sockets through the notification worker.

use std::sync::Arc;
use tracing::{error, info};

use patient_matching::env::HandlerKind;
use patient_matching::matching::{PatientMatcher, SimulatedMatch, TracingInterceptor};
use patient_matching::notify::HttpMessageSender;
use patient_matching::rabbitmq::{classified, permanent, task, AmqpTransport, HandlerFactory, Transport, Worker};
use patient_matching::{runtime, telemetry, Config, SearchResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = Config::load()?;

    let connection = runtime::connect_broker(&config).await?;
    let transport: Arc<dyn Transport> = Arc::new(AmqpTransport::new(connection.clone()));
    let sender = HttpMessageSender::new(&config.notifier_url, config.connect_timeout())?;

    let matcher = Arc::new(
        PatientMatcher::new(
            config.publication_targets(),
            Arc::new(SimulatedMatch::new(config.match_delay(), config.match_max_results)),
        )
        .with_sender(Arc::new(sender))
        .with_interceptor(Arc::new(TracingInterceptor)),
    );

    let deliver = task(move |body| {
        let matcher = matcher.clone();
        async move {
            let result: SearchResult = serde_json::from_value(body)
                .map_err(|e| permanent(anyhow::Error::new(e).context("Malformed search result")))?;
            matcher
                .send_message_to_client(&result.client_id, result.found_patients)
                .await
                .map_err(|e| classified(e.kind(), e))?;
            Ok::<(), anyhow::Error>(())
        }
    });

    let factory = HandlerFactory::new(
        Some(transport),
        &config.retry_exchange,
        &config.dead_letter_exchange,
    );
    let handler = match config.delivery_handler {
        HandlerKind::Simple => factory.simple(deliver),
        HandlerKind::WithRetries => factory.with_retries(deliver, config.max_retry_attempts),
    };

    let worker = Worker::new(&config.result_queue, handler).with_prefetch(config.rabbitmq_prefetch_count);
    info!(
        queue = worker.queue(),
        handler = ?config.delivery_handler,
        "Delivery consumer started"
    );

    tokio::select! {
        result = worker.run(connection) => {
            if let Err(e) = &result {
                error!("Delivery consumer stopped: {}", e);
            }
            result?;
        }
        _ = runtime::shutdown_signal() => {}
    }

    Ok(())
}
