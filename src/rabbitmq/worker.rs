use futures_lite::{Stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Connection,
};
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::delivery::{AmqpDelivery, InboundDelivery};
use super::errors::{RabbitMQError, Result};
use super::handler::MessageHandler;

/// Feeds every delivery from one queue to one handler.
pub struct Worker {
    queue: String,
    handler: Arc<dyn MessageHandler>,
    prefetch: u16,
    concurrent: bool,
}

impl Worker {
    pub fn new(queue: &str, handler: Arc<dyn MessageHandler>) -> Self {
        Worker {
            queue: queue.to_string(),
            handler,
            prefetch: 1,
            concurrent: false,
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Handles each delivery on its own task instead of one after another.
    /// At most `prefetch` deliveries are in flight.
    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consumes until the broker ends the stream, which is always an error.
    pub async fn run(self, connection: Arc<Connection>) -> Result<()> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| RabbitMQError::ChannelError(e.to_string()))?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to set QoS: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &self.queue,
                &format!("consumer-{}", self.handler.id()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::ConsumeError(e.to_string()))?;

        info!(
            queue = %self.queue,
            prefetch = self.prefetch,
            concurrent = self.concurrent,
            "Started consuming"
        );

        let processed = self
            .drive(Box::pin(consumer.map(|delivery| delivery.map(AmqpDelivery))))
            .await;

        Err(RabbitMQError::ConsumeError(format!(
            "consumer for '{}' stopped after {} deliveries",
            self.queue, processed
        )))
    }

    /// Processes deliveries from `stream` until it ends or fails, returning how
    /// many were handled.
    pub async fn drive<S, D, E>(&self, mut stream: S) -> usize
    where
        S: Stream<Item = std::result::Result<D, E>> + Unpin,
        D: InboundDelivery + 'static,
        E: Display,
    {
        let mut processed = 0;
        let mut in_flight = JoinSet::new();

        while let Some(delivery) = stream.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(queue = %self.queue, "Error receiving message: {}", e);
                    break;
                }
            };

            let body = parse_body(delivery.data());
            processed += 1;

            if self.concurrent {
                let handler = self.handler.clone();
                in_flight.spawn(async move { handler.handle(&delivery, body).await });
                while let Some(done) = in_flight.try_join_next() {
                    log_join(done);
                }
            } else {
                let outcome = self.handler.handle(&delivery, body).await;
                debug!(queue = %self.queue, ?outcome, "Delivery settled");
            }
        }

        while let Some(done) = in_flight.join_next().await {
            log_join(done);
        }

        warn!(queue = %self.queue, processed, "Delivery stream ended");
        processed
    }
}

fn log_join(done: std::result::Result<super::handler::Outcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => debug!(?outcome, "Delivery settled"),
        Err(e) => error!("Handler task failed: {}", e),
    }
}

/// Bodies that are not JSON reach the handler as a JSON string so the task
/// fails and the original bytes travel the retry path untouched.
fn parse_body(data: &[u8]) -> Value {
    serde_json::from_slice(data)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(data).into_owned()))
}
