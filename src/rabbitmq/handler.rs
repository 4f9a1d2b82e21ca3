use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::delivery::InboundDelivery;
use super::errors::is_permanent;
use super::publisher::{PublishError, Publisher, Transport};

/// The domain work a handler runs for each message body.
pub type Task = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub fn task<F, Fut>(f: F) -> Task
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |body| Box::pin(f(body)))
}

/// How a single delivery attempt was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Rejected,
    DeadLettered,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Unique per instance; two handlers wrapping the same task differ.
    fn id(&self) -> Uuid;

    /// Runs the task and settles the delivery. Broker failures are logged
    /// here and never returned.
    async fn handle(&self, delivery: &dyn InboundDelivery, body: Value) -> Outcome;
}

/// Acks on receipt, then runs the task. A failing task loses the message.
pub struct SimpleHandler {
    id: Uuid,
    task: Task,
}

impl SimpleHandler {
    pub fn new(task: Task) -> Self {
        SimpleHandler {
            id: Uuid::new_v4(),
            task,
        }
    }
}

#[async_trait]
impl MessageHandler for SimpleHandler {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn handle(&self, delivery: &dyn InboundDelivery, body: Value) -> Outcome {
        if let Err(e) = delivery.ack().await {
            error!(handler = %self.id, "Failed to acknowledge message: {}", e);
        }

        if let Err(e) = (self.task)(body).await {
            error!(
                handler = %self.id,
                routing_key = %delivery.routing_key(),
                "Error processing message, dropping it: {:#}", e
            );
        }

        Outcome::Acked
    }
}

/// Runs the task before settling. Failures are rejected into the retry
/// exchange until `max_retry_attempts` is reached, after which the message is
/// copied to the dead-letter exchange and acked. Failures marked permanent skip
/// the retries.
pub struct RetryingHandler {
    id: Uuid,
    task: Task,
    max_retry_attempts: u32,
    retry_exchange: String,
    dead_letter_exchange: String,
    dead_letters: Arc<Publisher>,
}

impl RetryingHandler {
    async fn dead_letter(&self, delivery: &dyn InboundDelivery) -> Result<(), PublishError> {
        let mut scope = self.dead_letters.begin().await?;
        scope.plan_verbatim(
            &self.dead_letter_exchange,
            delivery.routing_key(),
            delivery.data().to_vec(),
        );
        scope.finish().await.map(|_| ())
    }

    async fn reject(&self, delivery: &dyn InboundDelivery) -> Outcome {
        if let Err(e) = delivery.reject().await {
            error!(handler = %self.id, "Failed to reject message: {}", e);
        }
        Outcome::Rejected
    }
}

#[async_trait]
impl MessageHandler for RetryingHandler {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn handle(&self, delivery: &dyn InboundDelivery, body: Value) -> Outcome {
        let failure = match (self.task)(body).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    error!(handler = %self.id, "Failed to acknowledge message: {}", e);
                }
                return Outcome::Acked;
            }
            Err(e) => e,
        };

        let attempts = delivery.retry_count(&self.retry_exchange);
        let permanent = is_permanent(&failure);
        if !permanent && attempts < self.max_retry_attempts {
            warn!(
                handler = %self.id,
                attempts,
                max = self.max_retry_attempts,
                "Error processing message, scheduling retry: {:#}", failure
            );
            return self.reject(delivery).await;
        }

        error!(
            handler = %self.id,
            attempts,
            permanent,
            routing_key = %delivery.routing_key(),
            "Giving up on message, moving it to {}: {:#}", self.dead_letter_exchange, failure
        );

        match self.dead_letter(delivery).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    error!(handler = %self.id, "Failed to acknowledge dead-lettered message: {}", e);
                }
                Outcome::DeadLettered
            }
            Err(e) => {
                error!(handler = %self.id, "Failed to dead-letter message: {}", e);
                self.reject(delivery).await
            }
        }
    }
}

/// Builds handlers for one process. Every retrying handler shares a single
/// dead-letter publisher, created on first use.
pub struct HandlerFactory {
    transport: Option<Arc<dyn Transport>>,
    retry_exchange: String,
    dead_letter_exchange: String,
    dead_letters: OnceLock<Arc<Publisher>>,
}

impl HandlerFactory {
    pub fn new(
        transport: Option<Arc<dyn Transport>>,
        retry_exchange: &str,
        dead_letter_exchange: &str,
    ) -> Self {
        HandlerFactory {
            transport,
            retry_exchange: retry_exchange.to_string(),
            dead_letter_exchange: dead_letter_exchange.to_string(),
            dead_letters: OnceLock::new(),
        }
    }

    pub fn dead_letter_publisher(&self) -> Arc<Publisher> {
        self.dead_letters
            .get_or_init(|| {
                info!(exchange = %self.dead_letter_exchange, "Creating dead-letter publisher");
                Arc::new(match &self.transport {
                    Some(transport) => Publisher::new(transport.clone()),
                    None => Publisher::unconfigured(),
                })
            })
            .clone()
    }

    pub fn simple(&self, task: Task) -> Arc<dyn MessageHandler> {
        Arc::new(SimpleHandler::new(task))
    }

    pub fn with_retries(&self, task: Task, max_retry_attempts: u32) -> Arc<dyn MessageHandler> {
        Arc::new(RetryingHandler {
            id: Uuid::new_v4(),
            task,
            max_retry_attempts,
            retry_exchange: self.retry_exchange.clone(),
            dead_letter_exchange: self.dead_letter_exchange.clone(),
            dead_letters: self.dead_letter_publisher(),
        })
    }
}
