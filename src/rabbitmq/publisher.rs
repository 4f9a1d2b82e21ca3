use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    BasicProperties, Channel, Connection,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::{ErrorKind, RabbitMQError};
use crate::message::Message;

const PERSISTENT: u8 = 2;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("publisher is not configured with a broker connection")]
    NotConfigured,

    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] RabbitMQError),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::NotConfigured => ErrorKind::Configuration,
            PublishError::SerializationError(_) => ErrorKind::Permanent,
            PublishError::Broker(e) => e.kind(),
        }
    }
}

/// A message ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Moves a batch of messages to the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn transmit(&self, batch: &[Outgoing]) -> Result<(), RabbitMQError>;
}

/// Publishes over a fresh confirm-mode channel per batch.
pub struct AmqpTransport {
    connection: Arc<Connection>,
}

impl AmqpTransport {
    pub fn new(connection: Arc<Connection>) -> Self {
        AmqpTransport { connection }
    }

    async fn publish_all(channel: &Channel, batch: &[Outgoing]) -> Result<(), RabbitMQError> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to enable confirms: {}", e)))?;

        for outgoing in batch {
            let properties = BasicProperties::default()
                .with_message_id(Uuid::new_v4().to_string().into())
                .with_content_type("application/json".into())
                .with_delivery_mode(PERSISTENT)
                .with_timestamp(chrono::Utc::now().timestamp() as u64);

            let confirm = channel
                .basic_publish(
                    &outgoing.exchange,
                    &outgoing.routing_key,
                    BasicPublishOptions::default(),
                    &outgoing.payload,
                    properties,
                )
                .await
                .map_err(|e| RabbitMQError::PublishError(e.to_string()))?
                .await
                .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;

            if let Confirmation::Nack(_) = confirm {
                return Err(RabbitMQError::PublishError(format!(
                    "broker refused message for exchange '{}'",
                    outgoing.exchange
                )));
            }

            debug!(
                exchange = %outgoing.exchange,
                routing_key = %outgoing.routing_key,
                "Published message"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn transmit(&self, batch: &[Outgoing]) -> Result<(), RabbitMQError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| RabbitMQError::ChannelError(e.to_string()))?;

        let published = Self::publish_all(&channel, batch).await;

        // The channel goes back whether or not the batch made it.
        if let Err(e) = channel.close(200, "Publish batch complete").await {
            warn!("Failed to close publish channel: {}", e);
        }

        published
    }
}

/// Shared handle for publishing. Only one [`PublishScope`] can be open at a
/// time per publisher.
pub struct Publisher {
    transport: Option<Arc<dyn Transport>>,
    lock: Mutex<()>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Publisher {
            transport: Some(transport),
            lock: Mutex::new(()),
        }
    }

    /// A publisher with no broker behind it. Every `begin` fails.
    pub fn unconfigured() -> Self {
        Publisher {
            transport: None,
            lock: Mutex::new(()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn begin(&self) -> Result<PublishScope<'_>, PublishError> {
        let transport = self.transport.as_ref().ok_or(PublishError::NotConfigured)?;
        let guard = self.lock.lock().await;
        Ok(PublishScope {
            transport: transport.as_ref(),
            staged: Vec::new(),
            _guard: guard,
        })
    }

    /// Publishes `messages` in a single scope.
    pub async fn publish_all(&self, messages: Vec<Message>) -> Result<usize, PublishError> {
        let mut scope = self.begin().await?;
        for message in messages {
            scope.plan(message)?;
        }
        scope.finish().await
    }
}

/// Messages staged while holding the publisher. Nothing reaches the broker
/// until [`PublishScope::finish`].
pub struct PublishScope<'a> {
    transport: &'a dyn Transport,
    staged: Vec<Outgoing>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> PublishScope<'a> {
    pub fn plan(&mut self, message: Message) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&message.body)?;
        self.staged.push(Outgoing {
            exchange: message.target,
            routing_key: message.routing_key,
            payload,
        });
        Ok(())
    }

    /// Stages `payload` exactly as given.
    pub fn plan_verbatim(&mut self, exchange: &str, routing_key: &str, payload: Vec<u8>) {
        self.staged.push(Outgoing {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
        });
    }

    pub async fn finish(mut self) -> Result<usize, PublishError> {
        let batch = std::mem::take(&mut self.staged);
        if batch.is_empty() {
            return Ok(0);
        }

        match self.transport.transmit(&batch).await {
            Ok(()) => {
                info!(messages = batch.len(), "Publish batch transmitted");
                Ok(batch.len())
            }
            Err(e) => {
                error!(messages = batch.len(), "Publish batch failed: {}", e);
                Err(e.into())
            }
        }
    }
}

impl Drop for PublishScope<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            warn!(
                messages = self.staged.len(),
                "Publish scope dropped before finish; staged messages discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        batches: StdMutex<Vec<Vec<Outgoing>>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn transmit(&self, batch: &[Outgoing]) -> Result<(), RabbitMQError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            if self.fail {
                return Err(RabbitMQError::PublishError("down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scope_transmits_staged_messages_as_one_batch() {
        let recorder = Arc::new(Recorder::default());
        let publisher = Publisher::new(recorder.clone());

        let mut scope = publisher.begin().await.unwrap();
        scope.plan(Message::new("ex", json!({"a": 1})).with_routing_key("rk")).unwrap();
        scope.plan_verbatim("dlx", "rk", b"raw".to_vec());
        assert_eq!(recorder.batches.lock().unwrap().len(), 0);
        assert_eq!(scope.finish().await.unwrap(), 2);

        let batches = recorder.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].payload, br#"{"a":1}"#.to_vec());
        assert_eq!(batches[0][1].payload, b"raw".to_vec());
    }

    #[tokio::test]
    async fn test_unconfigured_publisher_refuses_to_begin() {
        let publisher = Publisher::unconfigured();
        let err = publisher.begin().await.err().unwrap();
        assert!(matches!(err, PublishError::NotConfigured));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_lock_is_released_after_failed_transmit() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let publisher = Publisher::new(recorder.clone());

        let result = publisher.publish_all(vec![Message::new("ex", json!(1))]).await;
        assert!(matches!(result, Err(PublishError::Broker(_))));

        // A second scope can still be opened.
        let scope = publisher.begin().await.unwrap();
        assert_eq!(scope.finish().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scopes_are_mutually_exclusive() {
        let publisher = Arc::new(Publisher::new(Arc::new(Recorder::default())));
        let first = publisher.begin().await.unwrap();

        let contender = publisher.clone();
        let waiting = tokio::spawn(async move {
            let scope = contender.begin().await.unwrap();
            scope.finish().await.unwrap()
        });

        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        drop(first);
        assert_eq!(waiting.await.unwrap(), 0);
    }
}
