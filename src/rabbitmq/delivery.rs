use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
    types::{AMQPValue, FieldTable, ShortString},
};

use super::errors::{RabbitMQError, Result};

/// A message handed to a consumer, together with the means to settle it.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn routing_key(&self) -> &str;

    fn data(&self) -> &[u8];

    fn headers(&self) -> Option<&FieldTable>;

    async fn ack(&self) -> Result<()>;

    /// Rejects without requeueing, handing the message to the queue's
    /// dead-letter exchange.
    async fn reject(&self) -> Result<()>;

    /// How many times this message has already gone around `retry_exchange`.
    fn retry_count(&self, retry_exchange: &str) -> u32 {
        retry_count(self.headers(), retry_exchange)
    }
}

pub struct AmqpDelivery(pub Delivery);

#[async_trait]
impl InboundDelivery for AmqpDelivery {
    fn routing_key(&self) -> &str {
        self.0.routing_key.as_str()
    }

    fn data(&self) -> &[u8] {
        &self.0.data
    }

    fn headers(&self) -> Option<&FieldTable> {
        self.0.properties.headers().as_ref()
    }

    async fn ack(&self) -> Result<()> {
        self.0
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }

    async fn reject(&self) -> Result<()> {
        self.0
            .acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }
}

/// Sums the `x-death` counts the broker recorded for `retry_exchange`.
///
/// Entries for other exchanges (the first rejection from the origin queue is
/// recorded against the exchange the message was originally published to) do
/// not count.
pub fn retry_count(headers: Option<&FieldTable>, retry_exchange: &str) -> u32 {
    let deaths = headers.and_then(|h| h.inner().get(&ShortString::from("x-death")));
    let Some(AMQPValue::FieldArray(deaths)) = deaths else {
        return 0;
    };

    let exchange_key = ShortString::from("exchange");
    let count_key = ShortString::from("count");

    let total: u64 = deaths
        .as_slice()
        .iter()
        .filter_map(|death| match death {
            AMQPValue::FieldTable(death) => Some(death.inner()),
            _ => None,
        })
        .filter(|death| {
            death
                .get(&exchange_key)
                .and_then(as_text)
                .is_some_and(|exchange| exchange == retry_exchange.as_bytes())
        })
        .filter_map(|death| death.get(&count_key).and_then(as_count))
        .sum();

    u32::try_from(total).unwrap_or(u32::MAX)
}

fn as_text(value: &AMQPValue) -> Option<&[u8]> {
    match value {
        AMQPValue::LongString(s) => Some(s.as_bytes()),
        AMQPValue::ShortString(s) => Some(s.as_str().as_bytes()),
        _ => None,
    }
}

fn as_count(value: &AMQPValue) -> Option<u64> {
    match value {
        AMQPValue::ShortShortUInt(n) => Some(u64::from(*n)),
        AMQPValue::ShortUInt(n) => Some(u64::from(*n)),
        AMQPValue::LongUInt(n) => Some(u64::from(*n)),
        AMQPValue::ShortShortInt(n) => u64::try_from(*n).ok(),
        AMQPValue::ShortInt(n) => u64::try_from(*n).ok(),
        AMQPValue::LongInt(n) => u64::try_from(*n).ok(),
        AMQPValue::LongLongInt(n) => u64::try_from(*n).ok(),
        _ => None,
    }
}
