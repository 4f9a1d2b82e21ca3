// Shared fakes for the integration tests. Not every test file uses all of them.
#![allow(dead_code)]

use async_trait::async_trait;
use lapin::types::{AMQPValue, FieldTable};
use std::sync::{Arc, Mutex};

use patient_matching::matching::MatchStrategy;
use patient_matching::notify::{MessageSender, NotificationRegistry, SendError};
use patient_matching::rabbitmq::{InboundDelivery, Outgoing, RabbitMQError, Transport};
use patient_matching::Message;

/// Records every batch instead of talking to a broker.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Outgoing>>,
    pub fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        RecordingTransport {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Outgoing> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn transmit(&self, batch: &[Outgoing]) -> Result<(), RabbitMQError> {
        if self.fail {
            return Err(RabbitMQError::ConnectionError("broker unreachable".to_string()));
        }
        self.sent.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

/// Always finds `found` patients and remembers the symptom counts it saw.
pub struct FixedMatch {
    pub found: u32,
    pub seen: Mutex<Vec<u32>>,
}

impl FixedMatch {
    pub fn new(found: u32) -> Self {
        FixedMatch {
            found,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MatchStrategy for FixedMatch {
    async fn find_matches(&self, _client_id: &str, symptoms: u32) -> u32 {
        self.seen.lock().unwrap().push(symptoms);
        self.found
    }
}

/// Delivers straight into a registry, skipping the HTTP hop.
pub struct RegistrySender(pub Arc<NotificationRegistry>);

#[async_trait]
impl MessageSender for RegistrySender {
    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let body = message.body.as_str().unwrap_or_default();
        self.0.broadcast(&message.target, body);
        Ok(())
    }
}

/// A bridge that refuses every notification as malformed.
pub struct RejectingSender;

#[async_trait]
impl MessageSender for RejectingSender {
    async fn send(&self, _message: &Message) -> Result<(), SendError> {
        Err(SendError::Status(reqwest::StatusCode::BAD_REQUEST))
    }
}

/// An inbound message whose settlement is observable after the worker has
/// consumed it.
pub struct FakeDelivery {
    pub routing_key: String,
    pub data: Vec<u8>,
    pub headers: Option<FieldTable>,
    pub settled: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeDelivery {
    pub fn new(routing_key: &str, data: Vec<u8>) -> Self {
        FakeDelivery {
            routing_key: routing_key.to_string(),
            data,
            headers: None,
            settled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Marks the message as having gone around `exchange` `count` times.
    pub fn retried(mut self, exchange: &str, count: i64) -> Self {
        let mut death = FieldTable::default();
        death.insert("exchange".into(), AMQPValue::LongString(exchange.into()));
        death.insert("count".into(), AMQPValue::LongLongInt(count));

        let mut headers = FieldTable::default();
        headers.insert(
            "x-death".into(),
            AMQPValue::FieldArray(vec![AMQPValue::FieldTable(death)].into()),
        );
        self.headers = Some(headers);
        self
    }

    pub fn settlements(&self) -> Arc<Mutex<Vec<&'static str>>> {
        self.settled.clone()
    }
}

#[async_trait]
impl InboundDelivery for FakeDelivery {
    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn headers(&self) -> Option<&FieldTable> {
        self.headers.as_ref()
    }

    async fn ack(&self) -> patient_matching::rabbitmq::Result<()> {
        self.settled.lock().unwrap().push("ack");
        Ok(())
    }

    async fn reject(&self) -> patient_matching::rabbitmq::Result<()> {
        self.settled.lock().unwrap().push("reject");
        Ok(())
    }
}
