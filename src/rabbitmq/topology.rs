//! Exchanges, queues and bindings of the matching pipeline.
//!
//! Every stage queue dead-letters rejected messages into the retry exchange.
//! The retry exchange feeds a per-stage delay queue whose TTL expiry
//! dead-letters the message back through the stage exchange, so it lands in
//! the origin queue again with its routing key unchanged. Messages that run
//! out of attempts are copied to the dead-letter exchange by the handler.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use std::time::Duration;
use tracing::{debug, info};

use super::errors::{RabbitMQError, Result};

pub const DEAD_LETTER_BINDING: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Topic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueArg {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Exchange {
        name: String,
        kind: ExchangeType,
    },
    Queue {
        name: String,
        arguments: Vec<(String, QueueArg)>,
    },
    Binding {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

/// One hop of the pipeline: an exchange feeding a single queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Stage {
    pub fn new(exchange: &str, queue: &str, routing_key: &str) -> Self {
        Stage {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        }
    }

    pub fn delay_queue(&self) -> String {
        format!("{}.retry", self.queue)
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub stages: Vec<Stage>,
    pub retry_exchange: String,
    pub retry_delay: Duration,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
}

impl Topology {
    /// Declarations in dependency order: exchanges, then queues, then bindings.
    pub fn plan(&self) -> Vec<Declaration> {
        let mut exchanges = vec![
            Declaration::Exchange {
                name: self.retry_exchange.clone(),
                kind: ExchangeType::Direct,
            },
            Declaration::Exchange {
                name: self.dead_letter_exchange.clone(),
                kind: ExchangeType::Topic,
            },
        ];
        let mut queues = vec![Declaration::Queue {
            name: self.dead_letter_queue.clone(),
            arguments: Vec::new(),
        }];
        let mut bindings = vec![Declaration::Binding {
            queue: self.dead_letter_queue.clone(),
            exchange: self.dead_letter_exchange.clone(),
            routing_key: DEAD_LETTER_BINDING.to_string(),
        }];

        let ttl_ms = i64::try_from(self.retry_delay.as_millis()).unwrap_or(i64::MAX);

        for stage in &self.stages {
            exchanges.push(Declaration::Exchange {
                name: stage.exchange.clone(),
                kind: ExchangeType::Direct,
            });

            queues.push(Declaration::Queue {
                name: stage.queue.clone(),
                arguments: vec![(
                    "x-dead-letter-exchange".to_string(),
                    QueueArg::Str(self.retry_exchange.clone()),
                )],
            });
            queues.push(Declaration::Queue {
                name: stage.delay_queue(),
                arguments: vec![
                    ("x-message-ttl".to_string(), QueueArg::Int(ttl_ms)),
                    (
                        "x-dead-letter-exchange".to_string(),
                        QueueArg::Str(stage.exchange.clone()),
                    ),
                ],
            });

            bindings.push(Declaration::Binding {
                queue: stage.queue.clone(),
                exchange: stage.exchange.clone(),
                routing_key: stage.routing_key.clone(),
            });
            bindings.push(Declaration::Binding {
                queue: stage.delay_queue(),
                exchange: self.retry_exchange.clone(),
                routing_key: stage.routing_key.clone(),
            });
        }

        exchanges.extend(queues);
        exchanges.extend(bindings);
        exchanges
    }

    /// Declares everything on `channel`. Declaring an identical topology again
    /// is accepted by the broker as a no-op.
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        let plan = self.plan();
        for declaration in &plan {
            debug!(?declaration, "Declaring");
            apply(channel, declaration).await.map_err(|e| {
                RabbitMQError::TopologyError(format!("{:?}: {}", declaration, e))
            })?;
        }

        info!(
            declarations = plan.len(),
            retry_exchange = %self.retry_exchange,
            dead_letter_exchange = %self.dead_letter_exchange,
            "Broker topology declared"
        );
        Ok(())
    }
}

async fn apply(channel: &Channel, declaration: &Declaration) -> std::result::Result<(), lapin::Error> {
    match declaration {
        Declaration::Exchange { name, kind } => {
            let kind = match kind {
                ExchangeType::Direct => ExchangeKind::Direct,
                ExchangeType::Topic => ExchangeKind::Topic,
            };
            channel
                .exchange_declare(
                    name,
                    kind,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
        }
        Declaration::Queue { name, arguments } => channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                field_table(arguments),
            )
            .await
            .map(|_| ()),
        Declaration::Binding {
            queue,
            exchange,
            routing_key,
        } => {
            channel
                .queue_bind(
                    queue,
                    exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
        }
    }
}

fn field_table(arguments: &[(String, QueueArg)]) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        let value = match value {
            QueueArg::Str(s) => AMQPValue::LongString(s.as_str().into()),
            QueueArg::Int(i) => AMQPValue::LongLongInt(*i),
        };
        table.insert(key.as_str().into(), value);
    }
    table
}
