// src/rabbitmq/mod.rs
// Broker plumbing: topology, publishing, and the consume/acknowledge loop.

pub mod connection;
pub mod delivery;
pub mod errors;
pub mod handler;
pub mod publisher;
pub mod topology;
pub mod worker;

// Re-export specific items to simplify imports elsewhere
pub use connection::ConnectionManager;
pub use delivery::{AmqpDelivery, InboundDelivery};
pub use errors::{classified, is_permanent, permanent, ErrorKind, PermanentFailure, RabbitMQError, Result};
pub use handler::{task, HandlerFactory, MessageHandler, Outcome, Task};
pub use publisher::{AmqpTransport, Outgoing, PublishError, PublishScope, Publisher, Transport};
pub use topology::{Stage, Topology};
pub use worker::Worker;
