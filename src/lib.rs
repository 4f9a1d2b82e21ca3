//! Asynchronous patient matching over RabbitMQ.
//!
//! A search travels through four processes:
//!
//! 1. `search_api` accepts the request and publishes it to the request exchange.
//! 2. `matching_worker` consumes it, runs the match and publishes the result.
//! 3. `delivery_consumer` turns the result into a notification and posts it to
//!    the notification worker.
//! 4. `notification_worker` fans the notification out to the client's sockets.
//!
//! Failed messages are retried through a delay queue and moved to a
//! dead-letter exchange once they run out of attempts.

pub mod api;
pub mod env;
pub mod matching;
pub mod message;
pub mod notify;
pub mod rabbitmq;
pub mod runtime;
pub mod telemetry;

pub use env::Config;
pub use message::{Message, SearchRequest, SearchResult};
