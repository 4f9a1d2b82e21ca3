use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info};

use super::errors::{RabbitMQError, Result};

const MAX_BACKOFF_MS: u64 = 30_000;

/// Opens the AMQP connection a process shares between its publisher and workers.
pub struct ConnectionManager {
    uri: String,
    connect_timeout: Duration,
    max_reconnect_attempts: u32,
    reconnect_delay_ms: u64,
}

impl ConnectionManager {
    pub fn new(uri: &str) -> Self {
        ConnectionManager {
            uri: uri.to_string(),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
        }
    }

    pub fn with_reconnect_policy(mut self, max_attempts: u32, initial_delay_ms: u64) -> Self {
        self.max_reconnect_attempts = max_attempts.max(1);
        self.reconnect_delay_ms = initial_delay_ms;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub async fn connect(&self) -> Result<Arc<Connection>> {
        let mut attempts = 0;
        let mut delay = self.reconnect_delay_ms;

        loop {
            info!(uri = %redact(&self.uri), "Attempting to connect to RabbitMQ");

            let attempt = timeout(
                self.connect_timeout,
                Connection::connect(&self.uri, ConnectionProperties::default()),
            )
            .await;

            let err = match attempt {
                Ok(Ok(conn)) => {
                    info!("Successfully connected to RabbitMQ");
                    return Ok(Arc::new(conn));
                }
                Ok(Err(err)) => RabbitMQError::from(err),
                Err(elapsed) => RabbitMQError::from(elapsed),
            };

            attempts += 1;
            error!(
                "Failed to connect to RabbitMQ (attempt {}/{}): {}",
                attempts, self.max_reconnect_attempts, err
            );

            if attempts >= self.max_reconnect_attempts {
                error!("Max reconnection attempts reached. Giving up.");
                return Err(err);
            }

            let sleep_time = with_jitter(delay, rand::random::<f64>());
            info!("Waiting {}ms before next reconnect attempt", sleep_time);
            sleep(Duration::from_millis(sleep_time)).await;

            delay = next_delay(delay);
        }
    }
}

fn next_delay(delay: u64) -> u64 {
    std::cmp::min(delay.saturating_mul(2), MAX_BACKOFF_MS)
}

/// Spreads `delay` by ±15% using a sample in `[0, 1)`.
fn with_jitter(delay: u64, sample: f64) -> u64 {
    let jitter = (sample * 0.3 - 0.15) * delay as f64;
    (delay as f64 + jitter).max(0.0) as u64
}

// Keeps credentials out of the logs.
fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***{}", &uri[..scheme], &uri[at..])
        }
        _ => uri.to_string(),
    }
}
