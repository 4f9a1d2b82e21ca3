// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// How a failure should be treated by whoever receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wiring is wrong. Retrying cannot help; the process must be reconfigured.
    Configuration,
    /// The operation may succeed if attempted again later.
    Transient,
    /// The input itself is unusable.
    Permanent,
}

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ topology error: {0}")]
    TopologyError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("RabbitMQ acknowledge error: {0}")]
    AckError(String),

    #[error("Connection timeout: {0}")]
    TimeoutError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A task failure that no amount of retrying will fix, such as a payload that
/// does not parse. Retrying handlers dead-letter it on the first attempt.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct PermanentFailure(#[from] anyhow::Error);

pub fn permanent(error: impl Into<anyhow::Error>) -> anyhow::Error {
    PermanentFailure(error.into()).into()
}

/// Marks `error` permanent when its kind says so.
pub fn classified(kind: ErrorKind, error: impl Into<anyhow::Error>) -> anyhow::Error {
    match kind {
        ErrorKind::Permanent => permanent(error),
        _ => error.into(),
    }
}

pub fn is_permanent(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<PermanentFailure>())
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl RabbitMQError {
    /// Broker failures say nothing about the message, so they are all worth
    /// another attempt.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

// Converting from lapin errors
impl From<LapinError> for RabbitMQError {
    fn from(error: LapinError) -> Self {
        match error {
            LapinError::InvalidChannel(_) | LapinError::InvalidChannelState(_) => {
                RabbitMQError::ChannelError(error.to_string())
            }
            LapinError::InvalidConnectionState(_) | LapinError::IOError(_) => {
                RabbitMQError::ConnectionError(error.to_string())
            }
            other => RabbitMQError::Unknown(other.to_string()),
        }
    }
}

impl From<Elapsed> for RabbitMQError {
    fn from(_: Elapsed) -> Self {
        RabbitMQError::TimeoutError("Connection timed out".to_string())
    }
}
