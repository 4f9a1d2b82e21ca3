use thiserror::Error;

use crate::notify::sender::SendError;
use crate::rabbitmq::{ErrorKind, PublishError};

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("publisher is not configured")]
    PublisherNotConfigured,

    #[error("no exchange configured for operation '{0}'")]
    TargetNotConfigured(&'static str),

    #[error("failed to publish: {0}")]
    Publish(#[source] PublishError),

    #[error("failed to hand notification to sender: {0}")]
    Send(#[from] SendError),

    #[error("symptom lookup failed: {0}")]
    Repository(#[source] anyhow::Error),
}

impl From<PublishError> for MatcherError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::NotConfigured => MatcherError::PublisherNotConfigured,
            other => MatcherError::Publish(other),
        }
    }
}

impl MatcherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatcherError::PublisherNotConfigured | MatcherError::TargetNotConfigured(_) => {
                ErrorKind::Configuration
            }
            MatcherError::Publish(e) => e.kind(),
            MatcherError::Send(e) => e.kind(),
            MatcherError::Repository(_) => ErrorKind::Transient,
        }
    }
}
