use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::message::Message;
use crate::rabbitmq::ErrorKind;

pub const NOTIFY_PATH: &str = "/api/v1/notify";

#[derive(Error, Debug)]
pub enum SendError {
    #[error("notification worker unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification worker answered {0}")]
    Status(StatusCode),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::Status(status) if status.is_client_error() => ErrorKind::Permanent,
            _ => ErrorKind::Transient,
        }
    }
}

/// Delivers a message to whichever process holds the client's sockets.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), SendError>;
}

/// Posts messages to the notification worker's bridge endpoint.
pub struct HttpMessageSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMessageSender {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpMessageSender {
            client,
            endpoint: endpoint(base_url),
        })
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let response = self.client.post(&self.endpoint).json(message).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Status(status));
        }

        debug!(target_client = %message.target, "Notification handed to worker");
        Ok(())
    }
}

fn endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), NOTIFY_PATH)
}
