//! Best-effort restart notifications for the trading engine.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;

pub const RESTART_MESSAGE: &str = "MT5 container restarted";

#[async_trait]
pub trait RestartNotifier: Send + Sync {
    /// Never fails from the caller's point of view. Delivery problems are
    /// logged and dropped.
    async fn notify(&self, timestamp: DateTime<Local>, message: &str);
}

#[derive(Debug, Serialize)]
struct RestartNotification<'a> {
    timestamp: String,
    message: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response status {0}")]
    Status(reqwest::StatusCode),
}

pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn send(&self, timestamp: DateTime<Local>, message: &str) -> Result<(), NotifyError> {
        let body = RestartNotification {
            timestamp: timestamp.to_rfc3339(),
            message,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        match response.status() {
            reqwest::StatusCode::OK => Ok(()),
            status => Err(NotifyError::Status(status)),
        }
    }
}

#[async_trait]
impl RestartNotifier for HttpNotifier {
    async fn notify(&self, timestamp: DateTime<Local>, message: &str) {
        match self.send(timestamp, message).await {
            Ok(()) => log::info!("Successfully notified trading engine about MT5 restart"),
            Err(e) => log::warn!(
                "Could not notify trading engine at {} about restart: {}",
                self.endpoint,
                e
            ),
        }
    }
}
