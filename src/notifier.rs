// 📣 Notification Dispatcher - Fire-and-forget push to a household topic

use crate::config::http_client;
use crate::expiry::NotificationEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

pub const EXPIRY_WARNING_TYPE: &str = "expiry_warning";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// Message addressed to every device subscribed to a household's topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub notification: PushNotification,
    pub data: HashMap<String, String>,
    pub topic: String,
}

pub fn household_topic(household_id: &str) -> String {
    format!("household_{}", household_id)
}

impl From<&NotificationEvent> for PushMessage {
    fn from(event: &NotificationEvent) -> Self {
        let mut data = HashMap::new();
        data.insert("type".to_string(), EXPIRY_WARNING_TYPE.to_string());
        data.insert("productId".to_string(), event.item_id.clone());
        data.insert("householdId".to_string(), event.household_id.clone());

        PushMessage {
            notification: PushNotification {
                title: event.title.clone(),
                body: event.body.clone(),
            },
            data,
            topic: household_topic(&event.household_id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Push request failed: {0}")]
    Request(String),

    #[error("Push service rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), DispatchError>;
}

/// Development dispatcher: writes the message to the log
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, message: &PushMessage) -> Result<(), DispatchError> {
        info!(
            topic = %message.topic,
            title = %message.notification.title,
            body = %message.notification.body,
            "push notification (log only)"
        );
        Ok(())
    }
}

/// POSTs `{"message": ...}` to a push gateway with a bearer token
pub struct HttpPushDispatcher {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpPushDispatcher {
    pub fn new(endpoint: String, token: Option<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = http_client(timeout).map_err(|e| DispatchError::Request(e.to_string()))?;
        Ok(Self { endpoint, token, client })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpPushDispatcher {
    async fn send(&self, message: &PushMessage) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "message": message }));

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(DispatchError::Rejected { status, body })
        }
    }
}
