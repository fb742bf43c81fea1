use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Delivers a message to one device token.
#[async_trait]
pub trait PushSender: Send + Sync + 'static {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<()>;
}

/// Legacy FCM HTTP endpoint (`Authorization: key=<server key>`).
pub struct FcmPushSender {
    client: Client,
    endpoint: String,
    server_key: String,
}

impl FcmPushSender {
    pub fn new(endpoint: impl Into<String>, server_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            server_key: server_key.into(),
        }
    }
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    to: &'a str,
    notification: FcmNotification<'a>,
    data: &'a Value,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[async_trait]
impl PushSender for FcmPushSender {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<()> {
        let request = FcmRequest {
            to: token,
            notification: FcmNotification {
                title: &message.title,
                body: &message.body,
            },
            data: &message.data,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&request)
            .send()
            .await
            .context("push request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("push provider returned {status}: {body}");
        }
        Ok(())
    }
}

/// Used when no FCM key is configured; the in-app notification row still exists.
pub struct DisabledPushSender;

#[async_trait]
impl PushSender for DisabledPushSender {
    async fn send(&self, _token: &str, message: &PushMessage) -> Result<()> {
        info!(title = %message.title, "push delivery disabled; skipping");
        Ok(())
    }
}

pub fn from_config(config: &AppConfig) -> Arc<dyn PushSender> {
    match &config.fcm_server_key {
        Some(key) => Arc::new(FcmPushSender::new(config.fcm_endpoint.clone(), key.clone())),
        None => Arc::new(DisabledPushSender),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fcm_payload_has_notification_and_data() {
        let data = json!({ "documentId": "abc" });
        let request = FcmRequest {
            to: "device-token",
            notification: FcmNotification {
                title: "New document",
                body: "Please sign",
            },
            data: &data,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["to"], "device-token");
        assert_eq!(value["notification"]["title"], "New document");
        assert_eq!(value["data"]["documentId"], "abc");
    }

    #[tokio::test]
    async fn disabled_sender_accepts_everything() {
        let message = PushMessage {
            title: "t".into(),
            body: "b".into(),
            data: Value::Null,
        };
        assert!(DisabledPushSender.send("token", &message).await.is_ok());
    }
}
