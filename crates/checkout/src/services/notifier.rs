//! User-facing notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ClientId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Severity shown next to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A non-blocking message for the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub client_id: ClientId,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    pub fn new(
        client_id: ClientId,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            level,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Trait for delivering notifications. Delivery is best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Notifier that keeps every notification in memory, newest last.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the notifications sent to a client.
    pub async fn for_client(&self, client_id: &ClientId) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| &n.client_id == client_id)
            .cloned()
            .collect()
    }

    /// Returns the total number of notifications sent.
    pub async fn count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::debug!(
            client_id = %notification.client_id,
            level = ?notification.level,
            title = %notification.title,
            "notification sent"
        );
        self.sent.write().await.push(notification);
    }
}
