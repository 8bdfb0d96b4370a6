//! Fire-and-forget routing notifications.
//!
//! The pipeline publishes and forgets; consumers must tolerate
//! duplicates because a retried router run republishes. Delivery is an
//! in-process broadcast channel; dropping the message when nobody
//! listens is acceptable by contract.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::storage::documents::Category;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub document_id: String,
    pub category: Category,
    pub organized_key: String,
    pub audience: String,
    pub timestamp: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification);
}

pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, notification: Notification) {
        tracing::info!(
            document_id = %notification.document_id,
            category = notification.category.as_str(),
            audience = %notification.audience,
            organized_key = %notification.organized_key,
            "document routed"
        );
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_notifications() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.publish(Notification {
            document_id: "d1".to_string(),
            category: Category::Invoice,
            organized_key: "invoice/d1-a.pdf".to_string(),
            audience: "accounting".to_string(),
            timestamp: Utc::now(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.document_id, "d1");
        assert_eq!(received.audience, "accounting");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(8);
        notifier.publish(Notification {
            document_id: "d1".to_string(),
            category: Category::Other,
            organized_key: "other/d1-a.txt".to_string(),
            audience: "general".to_string(),
            timestamp: Utc::now(),
        });
    }
}
