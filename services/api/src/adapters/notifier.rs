//! services/api/src/adapters/notifier.rs
//!
//! A `NotificationService` that records outbound messages in the log instead
//! of delivering them. Deployments that need real mail plug in another
//! implementation of the port.

use async_trait::async_trait;
use chat_core::ports::{NotificationOutcome, NotificationService};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationService for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> NotificationOutcome {
        // The body may hold a secret, so only its size is logged.
        info!(to = %to, subject = %subject, body_len = body.len(), "Notification queued to log.");
        NotificationOutcome {
            delivered: false,
            detail: "mail delivery is not configured; message was logged".to_string(),
        }
    }
}
