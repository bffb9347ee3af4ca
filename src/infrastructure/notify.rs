//! Outbound notification sink.
//!
//! On every terminal transaction transition the notifier posts a JSON
//! payload to an externally defined webhook. Delivery is at-least-once
//! attempted and best-effort: a failed post is logged and never alters
//! transaction state.
//!
//! Set `ARMADA_NOTIFY_URL` to enable; when unset all operations are
//! no-ops.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::domain::{DeploymentTransaction, RollbackTransaction};

/// Payload posted on terminal transitions
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub id: String,
    pub package: String,
    pub version: String,
    pub status: String,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_id: Option<String>,
}

impl NotificationPayload {
    pub fn for_deployment(tx: &DeploymentTransaction) -> Self {
        Self {
            id: tx.id.clone(),
            package: tx.package.clone(),
            version: tx.version.clone(),
            status: tx.status.to_string(),
            targets: tx.targets.clone(),
            started_at: tx.started_at,
            completed_at: tx.completed_at,
            rollback_id: tx.rollback_transaction_id.clone(),
        }
    }

    pub fn for_rollback(tx: &RollbackTransaction) -> Self {
        Self {
            id: tx.id.clone(),
            package: tx.package.clone(),
            version: tx.version.clone(),
            status: tx.status.to_string(),
            targets: tx.targets.clone(),
            started_at: tx.started_at,
            completed_at: tx.completed_at,
            rollback_id: None,
        }
    }
}

/// Notifier that wraps the webhook with optional behavior
///
/// If the webhook URL is not configured, all operations are no-ops.
pub struct Notifier {
    client: Option<Client>,
    url: Option<String>,
}

impl Notifier {
    /// Create a new notifier from environment
    pub fn from_env() -> Self {
        let url = std::env::var("ARMADA_NOTIFY_URL")
            .ok()
            .filter(|u| !u.is_empty());

        let client = url.as_ref().and_then(|_| {
            Client::builder()
                .timeout(Duration::from_secs(10))
                .connect_timeout(Duration::from_secs(5))
                .build()
                .ok()
        });

        Self { client, url }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Post a terminal-transition payload (best effort, logs errors)
    pub async fn notify(&self, payload: NotificationPayload) {
        let (Some(client), Some(url)) = (&self.client, &self.url) else {
            return;
        };

        match client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(id = %payload.id, status = %payload.status, "Notification delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    id = %payload.id,
                    status = %response.status(),
                    "Notification sink rejected payload"
                );
            }
            Err(e) => {
                tracing::warn!(id = %payload.id, error = %e, "Failed to deliver notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PipelineKind;

    #[test]
    fn test_notifier_disabled_without_url() {
        std::env::remove_var("ARMADA_NOTIFY_URL");
        let notifier = Notifier::from_env();
        assert!(!notifier.is_enabled());
    }

    #[test]
    fn test_payload_carries_rollback_link() {
        let mut tx = DeploymentTransaction::new(
            "mypkg",
            "1.0.0",
            PipelineKind::Standard,
            vec!["npm".to_string()],
        );
        tx.rollback_transaction_id = Some("rb-x".to_string());

        let payload = NotificationPayload::for_deployment(&tx);
        assert_eq!(payload.rollback_id.as_deref(), Some("rb-x"));
        assert_eq!(payload.status, "in_progress");
    }
}
