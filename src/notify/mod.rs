// Outcome notification dispatch
//
// Settlement correctness never depends on anything in this module: every
// delivery is fire-and-forget, failures are logged and dropped.

pub mod events;

use async_trait::async_trait;
use tracing::info;

use crate::error::{AppError, AppResult};
pub use events::{
    LossNotice, OutcomeNotice, RefundNotice, SettlementCompleteNotice, WinNotice,
};

/// Delivery seam for outcome notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notice: OutcomeNotice) -> AppResult<()>;
}

/// POSTs each notice as JSON to a configured endpoint
pub struct WebhookSink {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notice: OutcomeNotice) -> AppResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&notice)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalError(format!(
                "Notification endpoint returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Used when no webhook endpoint is configured; notices are acknowledged
/// and dropped.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn deliver(&self, notice: OutcomeNotice) -> AppResult<()> {
        info!(
            "📭 notification dropped (no sink configured): {} for player {}",
            notice.kind(),
            notice.player_id()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_sink_creation() {
        let sink = WebhookSink::new("http://localhost:9999/notify".to_string());
        assert_eq!(sink.endpoint, "http://localhost:9999/notify");
    }
}
