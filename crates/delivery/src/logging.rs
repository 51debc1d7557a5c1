use super::Notifier;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Writes deliveries to the log instead of sending them. Used when no bot
/// token is configured.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_text(&self, user_id: &str, text: &str) -> Result<()> {
        info!(user_id = %user_id, text = %text, "Text delivery (log only)");
        Ok(())
    }

    async fn send_asset(&self, user_id: &str, asset_ref: &str, caption: &str) -> Result<()> {
        info!(user_id = %user_id, asset = %asset_ref, caption = %caption, "Asset delivery (log only)");
        Ok(())
    }
}
