use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Something sent to a user, as recorded by [`mock::RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Text {
        user_id: String,
        text: String,
    },
    Asset {
        user_id: String,
        asset_ref: String,
        caption: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, user_id: &str, text: &str) -> Result<()>;
    async fn send_asset(&self, user_id: &str, asset_ref: &str, caption: &str) -> Result<()>;
}

/// Chooses the reward handed out for a confirmed payment.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// `Ok(None)` when nothing is available to hand out.
    async fn pick(&self) -> Result<Option<String>>;
}

pub mod catalog;
pub mod logging;
pub mod mock;
pub mod telegram;
