use super::{AssetSource, Delivery, Notifier};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Notifier that records everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Delivery>>,
    fail_text: AtomicBool,
    fail_assets: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_text(&self, fail: bool) {
        self.fail_text.store(fail, Ordering::SeqCst);
    }

    pub fn fail_assets(&self, fail: bool) {
        self.fail_assets.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Delivery> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn texts_to(&self, user_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Text { user_id: u, text } if u == user_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn assets_to(&self, user_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Asset {
                    user_id: u,
                    asset_ref,
                    ..
                } if u == user_id => Some(asset_ref),
                _ => None,
            })
            .collect()
    }

    fn record(&self, delivery: Delivery) {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(delivery);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, user_id: &str, text: &str) -> Result<()> {
        if self.fail_text.load(Ordering::SeqCst) {
            bail!("mock text delivery failure");
        }
        self.record(Delivery::Text {
            user_id: user_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_asset(&self, user_id: &str, asset_ref: &str, caption: &str) -> Result<()> {
        if self.fail_assets.load(Ordering::SeqCst) {
            bail!("mock asset delivery failure");
        }
        self.record(Delivery::Asset {
            user_id: user_id.to_string(),
            asset_ref: asset_ref.to_string(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}

/// Always hands out the same asset, or nothing.
pub struct FixedAsset(pub Option<String>);

impl FixedAsset {
    pub fn new(asset: Option<&str>) -> Arc<Self> {
        Arc::new(Self(asset.map(str::to_string)))
    }
}

#[async_trait]
impl AssetSource for FixedAsset {
    async fn pick(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order() {
        let n = RecordingNotifier::new();
        n.send_text("1", "hello").await.unwrap();
        n.send_asset("1", "photo-1", "cap").await.unwrap();
        n.send_text("2", "other").await.unwrap();

        assert_eq!(n.sent().len(), 3);
        assert_eq!(n.texts_to("1"), vec!["hello".to_string()]);
        assert_eq!(n.assets_to("1"), vec!["photo-1".to_string()]);
        assert!(n.assets_to("2").is_empty());
    }

    #[tokio::test]
    async fn injected_failures_record_nothing() {
        let n = RecordingNotifier::new();
        n.fail_assets(true);
        assert!(n.send_asset("1", "p", "c").await.is_err());
        n.send_text("1", "still works").await.unwrap();
        assert_eq!(n.sent().len(), 1);
    }
}
