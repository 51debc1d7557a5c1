//! Exactly-once reward delivery for confirmed intents.
//!
//! The `fulfilled` flag is claimed with a revision-checked write before
//! anything is sent. Whoever wins the claim delivers; everyone else sees
//! [`FulfillmentOutcome::AlreadyFulfilled`]. A crash after the claim skips the
//! delivery instead of repeating it.

use crate::audit::{AuditEvent, AuditLog};
use crate::error::{Error, Result};
use crate::store::PaymentStore;
use anyhow::anyhow;
use chrono::Utc;
use delivery::{AssetSource, Notifier};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tronpay_core::{IntentStatus, PaymentIntent, Token};

pub const NO_ASSET_TEXT: &str = "Sorry, no rewards available right now. Your payment is recorded and will be followed up.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Delivered { asset_ref: String },
    AlreadyFulfilled,
}

pub struct FulfillmentDispatcher {
    store: Arc<dyn PaymentStore>,
    notifier: Arc<dyn Notifier>,
    assets: Arc<dyn AssetSource>,
    token: Token,
    caption: String,
    audit: Arc<AuditLog>,
}

impl FulfillmentDispatcher {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        notifier: Arc<dyn Notifier>,
        assets: Arc<dyn AssetSource>,
        token: Token,
        caption: impl Into<String>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            notifier,
            assets,
            token,
            caption: caption.into(),
            audit,
        }
    }

    pub async fn fulfill(&self, intent: &PaymentIntent) -> Result<FulfillmentOutcome> {
        let current = self
            .store
            .get(&intent.id)?
            .ok_or(Error::IntentNotFound(intent.id))?;
        if current.fulfilled {
            debug!(intent_id = %current.id, "Already fulfilled, skipping");
            return Ok(FulfillmentOutcome::AlreadyFulfilled);
        }
        if current.status != IntentStatus::Confirmed {
            return Err(Error::InvalidRequest(format!(
                "intent {} is {}, only confirmed intents are fulfilled",
                current.id, current.status
            )));
        }

        let claimed = match self.claim(&current) {
            Ok(c) => c,
            Err(e @ Error::StaleRevision { .. }) => {
                // Lost the race; re-read to see who won.
                return match self.store.get(&intent.id)? {
                    Some(latest) if latest.fulfilled => Ok(FulfillmentOutcome::AlreadyFulfilled),
                    _ => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        match self.deliver(&claimed).await {
            Ok(asset_ref) => {
                info!(intent_id = %claimed.id, user_id = %claimed.user_id, asset = %asset_ref, "Reward delivered");
                self.audit
                    .record(&AuditEvent::new("fulfillment_delivered", &claimed));
                Ok(FulfillmentOutcome::Delivered { asset_ref })
            }
            Err(e) => {
                let reason = format!("{e:#}");
                self.flag_for_follow_up(&claimed, &reason);
                Err(Error::Delivery {
                    id: claimed.id,
                    reason,
                })
            }
        }
    }

    fn claim(&self, intent: &PaymentIntent) -> Result<PaymentIntent> {
        let mut next = intent.clone();
        next.fulfilled = true;
        next.updated_at = Utc::now();
        let stored = self.store.update(&next)?;
        self.audit
            .record(&AuditEvent::new("fulfillment_claimed", &stored));
        Ok(stored)
    }

    async fn deliver(&self, intent: &PaymentIntent) -> anyhow::Result<String> {
        self.notifier
            .send_text(&intent.user_id, &self.confirmation_text(intent))
            .await?;

        let Some(asset_ref) = self.assets.pick().await? else {
            if let Err(e) = self.notifier.send_text(&intent.user_id, NO_ASSET_TEXT).await {
                warn!(intent_id = %intent.id, error = %e, "Failed to send apology");
            }
            return Err(anyhow!("no reward asset available"));
        };

        self.notifier
            .send_asset(&intent.user_id, &asset_ref, &self.caption)
            .await?;
        Ok(asset_ref)
    }

    fn confirmation_text(&self, intent: &PaymentIntent) -> String {
        let amount = if intent.received_amount > 0 {
            intent.received_amount
        } else {
            intent.expected_amount
        };
        format!(
            "✅ Payment confirmed!\nAmount: {}\nTxID: {}",
            self.token.display(amount),
            intent.tx_id.as_deref().unwrap_or("unknown")
        )
    }

    /// `fulfilled` stays true; the record is only marked for a human.
    fn flag_for_follow_up(&self, intent: &PaymentIntent, reason: &str) {
        error!(intent_id = %intent.id, user_id = %intent.user_id, error = %reason, "Reward delivery failed, manual follow-up required");

        let mut next = intent.clone();
        next.needs_attention = true;
        next.last_error = Some(reason.to_string());
        next.updated_at = Utc::now();
        let flagged = match self.store.update(&next) {
            Ok(stored) => stored,
            Err(e) => {
                error!(intent_id = %intent.id, error = %e, "Failed to flag intent for follow-up");
                next
            }
        };
        self.audit.record(
            &AuditEvent::new("fulfillment_failed", &flagged).with_error(reason.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledPaymentStore;
    use delivery::mock::{FixedAsset, RecordingNotifier};
    use delivery::Delivery;

    const ADDR: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn confirmed(store: &SledPaymentStore) -> PaymentIntent {
        let intent = PaymentIntent::new(
            "42",
            ADDR,
            10_000_000,
            10.0,
            0,
            Utc::now(),
            chrono::Duration::hours(24),
        );
        let mut intent = store.create(&intent).unwrap();
        intent.status = IntentStatus::Confirmed;
        intent.received_amount = 10_000_000;
        intent.tx_id = Some("abc123".into());
        store.update(&intent).unwrap()
    }

    fn dispatcher(
        store: Arc<SledPaymentStore>,
        notifier: Arc<RecordingNotifier>,
        asset: Option<&str>,
    ) -> FulfillmentDispatcher {
        FulfillmentDispatcher::new(
            store,
            notifier,
            FixedAsset::new(asset),
            Token::Trx,
            "Your reward for the payment!",
            Arc::new(AuditLog::disabled()),
        )
    }

    #[tokio::test]
    async fn delivers_text_then_asset() {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let notifier = RecordingNotifier::new();
        let d = dispatcher(store.clone(), notifier.clone(), Some("photo-7"));
        let intent = confirmed(&store);

        let outcome = d.fulfill(&intent).await.unwrap();
        assert_eq!(
            outcome,
            FulfillmentOutcome::Delivered {
                asset_ref: "photo-7".into()
            }
        );
        assert_eq!(
            notifier.sent(),
            vec![
                Delivery::Text {
                    user_id: "42".into(),
                    text: "✅ Payment confirmed!\nAmount: 10.00 TRX\nTxID: abc123".into(),
                },
                Delivery::Asset {
                    user_id: "42".into(),
                    asset_ref: "photo-7".into(),
                    caption: "Your reward for the payment!".into(),
                },
            ]
        );
        assert!(store.get(&intent.id).unwrap().unwrap().fulfilled);
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let notifier = RecordingNotifier::new();
        let d = dispatcher(store.clone(), notifier.clone(), Some("photo-7"));
        let intent = confirmed(&store);

        d.fulfill(&intent).await.unwrap();
        let again = d.fulfill(&intent).await.unwrap();
        assert_eq!(again, FulfillmentOutcome::AlreadyFulfilled);
        assert_eq!(notifier.assets_to("42").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_deliver_once() {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let notifier = RecordingNotifier::new();
        let d = Arc::new(dispatcher(store.clone(), notifier.clone(), Some("p")));
        let intent = confirmed(&store);

        let (a, b) = tokio::join!(d.fulfill(&intent), d.fulfill(&intent));
        let delivered = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| matches!(o, FulfillmentOutcome::Delivered { .. }))
            .count();
        assert_eq!(delivered, 1);
        assert_eq!(notifier.assets_to("42").len(), 1);
    }

    #[tokio::test]
    async fn pending_intent_is_refused() {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let notifier = RecordingNotifier::new();
        let d = dispatcher(store.clone(), notifier.clone(), Some("p"));
        let intent = PaymentIntent::new("1", ADDR, 5, 1.0, 0, Utc::now(), chrono::Duration::hours(1));
        let intent = store.create(&intent).unwrap();

        assert!(matches!(
            d.fulfill(&intent).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(notifier.sent().is_empty());
        assert!(!store.get(&intent.id).unwrap().unwrap().fulfilled);
    }

    #[tokio::test]
    async fn failed_delivery_is_flagged_not_retried() {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let notifier = RecordingNotifier::new();
        notifier.fail_assets(true);
        let d = dispatcher(store.clone(), notifier.clone(), Some("p"));
        let intent = confirmed(&store);

        let err = d.fulfill(&intent).await.unwrap_err();
        assert!(matches!(err, Error::Delivery { id, .. } if id == intent.id));

        let stored = store.get(&intent.id).unwrap().unwrap();
        assert!(stored.fulfilled);
        assert!(stored.needs_attention);
        assert!(stored.last_error.unwrap().contains("asset delivery"));

        notifier.fail_assets(false);
        let again = d.fulfill(&intent).await.unwrap();
        assert_eq!(again, FulfillmentOutcome::AlreadyFulfilled);
        assert!(notifier.assets_to("42").is_empty());
    }

    #[tokio::test]
    async fn missing_asset_sends_apology_and_flags() {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let notifier = RecordingNotifier::new();
        let d = dispatcher(store.clone(), notifier.clone(), None);
        let intent = confirmed(&store);

        assert!(d.fulfill(&intent).await.is_err());
        let texts = notifier.texts_to("42");
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1], NO_ASSET_TEXT);
        assert!(store.get(&intent.id).unwrap().unwrap().needs_attention);
    }
}
