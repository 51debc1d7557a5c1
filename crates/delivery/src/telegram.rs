use super::Notifier;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPhotoRequest<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Sends texts and photos through the Telegram Bot API.
///
/// `user_id` is the Telegram chat id; asset references are photo file ids or
/// URLs, both of which `sendPhoto` accepts.
#[derive(Clone)]
pub struct TelegramNotifier {
    api_url: String,
    bot_token: String,
    http_client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String) -> Result<Arc<Self>> {
        Self::with_api_url(DEFAULT_API_URL.to_string(), bot_token)
    }

    pub fn with_api_url(api_url: String, bot_token: String) -> Result<Arc<Self>> {
        if bot_token.trim().is_empty() {
            bail!("Telegram bot token is empty");
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Arc::new(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
            http_client,
        }))
    }

    /// Contains the bot token; errors must not carry it.
    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<()> {
        let resp = self
            .http_client
            .post(self.endpoint(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("Failed to call Telegram {method}"))?;

        let status = resp.status();
        let parsed: BotApiResponse = resp
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;

        if !status.is_success() || !parsed.ok {
            bail!(
                "Telegram {} failed: {} - {}",
                method,
                status,
                parsed.description.unwrap_or_default()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, user_id: &str, text: &str) -> Result<()> {
        tracing::debug!(user_id = %user_id, "Sending Telegram message");
        self.call(
            "sendMessage",
            &SendMessageRequest {
                chat_id: user_id,
                text,
            },
        )
        .await
    }

    async fn send_asset(&self, user_id: &str, asset_ref: &str, caption: &str) -> Result<()> {
        tracing::debug!(user_id = %user_id, asset = %asset_ref, "Sending Telegram photo");
        self.call(
            "sendPhoto",
            &SendPhotoRequest {
                chat_id: user_id,
                photo: asset_ref,
                caption,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_bot_endpoints() {
        let n = TelegramNotifier::with_api_url("http://localhost:8081/".into(), "123:abc".into())
            .unwrap();
        assert_eq!(n.endpoint("sendMessage"), "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn rejects_empty_token() {
        assert!(TelegramNotifier::new("  ".into()).is_err());
    }

    #[tokio::test]
    async fn failed_call_does_not_leak_token() {
        // Nothing listens on the discard port.
        let n = TelegramNotifier::with_api_url(
            "http://127.0.0.1:9".into(),
            "123456:SECRET-TOKEN".into(),
        )
        .unwrap();
        let err = n.send_text("42", "hello").await.unwrap_err();
        let shown = format!("{err:#}");
        assert!(shown.contains("sendMessage"), "{shown}");
        assert!(!shown.contains("SECRET-TOKEN"), "{shown}");
        assert!(!format!("{err:?}").contains("SECRET-TOKEN"));
    }

    #[test]
    fn photo_request_shape() {
        let body = serde_json::to_value(SendPhotoRequest {
            chat_id: "42",
            photo: "AgACAgIAAxk",
            caption: "Your reward",
        })
        .unwrap();
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["photo"], "AgACAgIAAxk");
        assert_eq!(body["caption"], "Your reward");
    }
}
