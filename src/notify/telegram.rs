// src/notify/telegram.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::DeliveryGateway;
use crate::error::DeliveryError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API client: outbound delivery plus the few calls the command loop needs.
#[derive(Clone)]
pub struct TelegramGateway {
    api_base: String,
    token: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Persistent reply keyboard shown under the input box.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<String>>,
    pub resize_keyboard: bool,
    pub one_time_keyboard: bool,
}

/// Delay before retry number `attempt` (1-based): 500ms doubling, capped at 32s.
fn backoff(attempt: u8) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    Duration::from_millis(500u64 << exp)
}

impl TelegramGateway {
    pub fn new(token: String) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST `method` with `body`, retrying transport errors, 429 and 5xx with
    /// exponential backoff. Other 4xx fail immediately.
    async fn call<B, T>(&self, method: &str, body: &B, timeout: Duration) -> Result<T, DeliveryError>
    where
        B: Serialize + ?Sized + Sync,
        T: serde::de::DeserializeOwned,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(self.url(method))
                .timeout(timeout)
                .json(body)
                .send()
                .await;

            let retryable = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    match rsp.json::<ApiResponse<T>>().await {
                        Ok(ApiResponse {
                            ok: true,
                            result: Some(r),
                            ..
                        }) if status.is_success() => return Ok(r),
                        Ok(api) => {
                            let err = DeliveryError::Rejected {
                                status: status.as_u16(),
                                description: api
                                    .description
                                    .unwrap_or_else(|| "no description".to_string()),
                            };
                            if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                                return Err(err);
                            }
                            err
                        }
                        Err(e) if status.is_success() => return Err(DeliveryError::Http(e)),
                        Err(e) => {
                            if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                                return Err(DeliveryError::Rejected {
                                    status: status.as_u16(),
                                    description: e.to_string(),
                                });
                            }
                            DeliveryError::Http(e)
                        }
                    }
                }
                Err(e) => DeliveryError::Http(e),
            };

            if attempt >= self.max_retries {
                return Err(retryable);
            }
            tracing::debug!(target: "notify", method, attempt, error = %retryable, "telegram call failed, backing off");
            tokio::time::sleep(backoff(attempt)).await;
        }
    }

    /// Plain reply, optionally attaching a keyboard. Used by the command loop.
    pub async fn reply(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<(), DeliveryError> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb).unwrap_or_default();
        }
        self.call::<_, serde_json::Value>("sendMessage", &body, self.timeout)
            .await
            .map(|_| ())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, poll_secs: u64) -> Result<Vec<Update>, DeliveryError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": poll_secs,
            "allowed_updates": ["message"],
        });
        // the request itself must outlive the server-side long poll
        let timeout = Duration::from_secs(poll_secs) + self.timeout;
        self.call("getUpdates", &body, timeout).await
    }
}

#[async_trait]
impl DeliveryGateway for TelegramGateway {
    async fn send_text(
        &self,
        chat_id: i64,
        markdown: &str,
        suppress_link_preview: bool,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": markdown,
            "parse_mode": "Markdown",
            "disable_web_page_preview": suppress_link_preview,
        });
        self.call::<_, serde_json::Value>("sendMessage", &body, self.timeout)
            .await
            .map(|_| ())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        image_url: &str,
        markdown_caption: &str,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "photo": image_url,
            "caption": markdown_caption,
            "parse_mode": "Markdown",
        });
        self.call::<_, serde_json::Value>("sendPhoto", &body, self.timeout)
            .await
            .map(|_| ())
    }
}
