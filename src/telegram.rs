use crate::notifier::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_api_url(TELEGRAM_API_URL, token)
    }

    pub fn with_api_url(api_url: &str, token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send(&self, chat_id: &str, message: &str) -> Result<(), TransportError> {
        let payload = SendMessage {
            chat_id,
            text: message,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: ApiResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => {
                warn!("[Telegram] sendMessage to {} failed: {} ({})", chat_id, status, e);
                return Err(TransportError::Rejected(status.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !body.ok {
            let reason = body.description.unwrap_or_else(|| status.to_string());
            warn!("[Telegram] sendMessage to {} rejected: {}", chat_id, reason);
            return Err(TransportError::Rejected(reason));
        }

        debug!("[Telegram] sendMessage to {} ok", chat_id);
        Ok(())
    }
}
